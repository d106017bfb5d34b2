use crate::{codec::CommandBlock, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Duplex command channel to one physical scanner.
///
/// `send` returns the number of data-in bytes the device produced. Errors are already
/// translated from sense data.
pub trait DeviceChannel: Send {
    /// Reconnects after [`close`](Self::close). A no-op on an open channel.
    fn open(&mut self) -> Result<()>;

    fn send(&mut self, cmd: &[u8], data_out: &[u8], data_in: &mut [u8]) -> Result<usize>;

    fn close(&mut self);
}

pub type SharedChannel = Arc<Mutex<Box<dyn DeviceChannel>>>;

pub fn shared(channel: impl DeviceChannel + 'static) -> SharedChannel {
    Arc::new(Mutex::new(Box::new(channel)))
}

/// Executes a command without a data-in phase.
pub(crate) fn exec(channel: &SharedChannel, cmd: &CommandBlock) -> Result<()> {
    exec_read(channel, cmd, &mut []).map(|_| ())
}

/// Executes a command, receiving at most `cmd.data_in_len` bytes into `data_in`.
pub(crate) fn exec_read(
    channel: &SharedChannel,
    cmd: &CommandBlock,
    data_in: &mut [u8],
) -> Result<usize> {
    let len = cmd.data_in_len.min(data_in.len());

    log::trace!(
        "Call {}(cdb {:02x?}, out {}, in {})",
        cmd.name,
        cmd.cdb,
        cmd.data_out.len(),
        len
    );

    channel
        .lock()
        .send(&cmd.cdb, &cmd.data_out, &mut data_in[..len])
}

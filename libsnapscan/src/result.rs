use std::{io, time::Duration};
use thiserror::Error;

pub type Result<T> = ::core::result::Result<T, ScanError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("unsupported")]
    Unsupported,

    #[error("cancelled")]
    Cancelled,

    /// Carries the delay the hardware asked for, if it reported one.
    #[error("device busy")]
    DeviceBusy(Option<Duration>),

    #[error("device not ready")]
    NotReady,

    #[error("invalid value")]
    Inval,

    #[error("end of medium")]
    EOF,

    #[error("document feeder is jammed")]
    Jammed,

    #[error("document feeder is out of documents")]
    NoDocs,

    #[error("error occurred while communicating with the device")]
    IO,

    #[error("not enough memory")]
    NoMem,

    #[error("no data available yet")]
    WouldBlock,
}

impl From<ScanError> for io::Error {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::IO => io::ErrorKind::BrokenPipe.into(),
            ScanError::NoMem => io::ErrorKind::OutOfMemory.into(),
            ScanError::WouldBlock => io::ErrorKind::WouldBlock.into(),
            err => io::Error::other(err),
        }
    }
}

/// Allocates a zeroed buffer, reporting allocation failure instead of aborting.
pub(crate) fn alloc_buffer(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    if buf.try_reserve_exact(len).is_err() {
        log::error!("Failed to allocate {len} bytes");
        return Err(ScanError::NoMem);
    }
    buf.resize(len, 0);
    Ok(buf)
}

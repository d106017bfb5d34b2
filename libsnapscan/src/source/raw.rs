use super::{Geometry, Source};
use crate::{
    channel::{exec_read, SharedChannel},
    codec::{self, ReadKind},
    result::alloc_buffer,
    Result, ScanError,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Chain root reading image data straight from the device.
pub struct RawSource {
    channel: SharedChannel,
    geometry: Geometry,
    cancelled: Arc<AtomicBool>,
    buf: Vec<u8>,
    pos: usize,
    max: usize,
    /// Largest single READ, a whole number of lines.
    absolute_max: usize,
    bytes_remaining: usize,
}

impl RawSource {
    pub fn new(
        channel: SharedChannel,
        geometry: Geometry,
        phys_buf_sz: usize,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Self> {
        if geometry.bytes_per_line == 0 {
            return Err(ScanError::Inval);
        }

        let absolute_max = (phys_buf_sz / geometry.bytes_per_line) * geometry.bytes_per_line;
        if absolute_max == 0 {
            log::error!(
                "Transfer buffer of {phys_buf_sz} bytes cannot hold a {} byte line",
                geometry.bytes_per_line
            );
            return Err(ScanError::Inval);
        }

        Ok(Self {
            channel,
            geometry,
            cancelled,
            buf: alloc_buffer(absolute_max)?,
            pos: 0,
            max: 0,
            absolute_max,
            bytes_remaining: geometry.total_bytes(),
        })
    }
}

impl Source for RawSource {
    fn remaining(&self) -> usize {
        self.bytes_remaining + (self.max - self.pos)
    }

    fn bytes_per_line(&self) -> usize {
        self.geometry.bytes_per_line
    }

    fn pixels_per_line(&self) -> usize {
        self.geometry.pixels_per_line
    }

    fn get(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut written = 0;

        while written < out.len() && self.remaining() > 0 {
            if self.cancelled.load(Ordering::Relaxed) {
                break;
            }

            if self.pos == self.max {
                let expected = self.absolute_max.min(self.bytes_remaining);
                self.pos = 0;
                self.max = 0;

                let cmd = codec::read(ReadKind::Image, expected as u32, 0);
                let read = match exec_read(&self.channel, &cmd, &mut self.buf[..expected]) {
                    Ok(read) => read,
                    Err(ScanError::DeviceBusy(_)) => {
                        log::debug!("Device busy during image read, retrying later");
                        break;
                    }
                    Err(err) => return Err(err),
                };

                if read == 0 {
                    break;
                }

                self.max = read;
                self.bytes_remaining -= read.min(self.bytes_remaining);
                log::trace!(
                    "Read {read} of {expected} bytes, {} left on device",
                    self.bytes_remaining
                );
            }

            let n = (self.max - self.pos).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }

        Ok(written)
    }

    fn done(&mut self) {
        log::debug!("Raw source done, {} bytes unread", self.remaining());
        self.buf = Vec::new();
        self.pos = 0;
        self.max = 0;
    }
}

use super::{Geometry, Source};
use crate::{Result, ScanError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Chain root fed by the reader task.
pub struct ChannelSource {
    rx: Option<mpsc::Receiver<Result<Vec<u8>>>>,
    geometry: Geometry,
    nonblocking: Arc<AtomicBool>,
    pending: Vec<u8>,
    pos: usize,
    bytes_remaining: usize,
    /// Error held back until the bytes delivered before it were handed out.
    failed: Option<ScanError>,
}

impl ChannelSource {
    pub fn new(
        rx: mpsc::Receiver<Result<Vec<u8>>>,
        geometry: Geometry,
        nonblocking: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rx: Some(rx),
            geometry,
            nonblocking,
            pending: Vec::new(),
            pos: 0,
            bytes_remaining: geometry.total_bytes(),
            failed: None,
        }
    }

    /// Next chunk from the reader. `None` when nothing is queued in non-blocking mode.
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(ScanError::IO);
        };

        let received = if self.nonblocking.load(Ordering::Relaxed) {
            match rx.try_recv() {
                Ok(chunk) => Some(chunk),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => None,
            }
        } else {
            rx.blocking_recv()
        };

        match received {
            Some(chunk) => chunk.map(Some),
            None => {
                log::error!(
                    "Reader stopped with {} bytes outstanding",
                    self.bytes_remaining
                );
                Err(ScanError::IO)
            }
        }
    }
}

impl Source for ChannelSource {
    fn remaining(&self) -> usize {
        self.bytes_remaining
    }

    fn bytes_per_line(&self) -> usize {
        self.geometry.bytes_per_line
    }

    fn pixels_per_line(&self) -> usize {
        self.geometry.pixels_per_line
    }

    fn get(&mut self, out: &mut [u8]) -> Result<usize> {
        if let Some(err) = self.failed.take() {
            return Err(err);
        }

        let mut written = 0;

        while written < out.len() && self.bytes_remaining > 0 {
            if self.pos == self.pending.len() {
                // Stop once something was delivered; a blocking wait could stall the caller.
                if written > 0 && self.nonblocking.load(Ordering::Relaxed) {
                    break;
                }

                match self.next_chunk() {
                    Ok(Some(chunk)) => {
                        self.pending = chunk;
                        self.pos = 0;
                    }
                    Ok(None) => break,
                    Err(err) if written > 0 => {
                        self.failed = Some(err);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            let n = (self.pending.len() - self.pos)
                .min(out.len() - written)
                .min(self.bytes_remaining);
            out[written..written + n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
            self.bytes_remaining -= n;
        }

        Ok(written)
    }

    fn done(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
        }
        self.pending = Vec::new();
        self.pos = 0;
    }
}

use crate::{result::alloc_buffer, Result};

/// Fixed-capacity byte ring with checked modular indexing.
///
/// Positions are absolute offsets into the backing storage; every accessor wraps them
/// modulo the capacity.
#[derive(Debug)]
pub struct RingBuffer {
    data: Vec<u8>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            data: alloc_buffer(capacity)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn wrap(&self, pos: usize) -> usize {
        match self.data.len() {
            0 => 0,
            cap => pos % cap,
        }
    }

    pub fn at(&self, pos: usize) -> u8 {
        self.data[self.wrap(pos)]
    }

    /// Byte `back` positions before `pos`, wrapping around the start.
    pub fn behind(&self, pos: usize, back: usize) -> u8 {
        let cap = self.capacity();
        self.at(pos + cap - back % cap)
    }

    /// Longest writable run starting at `pos` that does not wrap.
    pub fn slot_mut(&mut self, pos: usize, len: usize) -> &mut [u8] {
        let start = self.wrap(pos);
        let end = (start + len).min(self.data.len());
        &mut self.data[start..end]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

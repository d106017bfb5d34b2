//! Pull-based image data pipeline.
//!
//! A chain has exactly one root ([`RawSource`] or [`ChannelSource`]) and a linear sequence
//! of transforms on top of it. Every transform exclusively owns its sub-source.

mod chain;
mod deinterlacer;
mod expander;
mod inverter;
mod pipe;
mod raw;
mod rgb_router;

pub use chain::{build_chain, ChainSpec};
pub use deinterlacer::{ColumnShift, Deinterlacer};
pub use expander::Expander;
pub use inverter::Inverter;
pub use pipe::ChannelSource;
pub use raw::RawSource;
pub use rgb_router::{RgbRouter, SampleLayout};

use crate::Result;

pub trait Source: Send {
    /// Bytes still obtainable from this node. Never increases between calls and reaches
    /// zero exactly when the transfer is exhausted.
    fn remaining(&self) -> usize;

    fn bytes_per_line(&self) -> usize;

    fn pixels_per_line(&self) -> usize;

    /// Fills a prefix of `buf` and returns its length. Zero with `remaining() > 0` means
    /// no data could be produced right now.
    fn get(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Releases buffers and the sub-source.
    fn done(&mut self);
}

/// Hardware-reported line geometry of the raw transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub bytes_per_line: usize,
    pub pixels_per_line: usize,
    /// Output lines, not counting the chroma lag lines.
    pub lines: usize,
    pub chroma: usize,
}

impl Geometry {
    /// Total raw bytes the hardware delivers for one page.
    pub fn total_bytes(&self) -> usize {
        self.bytes_per_line * (self.lines + self.chroma)
    }
}

use super::Source;
use crate::{result::alloc_buffer, Result, ScanError};

/// Expands one-bit-per-channel data to one byte per sample.
///
/// The sub-source delivers each line as three packed channel planes. Every set bit becomes
/// 0xff and every clear bit 0x00, most significant bit first. Padding bits after the last
/// pixel of a plane are skipped.
pub struct Expander {
    sub: Box<dyn Source>,
    ch_buf: Vec<u8>,
    ch_ndata: usize,
    ch_pos: usize,
    bit: u8,
    last_bit: u8,
    last_last_bit: u8,
    /// Samples produced from the channel in progress.
    emitted: usize,
}

impl Expander {
    pub fn new(sub: Box<dyn Source>) -> Result<Self> {
        let ch_size = sub.bytes_per_line() / 3;
        let ppl = sub.pixels_per_line();
        if ch_size == 0 || ppl > ch_size * 8 {
            log::error!(
                "Bilevel line of {} bytes cannot carry {ppl} pixels per channel",
                sub.bytes_per_line()
            );
            return Err(ScanError::Inval);
        }

        // Lowest bit holding a pixel in the final byte of a plane.
        let last_last_bit = ((8 - ppl % 8) % 8) as u8;

        // Start as if a channel was just finished so the first get loads a fresh one.
        Ok(Self {
            sub,
            ch_buf: alloc_buffer(ch_size)?,
            ch_ndata: ch_size,
            ch_pos: ch_size,
            bit: 7,
            last_bit: if ch_size > 1 { 0 } else { last_last_bit },
            last_last_bit,
            emitted: ppl,
        })
    }

    fn ch_size(&self) -> usize {
        self.ch_buf.len()
    }

    fn last_bit_at(&self, pos: usize) -> u8 {
        if pos + 1 == self.ch_size() {
            self.last_last_bit
        } else {
            0
        }
    }
}

impl Source for Expander {
    fn remaining(&self) -> usize {
        let ppl = self.pixels_per_line();
        let unread = self.ch_size() - self.ch_ndata;
        let whole = self.sub.remaining().saturating_sub(unread) / self.ch_size();

        whole * ppl + (ppl - self.emitted)
    }

    fn bytes_per_line(&self) -> usize {
        self.sub.pixels_per_line() * 3
    }

    fn pixels_per_line(&self) -> usize {
        self.sub.pixels_per_line()
    }

    fn get(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;

        while written < buf.len() && self.remaining() > 0 {
            if self.ch_pos == self.ch_ndata {
                let mut want = self.ch_size() - self.ch_ndata;
                if want == 0 {
                    self.ch_ndata = 0;
                    self.ch_pos = 0;
                    self.emitted = 0;
                    want = self.ch_size();
                }

                let start = self.ch_pos;
                let n = self.sub.get(&mut self.ch_buf[start..start + want])?;
                if n == 0 {
                    break;
                }

                self.ch_ndata += n;
                self.last_bit = self.last_bit_at(self.ch_pos);
                self.bit = 7;
            }

            buf[written] = if (self.ch_buf[self.ch_pos] >> self.bit) & 1 != 0 {
                0xff
            } else {
                0x00
            };
            written += 1;
            self.emitted += 1;

            if self.bit == self.last_bit {
                self.bit = 7;
                self.ch_pos += 1;
                self.last_bit = self.last_bit_at(self.ch_pos);
            } else {
                self.bit -= 1;
            }
        }

        Ok(written)
    }

    fn done(&mut self) {
        self.sub.done();
        self.ch_buf = Vec::new();
        self.ch_pos = 0;
        self.ch_ndata = 0;
    }
}

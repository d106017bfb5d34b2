use super::Source;
use crate::{ring::RingBuffer, Result};

/// How the sensor misplaces alternate columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnShift {
    /// Lines between the two column sets.
    pub line_offset: usize,
    /// Whether the even columns lag behind (otherwise the odd ones do).
    pub shift_even: bool,
    /// Bytes of one pixel in the incoming data.
    pub bytes_per_pixel: usize,
    /// One bit per pixel, even and odd columns interleaved inside each byte.
    pub lineart: bool,
}

/// Restores alternate columns that the sensor captures `line_offset` lines apart.
///
/// The node keeps `line_offset + 1` lines in a ring and takes the lagging columns from
/// the line `line_offset` back. Until that many lines have arrived the lagging columns
/// are copied from their neighbours instead.
pub struct Deinterlacer {
    sub: Box<dyn Source>,
    shift: ColumnShift,
    ring: RingBuffer,
    line_len: usize,
    ndata: usize,
    pos: usize,
    past_init: bool,
}

impl Deinterlacer {
    pub fn new(sub: Box<dyn Source>, shift: ColumnShift) -> Result<Self> {
        let line_len = sub.bytes_per_line();
        let ring = RingBuffer::new(line_len * (shift.line_offset + 1))?;

        log::debug!(
            "Deinterlacing {line_len} byte lines, offset {}, {} columns shifted",
            shift.line_offset,
            if shift.shift_even { "even" } else { "odd" },
        );

        Ok(Self {
            sub,
            shift,
            ring,
            line_len,
            ndata: 0,
            pos: 0,
            past_init: false,
        })
    }

    fn refill(&mut self) -> Result<usize> {
        let mut want = self.line_len - self.ndata % self.line_len;
        if self.pos >= self.ring.capacity() {
            self.ndata = 0;
            self.pos = 0;
            want = self.line_len;
        }

        let n = self.sub.get(self.ring.slot_mut(self.pos, want))?;
        self.ndata += n;
        Ok(n)
    }

    /// Value of the byte at `pos` with the lagging columns restored.
    fn output_byte(&self) -> u8 {
        let pos = self.pos;
        let current = self.ring.at(pos);
        let back = self.ring.at(pos + self.line_len);

        if self.shift.lineart {
            return match (self.past_init, self.shift.shift_even) {
                (true, true) => (current & 0x55) | (back & 0xaa),
                (true, false) => (current & 0xaa) | (back & 0x55),
                (false, true) => {
                    let valid = current & 0x55;
                    valid | (valid >> 1)
                }
                (false, false) => {
                    let valid = current & 0xaa;
                    valid | (valid << 1)
                }
            };
        }

        let bpp = self.shift.bytes_per_pixel;
        let even_column = (pos / bpp) % 2 == 0;
        if even_column != self.shift.shift_even {
            return current;
        }

        if self.past_init {
            return back;
        }

        // Neighbouring pixel of the same line; fall back to the byte itself when that
        // pixel has not arrived yet.
        let neighbour = if pos % self.line_len == 0 || pos < bpp {
            pos + bpp
        } else {
            pos - bpp
        };
        if neighbour < self.ndata {
            self.ring.at(neighbour)
        } else {
            current
        }
    }
}

impl Source for Deinterlacer {
    fn remaining(&self) -> usize {
        self.sub.remaining() + (self.ndata - self.pos)
    }

    fn bytes_per_line(&self) -> usize {
        self.sub.bytes_per_line()
    }

    fn pixels_per_line(&self) -> usize {
        self.sub.pixels_per_line()
    }

    fn get(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;

        while written < buf.len() && self.remaining() > 0 {
            if self.pos == self.ndata && self.refill()? == 0 {
                break;
            }

            buf[written] = self.output_byte();
            written += 1;

            if self.pos >= self.line_len * self.shift.line_offset {
                self.past_init = true;
            }
            self.pos += 1;
        }

        Ok(written)
    }

    fn done(&mut self) {
        self.sub.done();
        self.ring.clear();
        self.pos = 0;
        self.ndata = 0;
    }
}

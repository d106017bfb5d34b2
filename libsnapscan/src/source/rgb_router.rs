use super::Source;
use crate::{result::alloc_buffer, ring::RingBuffer, Result, ScanError};

/// Sample encoding of the line-sequential channel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    Eight,
    Sixteen,
    /// 12 significant bits stored little-endian in 16, rescaled to the full range.
    Film12In16,
}

impl SampleLayout {
    fn sample_bytes(self) -> usize {
        match self {
            SampleLayout::Eight => 1,
            SampleLayout::Sixteen | SampleLayout::Film12In16 => 2,
        }
    }
}

/// Turns line-sequential colour planes into pixel-interleaved RGB.
///
/// Each raw line carries the red, green and blue planes back to back, but the sensor rows
/// for the three colours sit a few lines apart. The router keeps `chroma + 1` lines in a
/// ring and assembles output line `k` from red of raw line `k + off[R]`, green of
/// `k + off[G]` and blue of `k + off[B]`. It only ever emits whole assembled lines, so the
/// first `chroma` raw lines are absorbed while the ring warms up.
pub struct RgbRouter {
    sub: Box<dyn Source>,
    layout: SampleLayout,
    ring: RingBuffer,
    /// Assembled output line.
    line: Vec<u8>,
    /// Ring position of the oldest buffered raw line.
    start: usize,
    /// Ring offsets of each channel relative to `start`.
    channel_offsets: [usize; 3],
    pos: usize,
    round_req: usize,
    round_read: usize,
    failed: Option<ScanError>,
}

impl RgbRouter {
    pub fn new(sub: Box<dyn Source>, chroma_offsets: [u32; 3], layout: SampleLayout) -> Result<Self> {
        let line_len = sub.bytes_per_line();
        if line_len < 3 {
            log::error!("Colour line of {line_len} bytes cannot carry three planes");
            return Err(ScanError::Inval);
        }

        let chroma = chroma_offsets.iter().copied().max().unwrap_or(0) as usize;
        let ring_len = line_len * (chroma + 1);

        let channel_offsets = [0, 1, 2].map(|ch| {
            chroma_offsets[ch] as usize * line_len + ch * (line_len / 3)
        });

        log::debug!(
            "RGB router ring {line_len} x {} = {ring_len} bytes, channel offsets {channel_offsets:?}",
            chroma + 1
        );

        Ok(Self {
            sub,
            layout,
            ring: RingBuffer::new(ring_len)?,
            line: alloc_buffer(line_len)?,
            start: 0,
            channel_offsets,
            pos: line_len,
            round_req: ring_len,
            round_read: 0,
            failed: None,
        })
    }

    fn line_len(&self) -> usize {
        self.line.len()
    }

    /// Pulls raw data until the current round is complete. `false` if the sub-source has
    /// nothing more to give right now.
    fn fill_round(&mut self) -> Result<bool> {
        while self.round_read < self.round_req {
            let at = self.start + self.round_read;
            let want = self.round_req - self.round_read;
            let n = self.sub.get(self.ring.slot_mut(at, want))?;
            if n == 0 {
                return Ok(false);
            }
            self.round_read += n;
        }
        Ok(true)
    }

    fn assemble_line(&mut self) {
        self.start = self.ring.wrap(self.start + self.round_read);

        let sample = self.layout.sample_bytes();
        let pixels = self.line_len() / 3 / sample;
        let mut idx = self.channel_offsets.map(|off| self.ring.wrap(self.start + off));
        let mut out = 0;

        for _ in 0..pixels {
            for i in idx.iter_mut() {
                match self.layout {
                    SampleLayout::Eight => {
                        self.line[out] = self.ring.at(*i);
                    }
                    SampleLayout::Sixteen => {
                        self.line[out] = self.ring.at(*i);
                        self.line[out + 1] = self.ring.at(*i + 1);
                    }
                    SampleLayout::Film12In16 => {
                        let raw = u16::from_le_bytes([self.ring.at(*i), self.ring.at(*i + 1)]);
                        let scaled = (raw & 0x0fff) << 4;
                        self.line[out..out + 2].copy_from_slice(&scaled.to_le_bytes());
                    }
                }
                *i += sample;
                out += sample;
            }
        }

        self.pos = 0;
        self.round_req = self.line_len();
        self.round_read = 0;
    }
}

impl Source for RgbRouter {
    fn remaining(&self) -> usize {
        // Until the first round completes, `chroma` lines of raw data never come out.
        let warmup = if self.round_req == self.ring.capacity() {
            self.ring.capacity() - self.line_len()
        } else {
            0
        };

        (self.sub.remaining() + self.round_read + (self.line_len() - self.pos))
            .saturating_sub(warmup)
    }

    fn bytes_per_line(&self) -> usize {
        self.sub.bytes_per_line()
    }

    fn pixels_per_line(&self) -> usize {
        self.sub.pixels_per_line()
    }

    fn get(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(err) = self.failed.take() {
            return Err(err);
        }

        let mut written = 0;

        while written < buf.len() && self.remaining() > 0 {
            if self.pos >= self.line_len() {
                match self.fill_round() {
                    Ok(true) => self.assemble_line(),
                    Ok(false) => break,
                    Err(err) if written > 0 => {
                        self.failed = Some(err);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            let n = (self.line_len() - self.pos).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&self.line[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }

        Ok(written)
    }

    fn done(&mut self) {
        self.sub.done();
        self.ring.clear();
        self.line = Vec::new();
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{
        testing::{drain, ScriptedSource},
        Geometry,
    };
    use pretty_assertions::assert_eq;

    /// Raw line-sequential data whose channel `c` in raw line `j` holds the pattern of
    /// output line `j - offsets[c]`.
    fn offset_planes(ppl: usize, lines: usize, offsets: [u32; 3]) -> Vec<u8> {
        let chroma = *offsets.iter().max().unwrap() as usize;
        let mut raw = Vec::new();
        for j in 0..lines + chroma {
            for off in offsets {
                for px in 0..ppl {
                    let value = match j.checked_sub(off as usize) {
                        Some(k) => (k * 7 + px) as u8,
                        None => 0xee,
                    };
                    raw.push(value);
                }
            }
        }
        raw
    }

    fn geometry(ppl: usize, sample: usize, lines: usize, chroma: usize) -> Geometry {
        Geometry {
            bytes_per_line: ppl * 3 * sample,
            pixels_per_line: ppl,
            lines,
            chroma,
        }
    }

    #[test]
    fn realigns_offset_channels() {
        let (ppl, lines, offsets) = (5, 6, [0, 2, 4]);
        let raw = offset_planes(ppl, lines, offsets);
        let sub = ScriptedSource::new(geometry(ppl, 1, lines, 4), raw, 11);

        let mut router = RgbRouter::new(Box::new(sub), offsets, SampleLayout::Eight).unwrap();
        assert_eq!(router.remaining(), ppl * 3 * lines);

        let out = drain(&mut router, 8).unwrap();
        assert_eq!(out.len(), ppl * 3 * lines);
        for (k, line) in out.chunks(ppl * 3).enumerate() {
            for (px, rgb) in line.chunks(3).enumerate() {
                let expected = (k * 7 + px) as u8;
                assert_eq!(rgb, [expected; 3], "line {k} pixel {px}");
            }
        }
        assert_eq!(router.remaining(), 0);
    }

    #[test]
    fn red_lagging_behind() {
        // Green and blue ahead of red, as a negative difference in the inquiry data.
        let (ppl, lines, offsets) = (4, 3, [3, 0, 1]);
        let raw = offset_planes(ppl, lines, offsets);
        let sub = ScriptedSource::new(geometry(ppl, 1, lines, 3), raw, 64);

        let mut router = RgbRouter::new(Box::new(sub), offsets, SampleLayout::Eight).unwrap();
        let out = drain(&mut router, 100).unwrap();
        assert_eq!(out[..3], [0, 0, 0]);
        assert_eq!(out[out.len() - 3..], [17, 17, 17]);
    }

    #[test]
    fn never_emits_partial_lines() {
        let (ppl, lines, offsets) = (2, 4, [0, 1, 1]);
        let raw = offset_planes(ppl, lines, offsets);
        let mut sub = ScriptedSource::new(geometry(ppl, 1, lines, 1), raw, 5);
        // Enough for the warm-up round and a few bytes of the next line only.
        sub.chunks.truncate(3);

        let mut router = RgbRouter::new(Box::new(sub), offsets, SampleLayout::Eight).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(router.get(&mut buf), Ok(6));
        assert_eq!(router.get(&mut buf), Ok(0));
        assert_eq!(router.remaining(), 6 * 3);
    }

    #[test]
    fn remaining_shrinks_with_output() {
        let (ppl, lines, offsets) = (3, 5, [0, 1, 2]);
        let raw = offset_planes(ppl, lines, offsets);
        let sub = ScriptedSource::new(geometry(ppl, 1, lines, 2), raw, 4);

        let mut router = RgbRouter::new(Box::new(sub), offsets, SampleLayout::Eight).unwrap();
        let mut buf = [0u8; 5];
        while router.remaining() > 0 {
            let before = router.remaining();
            let n = router.get(&mut buf).unwrap();
            assert!(n > 0);
            assert_eq!(router.remaining(), before - n);
        }
    }

    #[test]
    fn sixteen_bit_samples_stay_paired() {
        // One pixel per line, no chroma lag: planes are [R R G G B B].
        let raw = vec![0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc];
        let sub = ScriptedSource::new(geometry(1, 2, 1, 0), raw.clone(), 6);

        let mut router = RgbRouter::new(Box::new(sub), [0; 3], SampleLayout::Sixteen).unwrap();
        assert_eq!(drain(&mut router, 6).unwrap(), raw);
    }

    #[test]
    fn film_samples_are_rescaled() {
        let raw = vec![0xff, 0xff, 0x01, 0x00, 0x34, 0x02];
        let sub = ScriptedSource::new(geometry(1, 2, 1, 0), raw, 6);

        let mut router = RgbRouter::new(Box::new(sub), [0; 3], SampleLayout::Film12In16).unwrap();
        assert_eq!(
            drain(&mut router, 6).unwrap(),
            vec![0xf0, 0xff, 0x10, 0x00, 0x40, 0x23]
        );
    }

    #[test]
    fn errors_after_output_are_deferred() {
        let raw = offset_planes(2, 3, [0; 3]);
        let mut sub = ScriptedSource::new(geometry(2, 1, 3, 0), raw, 6);
        sub.fail_after = Some(6);

        let mut router = RgbRouter::new(Box::new(sub), [0; 3], SampleLayout::Eight).unwrap();
        let mut buf = [0u8; 12];
        assert_eq!(router.get(&mut buf), Ok(6));
        assert_eq!(router.get(&mut buf), Err(ScanError::IO));
    }
}

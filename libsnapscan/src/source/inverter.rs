use super::Source;
use crate::Result;

/// Complements every byte, flipping lineart polarity.
pub struct Inverter {
    sub: Box<dyn Source>,
}

impl Inverter {
    pub fn new(sub: Box<dyn Source>) -> Self {
        Self { sub }
    }
}

impl Source for Inverter {
    fn remaining(&self) -> usize {
        self.sub.remaining()
    }

    fn bytes_per_line(&self) -> usize {
        self.sub.bytes_per_line()
    }

    fn pixels_per_line(&self) -> usize {
        self.sub.pixels_per_line()
    }

    fn get(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.sub.get(buf)?;
        buf[..n].iter_mut().for_each(|b| *b ^= 0xff);
        Ok(n)
    }

    fn done(&mut self) {
        self.sub.done();
    }
}

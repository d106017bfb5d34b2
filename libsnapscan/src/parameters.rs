use crate::options::{Mode, MM_PER_INCH};

/// Geometry of the image a session delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    pub format: FrameFormat,
    pub last_frame: bool,
    pub bytes_per_line: usize,
    pub pixels_per_line: usize,
    pub lines: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Gray,
    RGB,
}

impl FrameFormat {
    pub fn channels(self) -> usize {
        match self {
            FrameFormat::Gray => 1,
            FrameFormat::RGB => 3,
        }
    }
}

impl From<Mode> for FrameFormat {
    fn from(mode: Mode) -> Self {
        if mode.is_colour() {
            Self::RGB
        } else {
            Self::Gray
        }
    }
}

impl Parameters {
    /// Estimate from the requested window before the hardware has reported anything.
    pub fn estimate(mode: Mode, resolution: u16, width_mm: f64, height_mm: f64, depth: usize) -> Self {
        let dots = |mm: f64| (mm * f64::from(resolution) / MM_PER_INCH).max(0.0) as usize;
        let pixels_per_line = dots(width_mm);
        let lines = dots(height_mm);

        let sample_bytes = depth.div_ceil(8);
        let bytes_per_line = match mode {
            Mode::Color | Mode::BilevelColor => 3 * pixels_per_line * sample_bytes,
            Mode::Lineart => pixels_per_line.div_ceil(8),
            Mode::Gray => pixels_per_line * sample_bytes,
        };

        Self {
            format: mode.into(),
            last_frame: true,
            bytes_per_line,
            pixels_per_line,
            lines,
            depth,
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.bytes_per_line * self.lines
    }
}

use super::{
    deinterlacer::ColumnShift, Deinterlacer, Expander, Inverter, RgbRouter, SampleLayout, Source,
};
use crate::{options::Mode, quirks::Deinterlace, Result};

/// What a chain has to undo for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSpec {
    pub mode: Mode,
    pub negative: bool,
    /// Column shift active at the scan resolution, if any.
    pub deinterlace: Option<Deinterlace>,
    /// The column shift also affects lineart scans.
    pub deinterlace_lineart: bool,
    pub layout: SampleLayout,
    pub chroma_offsets: [u32; 3],
}

impl ChainSpec {
    fn column_shift(&self, d: Deinterlace) -> ColumnShift {
        let gray_like = matches!(self.mode, Mode::Gray | Mode::Lineart);
        let pixel_bytes = if gray_like { 1 } else { 3 };
        let sample_bytes = match self.layout {
            SampleLayout::Eight => 1,
            SampleLayout::Sixteen | SampleLayout::Film12In16 => 2,
        };

        ColumnShift {
            line_offset: d.line_offset,
            shift_even: !(gray_like && d.shift_odd_in_gray),
            bytes_per_pixel: pixel_bytes * sample_bytes,
            lineart: self.mode == Mode::Lineart,
        }
    }
}

/// Stacks the transforms `spec` calls for on top of `root`.
pub fn build_chain(root: Box<dyn Source>, spec: &ChainSpec) -> Result<Box<dyn Source>> {
    log::debug!("Building source chain for {spec:?}");

    let mut chain = root;

    match spec.mode {
        Mode::Color => {
            chain = Box::new(RgbRouter::new(chain, spec.chroma_offsets, spec.layout)?);
        }
        Mode::BilevelColor => {
            chain = Box::new(Expander::new(chain)?);
            chain = Box::new(RgbRouter::new(chain, spec.chroma_offsets, SampleLayout::Eight)?);
        }
        Mode::Gray => {}
        Mode::Lineart => {
            // The hardware delivers inverted lineart, so a positive image needs flipping.
            if !spec.negative {
                chain = Box::new(Inverter::new(chain));
            }
        }
    }

    let deinterlace = match spec.mode {
        Mode::Lineart if !spec.deinterlace_lineart => None,
        _ => spec.deinterlace,
    };
    if let Some(d) = deinterlace {
        chain = Box::new(Deinterlacer::new(chain, spec.column_shift(d))?);
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{
        testing::{drain, ScriptedSource},
        Geometry,
    };
    use pretty_assertions::assert_eq;

    fn spec(mode: Mode) -> ChainSpec {
        ChainSpec {
            mode,
            negative: false,
            deinterlace: None,
            deinterlace_lineart: false,
            layout: SampleLayout::Eight,
            chroma_offsets: [0; 3],
        }
    }

    fn root(bytes_per_line: usize, pixels_per_line: usize, data: Vec<u8>) -> Box<dyn Source> {
        let geometry = Geometry {
            bytes_per_line,
            pixels_per_line,
            lines: data.len() / bytes_per_line,
            chroma: 0,
        };
        Box::new(ScriptedSource::new(geometry, data, 64))
    }

    #[test]
    fn gray_is_passed_through() {
        let data: Vec<u8> = (0..32).collect();
        let mut chain = build_chain(root(8, 8, data.clone()), &spec(Mode::Gray)).unwrap();
        assert_eq!(drain(chain.as_mut(), 5).unwrap(), data);
    }

    #[test]
    fn lineart_is_inverted_unless_negative() {
        let mut chain = build_chain(root(1, 8, vec![0x0f]), &spec(Mode::Lineart)).unwrap();
        assert_eq!(drain(chain.as_mut(), 1).unwrap(), vec![0xf0]);

        let negative = ChainSpec {
            negative: true,
            ..spec(Mode::Lineart)
        };
        let mut chain = build_chain(root(1, 8, vec![0x0f]), &negative).unwrap();
        assert_eq!(drain(chain.as_mut(), 1).unwrap(), vec![0x0f]);
    }

    #[test]
    fn colour_is_interleaved() {
        let data = vec![1, 2, 3, 4, 5, 6];
        let mut chain = build_chain(root(6, 2, data), &spec(Mode::Color)).unwrap();
        assert_eq!(chain.bytes_per_line(), 6);
        assert_eq!(drain(chain.as_mut(), 6).unwrap(), vec![1, 3, 5, 2, 4, 6]);
    }

    #[test]
    fn bilevel_colour_is_expanded_then_interleaved() {
        // Eight pixels per plane: red all set, green none, blue alternating.
        let data = vec![0xff, 0x00, 0xaa];
        let mut chain = build_chain(root(3, 8, data), &spec(Mode::BilevelColor)).unwrap();
        assert_eq!(chain.bytes_per_line(), 24);

        let out = drain(chain.as_mut(), 64).unwrap();
        assert_eq!(out.len(), 24);
        assert_eq!(out[..6], [0xff, 0x00, 0xff, 0xff, 0x00, 0x00]);
    }

    #[test]
    fn lineart_deinterlace_depends_on_model() {
        let shift = Deinterlace {
            resolution: 3200,
            line_offset: 1,
            shift_odd_in_gray: true,
        };
        let with = ChainSpec {
            negative: true,
            deinterlace: Some(shift),
            deinterlace_lineart: true,
            ..spec(Mode::Lineart)
        };
        let without = ChainSpec {
            deinterlace_lineart: false,
            ..with
        };

        let data = vec![0b1111_0000, 0b0000_1111];
        let mut plain = build_chain(root(1, 8, data.clone()), &without).unwrap();
        assert_eq!(drain(plain.as_mut(), 4).unwrap(), data);

        let mut fixed = build_chain(root(1, 8, data), &with).unwrap();
        assert_ne!(drain(fixed.as_mut(), 4).unwrap(), vec![0xf0, 0x0f]);
    }

    #[test]
    fn shift_parameters() {
        let d = Deinterlace {
            resolution: 3200,
            line_offset: 8,
            shift_odd_in_gray: true,
        };
        let colour16 = ChainSpec {
            layout: SampleLayout::Sixteen,
            ..spec(Mode::Color)
        };
        let shift = colour16.column_shift(d);
        assert_eq!(shift.bytes_per_pixel, 6);
        assert!(shift.shift_even);

        let gray = spec(Mode::Gray).column_shift(d);
        assert_eq!(gray.bytes_per_pixel, 1);
        assert!(!gray.shift_even);
    }
}

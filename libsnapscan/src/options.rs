use crate::{
    codec::Composition,
    quirks::{Model, ModelQuirks},
    Result, ScanError,
};
use serde::Deserialize;

pub const MM_PER_INCH: f64 = 25.4;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Mode {
    #[default]
    Color,
    BilevelColor,
    Gray,
    Lineart,
}

impl Mode {
    pub fn is_colour(self) -> bool {
        matches!(self, Mode::Color | Mode::BilevelColor)
    }

    pub fn is_bilevel(self) -> bool {
        matches!(self, Mode::BilevelColor | Mode::Lineart)
    }

    pub fn composition(self, halftone: bool) -> Composition {
        match (self, halftone) {
            (Mode::Color, _) => Composition::Color,
            (Mode::BilevelColor, true) => Composition::BilevelColorHalftone,
            (Mode::BilevelColor, false) => Composition::BilevelColor,
            (Mode::Gray, _) => Composition::Gray,
            (Mode::Lineart, true) => Composition::LineartHalftone,
            (Mode::Lineart, false) => Composition::Lineart,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Source {
    #[default]
    Flatbed,
    /// Transparency adapter.
    Tpo,
    /// Automatic document feeder.
    Adf,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Dither {
    #[default]
    Dd8x8,
    Dd16x16,
}

impl Dither {
    pub fn size(self) -> usize {
        match self {
            Dither::Dd8x8 => 8,
            Dither::Dd16x16 => 16,
        }
    }
}

/// User supplied gamma curves, one entry per input level.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CustomGamma {
    pub gray: Vec<u16>,
    pub r: Vec<u16>,
    pub g: Vec<u16>,
    pub b: Vec<u16>,
}

/// Everything a frontend can ask of a scan.
///
/// Geometry is in millimetres from the top-left corner of the scan area. A missing
/// bottom-right coordinate stands for the far edge of the area.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub mode: Mode,
    /// Mode used for previews; `None` follows `mode`.
    pub preview_mode: Option<Mode>,
    pub preview: bool,
    pub resolution: u16,
    pub source: Source,
    pub high_quality: bool,
    pub quality_cal: bool,
    /// Bits per sample; `None` picks the model default.
    pub bit_depth: Option<u8>,

    pub tl_x: f64,
    pub tl_y: f64,
    pub br_x: Option<f64>,
    pub br_y: Option<f64>,

    pub brightness: f64,
    pub contrast: f64,
    /// Lineart threshold in percent.
    pub threshold: f64,
    pub negative: bool,
    pub halftone: bool,
    pub dither: Dither,

    pub gamma_gray: f64,
    pub gamma_r: f64,
    pub gamma_g: f64,
    pub gamma_b: f64,
    /// Use `gamma_gray` for all three colour channels.
    pub gamma_bind: bool,
    pub custom_gamma: Option<CustomGamma>,

    /// Film holder frame, 2720S only.
    pub frame_no: u8,
    pub focus: Option<u16>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Color,
            preview_mode: None,
            preview: false,
            resolution: 300,
            source: Source::Flatbed,
            high_quality: false,
            quality_cal: true,
            bit_depth: None,
            tl_x: 0.0,
            tl_y: 0.0,
            br_x: None,
            br_y: None,
            brightness: 0.0,
            contrast: 0.0,
            threshold: 50.0,
            negative: false,
            halftone: false,
            dither: Dither::Dd8x8,
            gamma_gray: 1.8,
            gamma_r: 1.8,
            gamma_g: 1.8,
            gamma_b: 1.8,
            gamma_bind: false,
            custom_gamma: None,
            frame_no: 1,
            focus: None,
        }
    }
}

impl ScanOptions {
    /// Mode the hardware is actually driven in.
    pub fn actual_mode(&self) -> Mode {
        match self.preview_mode {
            Some(mode) if self.preview => mode,
            _ => self.mode,
        }
    }

    /// Bits per sample requested from the hardware for `model`.
    pub fn scan_depth(&self, quirks: &ModelQuirks) -> u8 {
        if self.actual_mode().is_bilevel() {
            1
        } else if self.preview && !quirks.film_scanner_12bit {
            8
        } else {
            self.bit_depth
                .unwrap_or_else(|| supported_bit_depths(quirks.model)[0])
        }
    }

    /// Scan area bounds in millimetres, bottom-right coordinates resolved.
    pub fn area(&self, model: Model, epson_config: u8) -> (f64, f64, f64, f64) {
        let (max_x, max_y) = scan_area(model, self.source, epson_config);
        let br_x = self.br_x.unwrap_or(max_x).clamp(0.0, max_x);
        let br_y = self.br_y.unwrap_or(max_y).clamp(0.0, max_y);
        (self.tl_x, self.tl_y, br_x, br_y)
    }

    pub fn validate(&self, quirks: &ModelQuirks) -> Result<()> {
        let invalid = |what: &str| {
            log::error!("Invalid scan option: {what}");
            Err(ScanError::Inval)
        };

        if self.resolution == 0 {
            return invalid("resolution must be positive");
        }
        if let Some(bits) = self.bit_depth {
            if !supported_bit_depths(quirks.model).contains(&bits) {
                return invalid(&format!("{} does not scan at {bits} bits", quirks.model));
            }
        }
        if !(0.0..=100.0).contains(&self.threshold) {
            return invalid("threshold out of 0..=100");
        }
        if !(-400.0..=400.0).contains(&self.brightness) {
            return invalid("brightness out of -400..=400");
        }
        if !(-100.0..=400.0).contains(&self.contrast) {
            return invalid("contrast out of -100..=400");
        }
        for gamma in [self.gamma_gray, self.gamma_r, self.gamma_g, self.gamma_b] {
            if !(0.0..=4.0).contains(&gamma) {
                return invalid("gamma out of 0..=4");
            }
        }
        if self.tl_x < 0.0 || self.tl_y < 0.0 {
            return invalid("negative top-left corner");
        }
        if quirks.film_scanner_12bit {
            if !(1..=6).contains(&self.frame_no) {
                return invalid("frame number out of 1..=6");
            }
            if self.focus.is_some_and(|focus| focus > 0x300) {
                return invalid("focus point out of 0..=0x300");
            }
        }
        if self.source == Source::Adf && self.preview {
            log::warn!("Previewing from the document feeder consumes a page");
        }

        Ok(())
    }
}

pub fn supported_bit_depths(model: Model) -> &'static [u8] {
    match model {
        Model::Perfection2480 | Model::Perfection3490 => &[8, 16],
        Model::ScanWit2720S => &[12],
        _ => &[8],
    }
}

/// Largest scan area in millimetres for a model and source.
pub fn scan_area(model: Model, source: Source, epson_config: u8) -> (f64, f64) {
    if source != Source::Tpo {
        return (216.0, 297.0);
    }

    match model {
        Model::SnapScan1236 => (203.0, 254.0),
        Model::SnapScanE20 | Model::SnapScanE50 | Model::SnapScanE52 => (40.0, 240.0),
        Model::Perfection1270 | Model::Perfection1670 => (101.0, 228.0),
        // Perfection 2580 reports itself as a 2480 with this configuration bit.
        Model::Perfection2480 if epson_config & 0x20 != 0 => (55.0, 80.0),
        Model::Perfection2480 => (55.0, 125.0),
        Model::ScanWit2720S => (23.6, 35.7),
        Model::Perfection3490 => (33.0, 162.0),
        _ => (129.0, 180.0),
    }
}

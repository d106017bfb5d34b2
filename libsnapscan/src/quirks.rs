//! Per-model capability data.
//!
//! Code elsewhere never matches on [`Model`] directly; it asks [`Model::quirks`] and acts on
//! the returned descriptor.

use crate::codec::HardwareConfig;
use std::time::Duration;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Model {
    #[strum(to_string = "SnapScan")]
    SnapScan,
    #[strum(to_string = "SnapScan300")]
    SnapScan300,
    #[strum(to_string = "SnapScan310")]
    SnapScan310,
    #[strum(to_string = "SnapScan600")]
    SnapScan600,
    #[strum(to_string = "SnapScan1236")]
    SnapScan1236,
    #[strum(to_string = "SnapScan1212")]
    SnapScan1212U,
    #[strum(to_string = "SnapScanE20")]
    SnapScanE20,
    #[strum(to_string = "SnapScanE50")]
    SnapScanE50,
    #[strum(to_string = "SnapScanE52")]
    SnapScanE52,
    #[strum(to_string = "Acer300")]
    Acer300F,
    #[strum(to_string = "Acer310")]
    Prisa310,
    #[strum(to_string = "Acer610")]
    Prisa610,
    #[strum(to_string = "Acer620")]
    Prisa620,
    #[strum(to_string = "Acer640")]
    Prisa640,
    #[strum(to_string = "Acer1240")]
    Prisa1240,
    #[strum(to_string = "Acer4300")]
    Prisa4300,
    #[strum(to_string = "Acer4300 (42 bit)")]
    Prisa4300_42,
    #[strum(to_string = "Benq 5000")]
    Prisa5000,
    #[strum(to_string = "Benq 5000E/5000U")]
    Prisa5000E,
    #[strum(to_string = "Benq 5150 / 5250")]
    Prisa5150,
    #[strum(to_string = "Benq 5300")]
    Prisa5300,
    #[strum(to_string = "Perfection 660")]
    Perfection660,
    #[strum(to_string = "Perfection 1270")]
    Perfection1270,
    #[strum(to_string = "Perfection 1670")]
    Perfection1670,
    #[strum(to_string = "Perfection 2480")]
    Perfection2480,
    #[strum(to_string = "Perfection 3490")]
    Perfection3490,
    #[strum(to_string = "Stylus CX 1500")]
    StylusCx1500,
    #[strum(to_string = "Arcus1200")]
    Arcus1200,
    #[strum(to_string = "BenQ ScanWit 2720S")]
    ScanWit2720S,
}

#[rustfmt::skip]
const SCSI_PRODUCTS: &[(&str, Model)] = &[
    ("FlatbedScanner_2", Model::Prisa310),
    ("FlatbedScanner_4", Model::Prisa610),
    ("FlatbedScanner_5", Model::Prisa620),
    ("FlatbedScanner_7", Model::Prisa310),
    ("FlatbedScanner_9", Model::Prisa620),
    ("FlatbedScanner13", Model::Prisa620),
    ("FlatbedScanner16", Model::Prisa620),
    ("FlatbedScanner17", Model::Prisa620),
    ("FlatbedScanner18", Model::Prisa620),
    ("FlatbedScanner19", Model::Prisa1240),
    ("FlatbedScanner20", Model::Prisa640),
    ("FlatbedScanner21", Model::Prisa4300),
    ("FlatbedScanner22", Model::Prisa4300_42),
    ("FlatbedScanner23", Model::Prisa4300_42),
    ("FlatbedScanner24", Model::Prisa5300),
    ("FlatbedScanner25", Model::Prisa5000E),
    ("FlatbedScanner40", Model::Prisa5150),
    ("FlatbedScanner42", Model::Prisa5000),
    ("SNAPSCAN 1212U",   Model::SnapScan1212U),
    ("SNAPSCAN 1212U_2", Model::SnapScan1212U),
    ("SNAPSCAN e10",     Model::SnapScanE20),
    ("SNAPSCAN e20",     Model::SnapScanE20),
    ("SNAPSCAN e25",     Model::SnapScanE20),
    ("SNAPSCAN e26",     Model::SnapScanE20),
    ("SNAPSCAN e40",     Model::SnapScanE50),
    ("SNAPSCAN e42",     Model::SnapScanE52),
    ("SNAPSCAN e50",     Model::SnapScanE50),
    ("SNAPSCAN e52",     Model::SnapScanE52),
    ("SNAPSCAN 1236",    Model::SnapScan1236),
    ("SNAPSCAN 1236U",   Model::SnapScan1236),
    ("SNAPSCAN 300",     Model::SnapScan300),
    ("SNAPSCAN 310",     Model::SnapScan310),
    ("SNAPSCAN 600",     Model::SnapScan600),
    ("SnapScan",         Model::SnapScan),
    ("ACERSCAN_A4____1", Model::Acer300F),
    ("Perfection 660",   Model::Perfection660),
    ("EPSON Scanner",    Model::Perfection1670),
    ("EPSON Scanner1",   Model::Perfection2480),
    ("EPSON Scanner2",   Model::Perfection3490),
    ("EPSON MFP00",      Model::StylusCx1500),
    ("ARCUS 1200",       Model::Arcus1200),
    ("FilmScanner____1", Model::ScanWit2720S),
];

pub const USB_VENDOR_AGFA: u16 = 0x06bd;
pub const USB_VENDOR_ACER: u16 = 0x04a5;
pub const USB_VENDOR_EPSON: u16 = 0x04b8;

#[rustfmt::skip]
const USB_PRODUCTS: &[(u16, u16, Model)] = &[
    (USB_VENDOR_ACER,  0x1a20, Model::Prisa310),
    (USB_VENDOR_ACER,  0x2022, Model::Prisa310),
    (USB_VENDOR_EPSON, 0x0114, Model::Perfection660),
    (USB_VENDOR_EPSON, 0x0120, Model::Perfection1270),
    (USB_VENDOR_EPSON, 0x011f, Model::Perfection1670),
    (USB_VENDOR_EPSON, 0x0121, Model::Perfection2480),
    (USB_VENDOR_EPSON, 0x0122, Model::Perfection3490),
];

/// SCSI vendor strings of the supported family.
pub const VENDORS: &[&str] = &["AGFA", "COLOR", "Color", "ACERPER", "EPSON"];

impl Model {
    pub fn from_scsi_product(product: &str) -> Option<Self> {
        SCSI_PRODUCTS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(product))
            .map(|&(_, model)| model)
    }

    pub fn from_usb_ids(vendor: u16, product: u16) -> Option<Self> {
        USB_PRODUCTS
            .iter()
            .find(|&&(v, p, _)| v == vendor && p == product)
            .map(|&(_, _, model)| model)
    }

    pub fn is_film_scanner(self) -> bool {
        self == Self::ScanWit2720S
    }

    pub fn is_epson(self) -> bool {
        matches!(
            self,
            Self::Perfection660
                | Self::Perfection1270
                | Self::Perfection1670
                | Self::Perfection2480
                | Self::Perfection3490
                | Self::StylusCx1500
        )
    }

    pub fn quirks(self) -> ModelQuirks {
        use Model::*;

        let epson_2480_3490 = matches!(self, Perfection2480 | Perfection3490);

        ModelQuirks {
            model: self,
            zero_chroma: matches!(self, SnapScan | Acer300F),
            deinterlace: match self {
                Perfection2480 => Some(Deinterlace {
                    resolution: 2400,
                    line_offset: 4,
                    shift_odd_in_gray: false,
                }),
                Perfection3490 => Some(Deinterlace {
                    resolution: 3200,
                    line_offset: 8,
                    shift_odd_in_gray: true,
                }),
                Prisa5000E => Some(Deinterlace {
                    resolution: 1200,
                    line_offset: 4,
                    shift_odd_in_gray: false,
                }),
                _ => None,
            },
            deinterlace_lineart: self == Perfection3490,
            bytes_per_line_msb: epson_2480_3490,
            adc_bits: match self {
                Perfection1270 | Perfection1670 | Perfection2480 | Perfection3490
                | Prisa5150 | Prisa5000 => Some(14),
                StylusCx1500 | ScanWit2720S => Some(12),
                _ => None,
            },
            no_preview_bit: epson_2480_3490,
            transtime_qualifier: u8::from(self == Perfection2480),
            debug_mode_and_gamma_no: !matches!(self, Acer300F | SnapScan310 | Prisa310 | Prisa610),
            gamma_resend: match self {
                Perfection1270 | Perfection1670 | Perfection2480 | Perfection3490 => {
                    GammaResend::Same
                }
                Prisa5150 => GammaResend::Gamma2,
                _ => GammaResend::None,
            },
            skip_self_test: matches!(
                self,
                Prisa620 | Prisa610 | SnapScan1236 | ScanWit2720S | Arcus1200
            ),
            ring_buffer_read_cap: epson_2480_3490.then_some(0xfff0),
            phys_buf_sz: if epson_2480_3490 {
                2 * DEFAULT_PHYS_BUF_SZ
            } else {
                DEFAULT_PHYS_BUF_SZ
            },
            film_scanner_12bit: self == ScanWit2720S,
            epson_calibration: epson_2480_3490,
            static_calibration: self == Prisa5150,
            half_resolution_calibration: matches!(
                self,
                StylusCx1500
                    | Prisa5000E
                    | Prisa5000
                    | Prisa5150
                    | Perfection1270
                    | Perfection1670
                    | Perfection2480
                    | Perfection3490
            ),
            quality_cal: match self {
                SnapScanE52 | Perfection1670 | Prisa5300 => QualityCal::Never,
                Prisa5150 | StylusCx1500 => QualityCal::Always,
                _ => QualityCal::FromHardware,
            },
            firmware_length: match self {
                Prisa310 | Prisa610 | Prisa620 | Prisa640 | Prisa1240 | Prisa4300
                | Prisa4300_42 | Prisa5000 | Prisa5000E | Prisa5150 | Prisa5300
                | StylusCx1500 => FirmwareLength::WholeFile,
                Perfection1270 | Perfection1670 | Perfection2480 | Perfection3490 => {
                    FirmwareLength::TrailerAt(0x64)
                }
                _ => FirmwareLength::TrailerAt(0x5e),
            },
            ready_wait: RetryPolicy::default(),
        }
    }
}

pub const DEFAULT_PHYS_BUF_SZ: usize = 63 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deinterlace {
    pub resolution: u16,
    /// Distance in lines between the two sensor rows.
    pub line_offset: usize,
    /// Grey and lineart scans shift the odd columns instead of the even ones.
    pub shift_odd_in_gray: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GammaResend {
    None,
    Same,
    Gamma2,
}

/// Whether quality calibration may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityCal {
    /// As the hardware configuration allows.
    FromHardware,
    /// Never, whatever the hardware reports.
    Never,
    /// Always, regardless of the option.
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareLength {
    WholeFile,
    /// Little-endian u16 located this many bytes before the end of the image.
    TrailerAt(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Sleep for the hardware wait hint on a busy status that carries one.
    pub sleep_from_hint: bool,
    /// Upper bound for a single hinted sleep.
    pub max_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            sleep_from_hint: true,
            max_sleep: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelQuirks {
    pub model: Model,
    pub zero_chroma: bool,
    pub deinterlace: Option<Deinterlace>,
    pub deinterlace_lineart: bool,
    pub bytes_per_line_msb: bool,
    /// Fixed converter depth; `None` derives it from the hardware configuration.
    pub adc_bits: Option<u8>,
    pub no_preview_bit: bool,
    pub transtime_qualifier: u8,
    pub debug_mode_and_gamma_no: bool,
    pub gamma_resend: GammaResend,
    pub skip_self_test: bool,
    pub ring_buffer_read_cap: Option<usize>,
    pub phys_buf_sz: usize,
    pub film_scanner_12bit: bool,
    pub epson_calibration: bool,
    pub static_calibration: bool,
    pub half_resolution_calibration: bool,
    pub quality_cal: QualityCal,
    pub firmware_length: FirmwareLength,
    pub ready_wait: RetryPolicy,
}

impl ModelQuirks {
    pub fn inquiry_len(&self, firmware_loaded: bool) -> u8 {
        match self.model {
            Model::Perfection2480 | Model::Perfection3490 if firmware_loaded => 139,
            Model::Prisa5000 | Model::Prisa5150 => 138,
            _ => 120,
        }
    }

    pub fn bits_per_sample(&self, hardware_config: HardwareConfig) -> u8 {
        match self.adc_bits {
            Some(bits) => bits,
            None if hardware_config.contains(HardwareConfig::Adc) => 10,
            None => 8,
        }
    }

    pub fn calibrates(&self, requested: bool, hardware_config: HardwareConfig) -> bool {
        match self.quality_cal {
            QualityCal::Always => true,
            QualityCal::Never => false,
            QualityCal::FromHardware => {
                requested && hardware_config.contains(HardwareConfig::CalibrationAllowed)
            }
        }
    }

    /// Resolution that window coordinates are expressed in.
    pub fn pos_factor(&self, res: u16, optical: u16) -> u16 {
        let (low, high) = match self.model {
            Model::Prisa5000 | Model::Prisa5000E | Model::Prisa5150 => (600, 1200),
            Model::Perfection1270 | Model::Perfection1670 => (800, 1600),
            Model::Perfection2480 => (1200, 2400),
            Model::Perfection3490 => (1600, 3200),
            _ => return optical,
        };

        if res > low {
            high
        } else {
            low
        }
    }

    /// Deinterlacer parameters applicable to a scan at `res`.
    pub fn deinterlace_at(&self, res: u16) -> Option<Deinterlace> {
        self.deinterlace.filter(|d| d.resolution == res)
    }

    /// Length in pixels of one calibration line.
    pub fn calibration_line_pixels(&self, optical: u16) -> usize {
        let optical = f64::from(optical);
        let pixels = if self.film_scanner_12bit {
            2550.0
        } else if self.half_resolution_calibration {
            optical / 2.0 * 8.5
        } else {
            optical * 8.5
        };
        pixels as usize
    }
}

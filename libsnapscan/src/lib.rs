mod calibration;
mod channel;
pub mod codec;
mod dither;
mod firmware;
mod gamma;
mod options;
mod parameters;
mod quirks;
mod reader;
mod registry;
mod result;
mod ring;
mod sense;
mod session;
#[cfg(target_os = "linux")]
mod sg;
pub mod source;

pub use channel::{shared, DeviceChannel, SharedChannel};
pub use firmware::load_image as load_firmware_image;
pub use options::{scan_area, supported_bit_depths, CustomGamma, Dither, Mode, ScanOptions, Source as ScanSource};
pub use parameters::{FrameFormat, Parameters};
pub use quirks::{Model, ModelQuirks};
pub use registry::{DeviceInfo, Registry};
pub use result::{Result, ScanError};
pub use session::{Bus, DeviceConfig, PageReader, Session, State};
#[cfg(target_os = "linux")]
pub use sg::SgChannel;

use anyhow::Context;
use libsnapscan::{Bus, DeviceConfig, Model, ScanOptions};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: Device,

    #[serde(default)]
    pub scan: ScanOptions,

    #[serde(default)]
    pub output: Output,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub path: PathBuf,

    #[serde(default)]
    pub bus: Bus,

    /// Model name, skips detection.
    pub model: Option<String>,

    /// USB vendor and product id, e.g. `[0x04b8, 0x0121]`.
    pub usb_id: Option<(u16, u16)>,

    pub buffer_size: Option<usize>,

    pub firmware: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Output {
    pub directory: PathBuf,
    pub format: OutputFormat,

    /// Keep feeding pages until the document feeder runs empty.
    pub batch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Pnm,
    Png,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            format: OutputFormat::Pnm,
            batch: false,
        }
    }
}

impl Config {
    pub fn read_from<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let dpath = path.display();

        let raw = fs::read_to_string(path).with_context(|| format!("reading file '{dpath}'"))?;
        let config = toml::from_str(&raw).with_context(|| format!("parsing file '{dpath}'"))?;

        Ok(config)
    }
}

impl Device {
    pub fn device_config(&self) -> anyhow::Result<DeviceConfig> {
        let model = self
            .model
            .as_deref()
            .map(|name| Model::from_str(name).with_context(|| format!("unknown model '{name}'")))
            .transpose()?;

        Ok(DeviceConfig {
            bus: self.bus,
            model,
            usb_id: self.usb_id,
            buffer_size: self.buffer_size,
            firmware: self.firmware.clone(),
        })
    }
}

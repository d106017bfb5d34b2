//! Known devices, probed once and looked up by name.

use crate::{
    channel::{exec_read, DeviceChannel, SharedChannel},
    codec::{self, Inquiry, INQUIRY_MIN_LEN},
    quirks::{Model, VENDORS},
    Result, ScanError,
};
use bstr::ByteSlice;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub model: Model,
    pub kind: &'static str,
}

/// Reads the identification part of the inquiry data and maps it onto a model.
///
/// USB ids, when known, take precedence over the product string since several USB models
/// report identical names.
pub(crate) fn identify(
    channel: &SharedChannel,
    usb_id: Option<(u16, u16)>,
) -> Result<(Inquiry, Model)> {
    let mut buf = [0u8; INQUIRY_MIN_LEN];
    let n = exec_read(channel, &codec::inquiry(INQUIRY_MIN_LEN as u8), &mut buf)?;
    let inquiry = Inquiry::parse(&buf[..n])?;

    let vendor = inquiry.vendor.to_str_lossy();
    if !VENDORS.iter().any(|known| vendor.starts_with(known)) {
        log::warn!("Vendor '{vendor}' is not supported");
        return Err(ScanError::Unsupported);
    }

    let product = inquiry.product.to_str_lossy();
    let model = usb_id
        .and_then(|(vendor, product)| Model::from_usb_ids(vendor, product))
        .or_else(|| Model::from_scsi_product(&product))
        .ok_or_else(|| {
            log::warn!("Product '{product}' from '{vendor}' is not supported");
            ScanError::Unsupported
        })?;

    log::debug!("Identified '{vendor} {product}' as {model}");
    Ok((inquiry, model))
}

#[derive(Debug, Default)]
pub struct Registry {
    devices: Vec<DeviceInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes the device at `path` and records it. A path already known is not probed again.
    pub fn add<F>(&mut self, path: &str, open: F) -> Result<&DeviceInfo>
    where
        F: FnOnce(&str) -> Result<Box<dyn DeviceChannel>>,
    {
        if let Some(pos) = self.devices.iter().position(|d| d.name == path) {
            return Ok(&self.devices[pos]);
        }

        let channel: SharedChannel = Arc::new(Mutex::new(open(path)?));
        let identified = identify(&channel, None);
        channel.lock().close();
        let (inquiry, model) = identified?;

        let info = DeviceInfo {
            name: path.to_owned(),
            vendor: inquiry.vendor.to_str_lossy().into_owned(),
            model,
            kind: if model.is_film_scanner() {
                "film scanner"
            } else {
                "flatbed scanner"
            },
        };
        log::info!("Found {} {} at {path}", info.vendor, info.model);

        self.devices.push(info);
        Ok(&self.devices[self.devices.len() - 1])
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn find(&self, name: &str) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.name == name)
    }
}

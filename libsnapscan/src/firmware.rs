//! Firmware upload for USB models that boot without it.

use crate::{
    channel::{exec, SharedChannel},
    codec,
    quirks::FirmwareLength,
    Result, ScanError,
};
use std::{fs, path::Path};

/// Reads a firmware file and cuts it to the length its vendor format declares.
pub fn load_image(path: &Path, length: FirmwareLength) -> Result<Vec<u8>> {
    let mut image = fs::read(path).map_err(|err| {
        log::error!("Cannot read firmware file '{}': {err}", path.display());
        ScanError::Inval
    })?;

    let len = match length {
        FirmwareLength::WholeFile => image.len(),
        FirmwareLength::TrailerAt(offset) => {
            let at = usize::try_from(offset)
                .ok()
                .and_then(|offset| image.len().checked_sub(offset))
                .filter(|&at| at + 2 <= image.len())
                .ok_or_else(|| {
                    log::error!("Firmware file '{}' has no length trailer", path.display());
                    ScanError::Inval
                })?;
            usize::from(u16::from_le_bytes([image[at], image[at + 1]]))
        }
    };

    if len > image.len() {
        log::error!(
            "Firmware file '{}' declares {len} bytes but holds {}",
            path.display(),
            image.len()
        );
        return Err(ScanError::Inval);
    }

    image.truncate(len);
    Ok(image)
}

/// Sends the firmware image at `path` to the device.
pub(crate) fn upload(channel: &SharedChannel, path: &Path, length: FirmwareLength) -> Result<()> {
    let image = load_image(path, length)?;
    log::info!("Uploading firmware '{}', {} bytes", path.display(), image.len());
    exec(channel, &codec::firmware(image)?)
}

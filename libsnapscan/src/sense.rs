//! Translation of fixed-format SCSI sense data into [`ScanError`].

use crate::{Result, ScanError};
use std::time::Duration;

pub const SENSE_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
    /// Additional sense bytes 18 and 19.
    pub info: [u8; 2],
}

impl Sense {
    /// Returns `None` when the sense key is flagged as invalid.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 14 || data[0] & 0x80 == 0 {
            return None;
        }

        Some(Self {
            key: data[2] & 0x0f,
            asc: data[12],
            ascq: data[13],
            info: [
                data.get(18).copied().unwrap_or(0),
                data.get(19).copied().unwrap_or(0),
            ],
        })
    }

    pub fn wait_hint(&self) -> Option<Duration> {
        match self.info[0] {
            0 => None,
            secs => Some(Duration::from_secs(secs.into())),
        }
    }

    #[rustfmt::skip]
    pub fn to_result(&self) -> Result<()> {
        match (self.key, self.asc, self.ascq) {
            (0x00, _, _) => Ok(()),
            (0x02, 0x04, 0x01) => {
                log::debug!("Logical unit is becoming ready, wait hint {:?}", self.wait_hint());
                Err(ScanError::DeviceBusy(self.wait_hint()))
            }
            (0x02, _, _) => Err(ScanError::NotReady),
            (0x04, _, _) => {
                log::error!("Hardware error (0x{:02x}, 0x{:02x})", self.info[0], self.info[1]);
                Err(ScanError::IO)
            }
            (0x05, asc, ascq) => {
                log::error!("Illegal request (asc 0x{asc:02x}, ascq 0x{ascq:02x})");
                Err(ScanError::IO)
            }
            (0x06, _, _) => Err(ScanError::DeviceBusy(None)),
            (0x09, 0x00, 0x05) => Err(ScanError::NoDocs),
            (0x09, 0x3b, 0x05) => Err(ScanError::Jammed),
            (0x09, 0x3b, 0x09) => Err(ScanError::EOF),
            (0x09, asc, ascq) => {
                log::debug!("Ignore process error (asc 0x{asc:02x}, ascq 0x{ascq:02x})");
                Ok(())
            }
            (0x0b, _, _) => Err(ScanError::IO),
            (key, asc, ascq) => {
                log::warn!("No handling for sense key 0x{key:x} (asc 0x{asc:02x}, ascq 0x{ascq:02x})");
                Ok(())
            }
        }
    }
}

/// Decodes a raw sense buffer. Invalid sense data counts as success.
pub fn decode(data: &[u8]) -> Result<()> {
    match Sense::parse(data) {
        Some(sense) => sense.to_result(),
        None => {
            log::trace!("Sense key is invalid");
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) fn sense_bytes(key: u8, asc: u8, ascq: u8, hint: u8) -> [u8; SENSE_LEN] {
    let mut data = [0u8; SENSE_LEN];
    data[0] = 0xf0;
    data[2] = key;
    data[12] = asc;
    data[13] = ascq;
    data[18] = hint;
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sense_is_good() {
        let mut data = sense_bytes(0x04, 0, 0, 0);
        data[0] = 0x70;
        assert_eq!(decode(&data), Ok(()));
        assert_eq!(decode(&[0xf0, 0, 4]), Ok(()));
    }

    #[test]
    fn warming_up_carries_hint() {
        let data = sense_bytes(0x02, 0x04, 0x01, 7);
        assert_eq!(
            decode(&data),
            Err(ScanError::DeviceBusy(Some(Duration::from_secs(7))))
        );

        let data = sense_bytes(0x02, 0x04, 0x01, 0);
        assert_eq!(decode(&data), Err(ScanError::DeviceBusy(None)));
    }

    #[test]
    fn feeder_conditions() {
        assert_eq!(decode(&sense_bytes(0x09, 0x00, 0x05, 0)), Err(ScanError::NoDocs));
        assert_eq!(decode(&sense_bytes(0x09, 0x3b, 0x05, 0)), Err(ScanError::Jammed));
        assert_eq!(decode(&sense_bytes(0x09, 0x3b, 0x09, 0)), Err(ScanError::EOF));
        assert_eq!(decode(&sense_bytes(0x09, 0x11, 0x00, 0)), Ok(()));
    }

    #[test]
    fn fatal_keys() {
        for key in [0x04, 0x05, 0x0b] {
            assert_eq!(decode(&sense_bytes(key, 0, 0, 0)), Err(ScanError::IO));
        }
        assert_eq!(decode(&sense_bytes(0x02, 0x3a, 0x00, 0)), Err(ScanError::NotReady));
    }

    #[test]
    fn key_is_masked() {
        assert_eq!(decode(&sense_bytes(0xf0, 0, 0, 0)), Ok(()));
    }
}

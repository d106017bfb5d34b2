//! Linux SCSI generic transport.

use crate::{sense, DeviceChannel, Result, ScanError};
use std::{
    ffi::{c_int, c_uchar, c_uint, c_ushort, c_void},
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    ptr::null_mut,
    time::Duration,
};

const SG_IO: u32 = 0x2285;
const SG_INTERFACE_ID: c_int = b'S' as c_int;
const SG_DXFER_NONE: c_int = -1;
const SG_DXFER_TO_DEV: c_int = -2;
const SG_DXFER_FROM_DEV: c_int = -3;
const SG_INFO_OK_MASK: c_uint = 0x1;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[repr(C)]
struct SgIoHdr {
    interface_id: c_int,
    dxfer_direction: c_int,
    cmd_len: c_uchar,
    mx_sb_len: c_uchar,
    iovec_count: c_ushort,
    dxfer_len: c_uint,
    dxferp: *mut c_void,
    cmdp: *const c_uchar,
    sbp: *mut c_uchar,
    timeout: c_uint,
    flags: c_uint,
    pack_id: c_int,
    usr_ptr: *mut c_void,
    status: c_uchar,
    masked_status: c_uchar,
    msg_status: c_uchar,
    sb_len_wr: c_uchar,
    host_status: c_ushort,
    driver_status: c_ushort,
    resid: c_int,
    duration: c_uint,
    info: c_uint,
}

#[derive(Debug)]
pub struct SgChannel {
    path: PathBuf,
    file: Option<File>,
}

impl SgChannel {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = open_node(&path)?;

        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_node(path: &Path) -> Result<File> {
    log::trace!("Call open('{}')", path.display());
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| {
            log::error!("Failed to open '{}': {err}", path.display());
            match err.kind() {
                io::ErrorKind::NotFound => ScanError::Inval,
                _ => ScanError::IO,
            }
        })
}

impl DeviceChannel for SgChannel {
    fn open(&mut self) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(open_node(&self.path)?);
        }
        Ok(())
    }

    fn send(&mut self, cmd: &[u8], data_out: &[u8], data_in: &mut [u8]) -> Result<usize> {
        let Some(file) = &self.file else {
            log::error!("Command sent to closed device '{}'", self.path.display());
            return Err(ScanError::IO);
        };

        if !data_out.is_empty() && !data_in.is_empty() {
            return Err(ScanError::Inval);
        }

        let (direction, dxferp, dxfer_len) = if !data_out.is_empty() {
            (SG_DXFER_TO_DEV, data_out.as_ptr() as *mut c_void, data_out.len())
        } else if !data_in.is_empty() {
            (SG_DXFER_FROM_DEV, data_in.as_mut_ptr().cast(), data_in.len())
        } else {
            (SG_DXFER_NONE, null_mut(), 0)
        };

        let mut sense_buf = [0u8; sense::SENSE_LEN];
        let mut hdr = SgIoHdr {
            interface_id: SG_INTERFACE_ID,
            dxfer_direction: direction,
            cmd_len: cmd.len() as c_uchar,
            mx_sb_len: sense_buf.len() as c_uchar,
            iovec_count: 0,
            dxfer_len: dxfer_len as c_uint,
            dxferp,
            cmdp: cmd.as_ptr(),
            sbp: sense_buf.as_mut_ptr(),
            timeout: COMMAND_TIMEOUT.as_millis() as c_uint,
            flags: 0,
            pack_id: 0,
            usr_ptr: null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        let rc = unsafe { libc::ioctl(file.as_raw_fd(), SG_IO as _, &mut hdr as *mut SgIoHdr) };
        if rc < 0 {
            log::error!("SG_IO failed: {}", io::Error::last_os_error());
            return Err(ScanError::IO);
        }

        if hdr.info & SG_INFO_OK_MASK != 0 {
            if hdr.sb_len_wr > 0 {
                sense::decode(&sense_buf[..usize::from(hdr.sb_len_wr)])?;
            } else if hdr.host_status != 0 || (hdr.driver_status & 0x0f) != 0 {
                log::error!(
                    "Transport failure (host 0x{:x}, driver 0x{:x})",
                    hdr.host_status,
                    hdr.driver_status
                );
                return Err(ScanError::IO);
            }
        }

        let received = if direction == SG_DXFER_FROM_DEV {
            dxfer_len.saturating_sub(hdr.resid.max(0) as usize)
        } else {
            0
        };

        Ok(received)
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            log::trace!("Call close('{}')", self.path.display());
        }
    }
}

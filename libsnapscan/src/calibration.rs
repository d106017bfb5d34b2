//! Quality calibration: read reference lines, average them and send the result back.

use crate::{
    channel::{exec, exec_read, SharedChannel},
    codec::{self, dtc, ReadKind},
    options::{Mode, Source},
    quirks::ModelQuirks,
    result::alloc_buffer,
    Result, ScanError,
};

const GENERIC_LINES: usize = 16;
const EPSON_LINES: usize = 48;
const EPSON_BLACK_LINES: usize = 128;

/// Scan settings calibration depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationSetup {
    pub mode: Mode,
    pub source: Source,
    pub resolution: u16,
    pub optical_resolution: u16,
    pub scan_depth: u8,
    pub phys_buf_sz: usize,
}

impl CalibrationSetup {
    fn line_len(&self, quirks: &ModelQuirks) -> usize {
        let pixels = quirks.calibration_line_pixels(self.optical_resolution);
        if self.mode.is_colour() {
            3 * pixels
        } else {
            pixels
        }
    }
}

pub(crate) fn calibrate(
    channel: &SharedChannel,
    quirks: &ModelQuirks,
    setup: &CalibrationSetup,
) -> Result<()> {
    if quirks.epson_calibration {
        return calibrate_epson(channel, setup);
    }

    if quirks.static_calibration {
        // The factory table for this model is not shipped; the scanner's own defaults apply.
        log::warn!("No calibration table for {}, skipping calibration", quirks.model);
        return Ok(());
    }

    calibrate_generic(channel, setup.line_len(quirks), setup.phys_buf_sz)
}

fn read_exact(channel: &SharedChannel, cmd: &codec::CommandBlock, buf: &mut [u8]) -> Result<()> {
    let n = exec_read(channel, cmd, buf)?;
    if n != buf.len() {
        log::error!("Read {n} of {} calibration bytes", buf.len());
        return Err(ScanError::IO);
    }
    Ok(())
}

fn calibrate_generic(channel: &SharedChannel, line_len: usize, phys_buf_sz: usize) -> Result<()> {
    if line_len == 0 {
        return Ok(());
    }

    let lines = (phys_buf_sz / line_len).min(GENERIC_LINES);
    if lines == 0 {
        log::error!("Calibration line of {line_len} bytes exceeds the transfer buffer");
        return Err(ScanError::IO);
    }

    log::debug!("Reading {lines} calibration lines of {line_len} bytes");

    let mut buf = alloc_buffer(lines * line_len)?;
    let cmd = codec::read(ReadKind::Calibration, buf.len() as u32, lines as u8);
    read_exact(channel, &cmd, &mut buf)?;

    let averages: Vec<u8> = (0..line_len)
        .map(|c| {
            let sum: usize = buf.iter().skip(c).step_by(line_len).map(|&v| usize::from(v)).sum();
            (sum / lines) as u8
        })
        .collect();

    exec(channel, &codec::send_long(dtc::CALIBRATION, 1, averages)?)
}

/// Epson 2480/3490 calibration.
///
/// The hardware returns `bins` samples per line. Their per-bin averages go back as a
/// running difference, first for the white reference and, with the transparency unit,
/// a second time for the black one.
fn calibrate_epson(channel: &SharedChannel, setup: &CalibrationSetup) -> Result<()> {
    let pixels = usize::from(setup.optical_resolution) * 17 / 4;

    let mut bins = pixels;
    if setup.mode.is_colour() {
        bins *= 3;
    }
    if setup.resolution >= setup.optical_resolution {
        bins *= 2;
    }
    let bytes_per_bin = if setup.scan_depth == 16 { 2 } else { 1 };
    let line_len = bins * bytes_per_bin;
    let lines_per_read = (pixels * 3 * 4 / line_len).max(1);

    let mut passes = vec![(ReadKind::Calibration, EPSON_LINES)];
    if setup.source == Source::Tpo {
        passes.push((ReadKind::CalibrationBlack, EPSON_BLACK_LINES));
    }

    let mut buf = alloc_buffer(lines_per_read * line_len)?;
    for (kind, lines) in passes {
        log::debug!("Epson calibration pass {kind:?}: {lines} lines of {bins} bins");

        let mut sums = vec![0usize; bins];
        let mut done = 0;
        while done < lines {
            let chunk = lines_per_read.min(lines - done);
            let data = &mut buf[..chunk * line_len];

            let cmd = codec::read(kind, data.len() as u32, lines as u8);
            read_exact(channel, &cmd, data)?;

            for line in data.chunks_exact(line_len) {
                for (sum, sample) in sums.iter_mut().zip(line.chunks_exact(bytes_per_bin)) {
                    *sum += sample
                        .iter()
                        .rev()
                        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
                }
            }
            done += chunk;
        }

        let averages: Vec<usize> = sums
            .into_iter()
            .map(|sum| {
                let avg = sum / lines;
                if bytes_per_bin == 2 {
                    avg / 64
                } else {
                    avg
                }
            })
            .collect();

        let payload = delta_encode(&averages, setup.mode.is_colour());
        exec(channel, &codec::send_long(kind.code(), 0, payload)?)?;
    }

    Ok(())
}

/// Running differences of the bin averages, interleaved per pixel for colour, padded to a
/// multiple of 256 bytes.
fn delta_encode(averages: &[usize], colour: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(averages.len().next_multiple_of(256));

    if colour {
        let third = averages.len() / 3;
        let mut last = [0usize; 3];
        for k in 0..third {
            for (c, prev) in last.iter_mut().enumerate() {
                let value = averages[k + c * third];
                out.push(value.wrapping_sub(*prev) as u8);
                *prev = value;
            }
        }
    } else {
        let mut prev = 0usize;
        for &value in averages {
            out.push(value.wrapping_sub(prev) as u8);
            prev = value;
        }
    }

    out.resize(averages.len().next_multiple_of(256), 0);
    out
}

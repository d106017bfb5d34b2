//! Dispersed-dot halftone matrices.

use crate::{
    channel::{exec, SharedChannel},
    codec::{self, dtc},
    options::{Dither, Mode, ScanOptions},
    Result,
};

const D2: [u8; 4] = [0, 2, 3, 1];

/// Builds the `n`x`n` dispersed-dot matrix (row-major) from the one half its size.
///
/// `n` must be a power of two no smaller than 2.
pub fn dispersed_dot(n: usize) -> Vec<u8> {
    assert!(n >= 2 && n.is_power_of_two() && n <= 16);

    if n == 2 {
        return D2.to_vec();
    }

    let half = n / 2;
    let smaller = dispersed_dot(half);

    let mut matrix = Vec::with_capacity(n * n);
    for y in 0..n {
        for x in 0..n {
            let coarse = D2[(2 * y / n) * 2 + 2 * x / n];
            let fine = smaller[(y % half) * half + x % half];
            matrix.push(coarse + 4 * fine);
        }
    }
    matrix
}

/// Matrix as the hardware expects it. The 8x8 matrix is spread over the full byte range.
pub fn matrix(dither: Dither) -> Vec<u8> {
    match dither {
        Dither::Dd8x8 => dispersed_dot(8).into_iter().map(|v| 4 * v + 2).collect(),
        Dither::Dd16x16 => dispersed_dot(16),
    }
}

fn halftone_qualifier(dither: Dither, colour: bool) -> u8 {
    match (dither, colour) {
        (Dither::Dd8x8, false) => 0x00,
        (Dither::Dd8x8, true) => 0x01,
        (Dither::Dd16x16, false) => 0x80,
        (Dither::Dd16x16, true) => 0x81,
    }
}

/// Sends the halftone matrix when a halftoned bilevel scan was asked for. Colour scans get
/// one copy per band.
pub(crate) fn download_halftone(channel: &SharedChannel, options: &ScanOptions) -> Result<()> {
    let mode = options.actual_mode();
    if !options.halftone || !mode.is_bilevel() {
        return Ok(());
    }

    let matrix = matrix(options.dither);
    let colour = mode == Mode::BilevelColor;
    let payload = if colour {
        matrix.repeat(3)
    } else {
        matrix
    };

    log::debug!("Sending {} halftone matrix, {} bytes", options.dither, payload.len());

    let cmd = codec::send(dtc::HALFTONE, halftone_qualifier(options.dither, colour), payload)?;
    exec(channel, &cmd)
}

//! Gamma tables and their download.

use crate::{
    channel::{exec, SharedChannel},
    codec::{self, dtc},
    options::{Mode, ScanOptions},
    quirks::{GammaResend, ModelQuirks},
    Result, ScanError,
};

/// Encoding of one gamma table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// One byte per entry.
    Eight,
    /// Little-endian 16-bit entries.
    Sixteen,
    /// Little-endian 16-bit entries mapping every level onto itself.
    Identity16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Gray = 0,
    Red = 1,
    Green = 2,
    Blue = 3,
}

/// How tables are laid out for a converter depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    /// Converter bits; the table has `1 << bits` entries.
    pub bits: u8,
    pub format: TableFormat,
    /// Qualifier of the grey table; colour tables follow it.
    base_qualifier: u8,
}

impl TableLayout {
    /// Layout for a converter depth and the depth samples are delivered in.
    pub fn new(bits: u8, scan_depth: u8, film_scanner: bool) -> Self {
        let (base_qualifier, format) = match bits {
            10 => (0x80, TableFormat::Eight),
            12 if film_scanner => (0xa0, TableFormat::Identity16),
            12 => (0x90, TableFormat::Eight),
            14 if scan_depth == 16 => (0xa5, TableFormat::Sixteen),
            14 => (0x95, TableFormat::Eight),
            _ => (0x00, TableFormat::Eight),
        };

        Self {
            bits,
            format,
            base_qualifier,
        }
    }

    pub fn qualifier(&self, channel: Channel) -> u8 {
        self.base_qualifier + channel as u8
    }

    pub fn entries(&self) -> usize {
        1 << self.bits
    }
}

/// Computes a table from a gamma value, brightness and contrast (both in percent).
pub fn gamma_table(gamma: f64, brightness: f64, contrast: f64, layout: TableLayout) -> Vec<u8> {
    let entries = layout.entries();
    let max = (entries - 1) as f64;
    let mid = max / 2.0;
    let inv_gamma = 1.0 / gamma;

    let entry_len = if layout.format == TableFormat::Eight { 1 } else { 2 };
    let mut table = Vec::with_capacity(entries * entry_len);

    for i in 0..entries {
        let level = ((i as f64 - mid) * (1.0 + contrast / 100.0)
            + (1.0 + brightness / 100.0) * mid)
            .clamp(0.0, max);
        let curve = (level / max).powf(inv_gamma);

        match layout.format {
            TableFormat::Eight => {
                table.push((255.0 * curve + 0.5).clamp(0.0, 255.0) as u8);
            }
            TableFormat::Sixteen => {
                let value = (65535.0 * curve + 0.5).clamp(0.0, 65535.0) as u16;
                table.extend_from_slice(&value.to_le_bytes());
            }
            TableFormat::Identity16 => {
                table.extend_from_slice(&(i as u16).to_le_bytes());
            }
        }
    }

    table
}

/// Encodes a user supplied table of 16-bit values.
pub fn custom_table(values: &[u16], layout: TableLayout) -> Result<Vec<u8>> {
    if values.len() != layout.entries() {
        log::error!(
            "Custom gamma table has {} entries, expected {}",
            values.len(),
            layout.entries()
        );
        return Err(ScanError::Inval);
    }

    let table = match layout.format {
        TableFormat::Eight => values.iter().map(|&v| (v >> 8) as u8).collect(),
        TableFormat::Sixteen | TableFormat::Identity16 => {
            values.iter().flat_map(|v| v.to_le_bytes()).collect()
        }
    };
    Ok(table)
}

fn send_table(
    channel: &SharedChannel,
    quirks: &ModelQuirks,
    qualifier: u8,
    table: Vec<u8>,
) -> Result<()> {
    let second = match quirks.gamma_resend {
        GammaResend::None => None,
        GammaResend::Same => Some(codec::send(dtc::GAMMA, qualifier, table.clone())?),
        GammaResend::Gamma2 => Some(codec::send(dtc::GAMMA2, qualifier, table.clone())?),
    };

    exec(channel, &codec::send(dtc::GAMMA, qualifier, table)?)?;
    if let Some(cmd) = second {
        exec(channel, &cmd)?;
    }
    Ok(())
}

/// Sends the grey table, or the three colour tables, for the current options.
pub(crate) fn download_gamma_tables(
    channel: &SharedChannel,
    quirks: &ModelQuirks,
    options: &ScanOptions,
    layout: TableLayout,
) -> Result<()> {
    let mode = options.actual_mode();

    let mut gray = options.gamma_gray;
    let (mut r, mut g, mut b) = if options.gamma_bind {
        (gray, gray, gray)
    } else {
        (options.gamma_r, options.gamma_g, options.gamma_b)
    };

    match mode {
        Mode::BilevelColor if !options.halftone => (r, g, b) = (1.0, 1.0, 1.0),
        Mode::Lineart if !options.halftone => gray = 1.0,
        _ => {}
    }

    log::debug!(
        "Sending {:?} gamma tables for {} bit converter",
        layout.format,
        layout.bits
    );

    let table = |gamma: f64, custom: Option<&Vec<u16>>| match custom {
        Some(values) => custom_table(values, layout),
        None => Ok(gamma_table(gamma, options.brightness, options.contrast, layout)),
    };

    let custom = options.custom_gamma.as_ref();
    if !mode.is_colour() {
        let gray_table = table(gray, custom.map(|c| &c.gray))?;
        return send_table(channel, quirks, layout.qualifier(Channel::Gray), gray_table);
    }

    let channels = [
        (Channel::Red, r, custom.map(|c| if options.gamma_bind { &c.gray } else { &c.r })),
        (Channel::Green, g, custom.map(|c| if options.gamma_bind { &c.gray } else { &c.g })),
        (Channel::Blue, b, custom.map(|c| if options.gamma_bind { &c.gray } else { &c.b })),
    ];
    for (ch, gamma, custom) in channels {
        send_table(channel, quirks, layout.qualifier(ch), table(gamma, custom)?)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{mock::MockChannel, shared},
        codec::opcode,
        options::CustomGamma,
        quirks::Model,
    };
    use pretty_assertions::assert_eq;

    fn eight() -> TableLayout {
        TableLayout::new(8, 8, false)
    }

    #[test]
    fn linear_table_is_identity() {
        let table = gamma_table(1.0, 0.0, 0.0, eight());
        assert_eq!(table, (0..=255).collect::<Vec<u8>>());
    }

    #[test]
    fn curve_brightness_and_contrast() {
        let t = gamma_table(2.0, 0.0, 0.0, eight());
        assert_eq!([t[0], t[64], t[128], t[255]], [0, 128, 181, 255]);

        let bright = gamma_table(1.0, 100.0, 0.0, eight());
        assert_eq!([bright[0], bright[200]], [128, 255]);

        let steep = gamma_table(1.0, 0.0, 100.0, eight());
        assert_eq!([steep[0], steep[200]], [0, 255]);
    }

    #[test]
    fn layouts() {
        let l = TableLayout::new(14, 16, false);
        assert_eq!(l.format, TableFormat::Sixteen);
        assert_eq!(l.qualifier(Channel::Blue), 0xa8);

        let l = TableLayout::new(14, 8, false);
        assert_eq!(l.format, TableFormat::Eight);
        assert_eq!(l.qualifier(Channel::Gray), 0x95);

        let film = TableLayout::new(12, 12, true);
        assert_eq!(film.format, TableFormat::Identity16);
        assert_eq!(film.qualifier(Channel::Red), 0xa1);

        assert_eq!(TableLayout::new(10, 8, false).qualifier(Channel::Green), 0x82);
    }

    #[test]
    fn sixteen_bit_entries_are_little_endian() {
        let table = gamma_table(1.0, 0.0, 0.0, TableLayout::new(14, 16, false));
        assert_eq!(table.len(), 32768);
        assert_eq!(table[..2], [0, 0]);
        assert_eq!(table[32766..], [0xff, 0xff]);

        let identity = gamma_table(1.8, 0.0, 0.0, TableLayout::new(12, 12, true));
        assert_eq!(identity[2 * 0x123..2 * 0x123 + 2], [0x23, 0x01]);
    }

    #[test]
    fn custom_tables() {
        let values: Vec<u16> = (0..256).map(|i| (i * 256) as u16).collect();
        assert_eq!(custom_table(&values, eight()).unwrap(), (0..=255).collect::<Vec<u8>>());
        assert_eq!(custom_table(&values[..10], eight()), Err(ScanError::Inval));
    }

    #[test]
    fn colour_tables_are_resent_where_needed() {
        let mock = MockChannel::default();
        let channel = shared(mock.clone());
        let quirks = Model::Perfection2480.quirks();

        download_gamma_tables(&channel, &quirks, &ScanOptions::default(), eight()).unwrap();

        let state = mock.state.lock();
        let qualifiers: Vec<u8> = state.commands.iter().map(|c| c[5]).collect();
        assert_eq!(qualifiers, vec![1, 1, 2, 2, 3, 3]);
        assert!(state.commands.iter().all(|c| c[0] == opcode::SEND && c[2] == dtc::GAMMA));
    }

    #[test]
    fn second_table_uses_gamma2() {
        let mock = MockChannel::default();
        let channel = shared(mock.clone());
        let options = ScanOptions {
            mode: Mode::Gray,
            ..Default::default()
        };

        download_gamma_tables(&channel, &Model::Prisa5150.quirks(), &options, eight()).unwrap();

        let dtcs: Vec<u8> = mock.state.lock().commands.iter().map(|c| c[2]).collect();
        assert_eq!(dtcs, vec![dtc::GAMMA, dtc::GAMMA2]);
    }

    #[test]
    fn plain_lineart_is_linear() {
        let mock = MockChannel::default();
        let channel = shared(mock.clone());
        let options = ScanOptions {
            mode: Mode::Lineart,
            gamma_gray: 2.2,
            ..Default::default()
        };

        let quirks = Model::SnapScanE50.quirks();
        download_gamma_tables(&channel, &quirks, &options, eight()).unwrap();

        let state = mock.state.lock();
        assert_eq!(state.payloads.len(), 1);
        assert_eq!(state.payloads[0].1, (0..=255).collect::<Vec<u8>>());
    }

    #[test]
    fn bound_custom_gamma_uses_gray_table() {
        let mock = MockChannel::default();
        let channel = shared(mock.clone());
        let options = ScanOptions {
            gamma_bind: true,
            custom_gamma: Some(CustomGamma {
                gray: vec![0xff00; 256],
                ..Default::default()
            }),
            ..Default::default()
        };

        let quirks = Model::SnapScanE50.quirks();
        download_gamma_tables(&channel, &quirks, &options, eight()).unwrap();

        let state = mock.state.lock();
        assert_eq!(state.payloads.len(), 3);
        assert!(state.payloads.iter().all(|(_, p)| p.iter().all(|&v| v == 0xff)));
    }
}

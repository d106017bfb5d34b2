//! Fixed-layout command blocks and response parsers.
//!
//! Everything here is pure: builders write into freshly zeroed buffers and parsers only read
//! from the slices they are given. Multi-byte integers are big-endian on the wire.

use crate::{Result, ScanError};
use bitflags::bitflags;
use bstr::{BString, ByteSlice};

pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const RESERVE_UNIT: u8 = 0x16;
    pub const RELEASE_UNIT: u8 = 0x17;
    pub const SCAN: u8 = 0x1b;
    pub const SEND_DIAGNOSTIC: u8 = 0x1d;
    pub const SET_WINDOW: u8 = 0x24;
    pub const READ: u8 = 0x28;
    pub const SEND: u8 = 0x2a;
    pub const OBJECT_POSITION: u8 = 0x31;
    pub const GET_DATA_BUFFER_STATUS: u8 = 0x34;
}

/// Data type codes for SEND.
pub mod dtc {
    pub const HALFTONE: u8 = 0x02;
    pub const GAMMA: u8 = 0x03;
    pub const GAMMA2: u8 = 0x04;
    pub const SPEED: u8 = 0x81;
    pub const CALIBRATION: u8 = 0x82;
    pub const FIRMWARE: u8 = 0x87;
    pub const CALIBRATION_BLACK: u8 = 0x89;
}

const SIX_BYTE_CDB: usize = 6;
const TEN_BYTE_CDB: usize = 10;

/// A zeroed byte buffer with typed big-endian field setters.
///
/// Every setter masks its value to the field width, so an oversized value never spills into
/// neighbouring fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields(Vec<u8>);

impl Fields {
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0; len])
    }

    pub fn u8(&mut self, offset: usize, value: u8) -> &mut Self {
        self.0[offset] = value;
        self
    }

    pub fn u16(&mut self, offset: usize, value: u16) -> &mut Self {
        self.be(offset, 2, value.into())
    }

    pub fn u24(&mut self, offset: usize, value: u32) -> &mut Self {
        self.be(offset, 3, value)
    }

    pub fn u32(&mut self, offset: usize, value: u32) -> &mut Self {
        self.be(offset, 4, value)
    }

    /// Writes `width` bits of `value` at bit `shift` of the byte at `offset`, leaving the
    /// other bits of that byte untouched.
    pub fn bits(&mut self, offset: usize, shift: u8, width: u8, value: u8) -> &mut Self {
        assert!(width > 0 && shift + width <= 8, "bit field out of byte bounds");

        let mask = (((1u16 << width) - 1) as u8) << shift;
        self.0[offset] = (self.0[offset] & !mask) | ((value << shift) & mask);
        self
    }

    fn be(&mut self, offset: usize, width: usize, value: u32) -> &mut Self {
        for i in 0..width {
            self.0[offset + i] = (value >> (8 * (width - 1 - i))) as u8;
        }
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

pub fn get_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn get_u24(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([0, bytes[offset], bytes[offset + 1], bytes[offset + 2]])
}

pub fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub fn get_bits(byte: u8, shift: u8, width: u8) -> u8 {
    (byte >> shift) & (((1u16 << width) - 1) as u8)
}

/// One hardware command: the CDB, an optional data-out payload and the size of the
/// expected data-in phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBlock {
    pub name: &'static str,
    pub cdb: Vec<u8>,
    pub data_out: Vec<u8>,
    pub data_in_len: usize,
}

impl CommandBlock {
    fn new(name: &'static str, cdb: Fields) -> Self {
        Self {
            name,
            cdb: cdb.into_inner(),
            data_out: Vec::new(),
            data_in_len: 0,
        }
    }

    fn with_data_out(mut self, data: Vec<u8>) -> Self {
        self.data_out = data;
        self
    }

    fn with_data_in(mut self, len: usize) -> Self {
        self.data_in_len = len;
        self
    }

    pub fn opcode(&self) -> u8 {
        self.cdb[0]
    }
}

fn simple(name: &'static str, op: u8) -> CommandBlock {
    let mut cdb = Fields::zeroed(SIX_BYTE_CDB);
    cdb.u8(0, op);
    CommandBlock::new(name, cdb)
}

pub fn test_unit_ready() -> CommandBlock {
    simple("test_unit_ready", opcode::TEST_UNIT_READY)
}

pub fn reserve_unit() -> CommandBlock {
    simple("reserve_unit", opcode::RESERVE_UNIT)
}

pub fn release_unit() -> CommandBlock {
    simple("release_unit", opcode::RELEASE_UNIT)
}

pub fn scan() -> CommandBlock {
    simple("scan", opcode::SCAN)
}

pub fn send_diagnostic() -> CommandBlock {
    let mut cdb = Fields::zeroed(SIX_BYTE_CDB);
    cdb.u8(0, opcode::SEND_DIAGNOSTIC).bits(1, 2, 1, 1);
    CommandBlock::new("send_diagnostic", cdb)
}

pub fn request_sense(len: u8) -> CommandBlock {
    let mut cdb = Fields::zeroed(SIX_BYTE_CDB);
    cdb.u8(0, opcode::REQUEST_SENSE).u8(4, len);
    CommandBlock::new("request_sense", cdb).with_data_in(len.into())
}

pub fn inquiry(len: u8) -> CommandBlock {
    let mut cdb = Fields::zeroed(SIX_BYTE_CDB);
    cdb.u8(0, opcode::INQUIRY).u8(4, len);
    CommandBlock::new("inquiry", cdb).with_data_in(len.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    Image,
    TransferTime,
    Calibration,
    CalibrationBlack,
}

impl ReadKind {
    pub fn code(self) -> u8 {
        match self {
            Self::Image => 0x00,
            Self::TransferTime => 0x80,
            Self::Calibration => dtc::CALIBRATION,
            Self::CalibrationBlack => dtc::CALIBRATION_BLACK,
        }
    }
}

/// READ with a 24-bit transfer length. `qualifier` lands in byte 5 (line count for
/// calibration reads, a model flag for transfer-time reads).
pub fn read(kind: ReadKind, len: u32, qualifier: u8) -> CommandBlock {
    let mut cdb = Fields::zeroed(TEN_BYTE_CDB);
    cdb.u8(0, opcode::READ)
        .u8(2, kind.code())
        .u8(5, qualifier)
        .u24(6, len);
    CommandBlock::new("read", cdb).with_data_in(len as usize & 0xff_ffff)
}

/// Expected SEND payload length for a data type code and qualifier, if the pair is known
/// to have a fixed size.
pub fn send_length(dtc: u8, dtcq: u8) -> Result<Option<usize>> {
    let len = match (dtc, dtcq) {
        (dtc::HALFTONE, 0x00) => 64,
        (dtc::HALFTONE, 0x01) => 3 * 64,
        (dtc::HALFTONE, 0x80) => 256,
        (dtc::HALFTONE, 0x81) => 3 * 256,
        (dtc::HALFTONE, _) => return Err(ScanError::Inval),

        (dtc::GAMMA | dtc::GAMMA2, 0x00..=0x03) => 256,
        (dtc::GAMMA | dtc::GAMMA2, 0x80..=0x83) => 1024,
        (dtc::GAMMA | dtc::GAMMA2, 0x90..=0x93) => 4096,
        (dtc::GAMMA | dtc::GAMMA2, 0x95..=0x98) => 16384,
        (dtc::GAMMA | dtc::GAMMA2, 0xa0..=0xa3) => 8192,
        (dtc::GAMMA | dtc::GAMMA2, 0xa5..=0xa8) => 32768,
        (dtc::GAMMA | dtc::GAMMA2, _) => return Err(ScanError::Inval),

        (dtc::SPEED, _) => 2,
        (dtc::CALIBRATION | dtc::CALIBRATION_BLACK | dtc::FIRMWARE, _) => return Ok(None),
        _ => return Err(ScanError::Inval),
    };

    Ok(Some(len))
}

/// SEND with a 16-bit transfer length (bytes 7..9). The payload length must match the
/// fixed size of the data type.
pub fn send(dtc: u8, dtcq: u8, payload: Vec<u8>) -> Result<CommandBlock> {
    match send_length(dtc, dtcq)? {
        Some(len) if len != payload.len() => {
            log::error!(
                "SEND payload for dtc 0x{dtc:02x}/0x{dtcq:02x} is {} bytes, expected {len}",
                payload.len()
            );
            return Err(ScanError::Inval);
        }
        _ => {}
    }

    if payload.len() > 0xffff {
        return Err(ScanError::Inval);
    }

    let mut cdb = Fields::zeroed(TEN_BYTE_CDB);
    cdb.u8(0, opcode::SEND)
        .u8(2, dtc)
        .u8(5, dtcq)
        .u16(7, payload.len() as u16);
    Ok(CommandBlock::new("send", cdb).with_data_out(payload))
}

/// SEND with a 24-bit transfer length (bytes 6..9), used for calibration data and
/// firmware images.
pub fn send_long(dtc: u8, dtcq: u8, payload: Vec<u8>) -> Result<CommandBlock> {
    if payload.len() > 0xff_ffff {
        return Err(ScanError::Inval);
    }

    let mut cdb = Fields::zeroed(TEN_BYTE_CDB);
    cdb.u8(0, opcode::SEND)
        .u8(2, dtc)
        .u8(5, dtcq)
        .u24(6, payload.len() as u32);
    Ok(CommandBlock::new("send", cdb).with_data_out(payload))
}

pub fn firmware(image: Vec<u8>) -> Result<CommandBlock> {
    send_long(dtc::FIRMWARE, 0, image)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectPosition {
    /// Selects a film frame (absolute position).
    Frame(u8),
    /// Sets the focus point.
    Focus(u16),
}

pub fn object_position(action: ObjectPosition) -> CommandBlock {
    let mut cdb = Fields::zeroed(TEN_BYTE_CDB);
    cdb.u8(0, opcode::OBJECT_POSITION);
    match action {
        ObjectPosition::Frame(frame) => cdb.u8(1, 2).u8(4, frame),
        ObjectPosition::Focus(focus) => cdb.u8(1, 4).u16(3, focus),
    };
    CommandBlock::new("object_position", cdb)
}

pub const DATA_BUFFER_STATUS_LEN: usize = 12;

pub fn get_data_buffer_status(wait: bool) -> CommandBlock {
    let mut cdb = Fields::zeroed(TEN_BYTE_CDB);
    cdb.u8(0, opcode::GET_DATA_BUFFER_STATUS)
        .bits(1, 0, 1, wait.into())
        .u16(7, DATA_BUFFER_STATUS_LEN as u16);
    CommandBlock::new("get_data_buffer_status", cdb).with_data_in(DATA_BUFFER_STATUS_LEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBufferStatus {
    pub window_id: u8,
    pub available: u32,
}

impl DataBufferStatus {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DATA_BUFFER_STATUS_LEN {
            return Err(ScanError::Inval);
        }

        Ok(Self {
            window_id: bytes[4],
            available: get_u24(bytes, 9),
        })
    }
}

/// Image composition codes of the window descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Composition {
    Lineart = 0x00,
    LineartHalftone = 0x01,
    Gray = 0x02,
    BilevelColor = 0x03,
    BilevelColorHalftone = 0x04,
    Color = 0x05,
}

impl Composition {
    pub fn is_bilevel(self) -> bool {
        !matches!(self, Self::Gray | Self::Color)
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OperationMode: u8 {
        const NoHighQuality = 0x80;
        const NoPreview = 0x40;
        const Adf = 0x10;
        const Tpo = 0x08;
        const Focusing = 0x01;
    }
}

pub const SET_WINDOW_HEADER_LEN: usize = 8;
pub const SET_WINDOW_DESC_LEN: usize = 48;
pub const SET_WINDOW_TRANSFER_LEN: usize = SET_WINDOW_HEADER_LEN + SET_WINDOW_DESC_LEN;

/// Smallest window extent the hardware accepts, in positioning units.
pub const MIN_WINDOW_EXTENT: u32 = 75;

/// Single-window descriptor. Coordinates are in positioning units (dots at the model's
/// positioning resolution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub resolution: u16,
    pub tl_x: u32,
    pub tl_y: u32,
    pub br_x: u32,
    pub br_y: u32,
    pub threshold: u8,
    pub composition: Composition,
    pub bits_per_pixel: u8,
    /// Large buffer mode plus downloaded gamma table number.
    pub extended_fields: bool,
    pub downloaded_gamma: bool,
    pub operation_mode: OperationMode,
}

impl Window {
    /// Origin and extent as sent: degenerate rectangles collapse to the minimal extent
    /// ending at the bottom-right corner.
    pub fn extents(&self) -> (u32, u32, u32, u32) {
        let tl_x = if self.br_x <= self.tl_x {
            self.br_x.saturating_sub(MIN_WINDOW_EXTENT)
        } else {
            self.tl_x
        };
        let tl_y = if self.br_y <= self.tl_y {
            self.br_y.saturating_sub(MIN_WINDOW_EXTENT)
        } else {
            self.tl_y
        };

        let width = (self.br_x - tl_x).max(MIN_WINDOW_EXTENT);
        let length = (self.br_y - tl_y).max(MIN_WINDOW_EXTENT);

        (tl_x, tl_y, width, length)
    }
}

#[rustfmt::skip]
pub fn set_window(window: &Window) -> CommandBlock {
    let mut cdb = Fields::zeroed(TEN_BYTE_CDB);
    cdb.u8(0, opcode::SET_WINDOW).u24(6, SET_WINDOW_TRANSFER_LEN as u32);

    let (tl_x, tl_y, width, length) = window.extents();

    let mut data = Fields::zeroed(SET_WINDOW_TRANSFER_LEN);
    data.u16(6, SET_WINDOW_DESC_LEN as u16);

    let d = SET_WINDOW_HEADER_LEN;
    data.u8(d, 0)
        .u16(d + 2, window.resolution)
        .u16(d + 4, window.resolution)
        .u32(d + 6, tl_x)
        .u32(d + 10, tl_y)
        .u32(d + 14, width)
        .u32(d + 18, length)
        .u8(d + 22, 128)
        .u8(d + 23, window.threshold)
        .u8(d + 24, 128)
        .u8(d + 25, window.composition as u8)
        .u8(d + 26, window.bits_per_pixel)
        .u16(d + 27, 0)
        .bits(d + 29, 7, 1, 0)
        .u16(d + 30, 0)
        .u8(d + 32, 0)
        .u8(d + 33, 0)
        .u8(d + 35, 0x80)
        .u8(d + 42, window.operation_mode.bits())
        .u8(d + 43, 0xff)
        .u8(d + 44, 0xff)
        .u8(d + 45, 0xff);

    if window.extended_fields {
        data.u8(d + 40, 2);
        if window.downloaded_gamma {
            data.u8(d + 41, 1);
        }
    }

    CommandBlock::new("set_window", cdb).with_data_out(data.into_inner())
}

/// Window ids of the per-side, per-channel window layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WindowId {
    FrontBinary = 1,
    BackBinary = 2,
    FrontColor = 3,
    BackColor = 4,
}

impl WindowId {
    pub fn is_binary(self) -> bool {
        matches!(self, Self::FrontBinary | Self::BackBinary)
    }
}

pub const SIDE_WINDOW_DESC_LEN: usize = 64;

/// Geometry of one side window, in 1/1200 inch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideWindow {
    pub id: WindowId,
    pub resolution: u16,
    pub ul_x: u32,
    pub ul_y: u32,
    pub width: u32,
    pub length: u32,
    pub bits_per_pixel: u8,
    pub composition: u8,
}

const BASE_UNITS_PER_INCH: u32 = 1200;
const BINARY_WIDTH_ALIGN: u32 = 32;

impl SideWindow {
    /// Binary windows must span a whole number of 32-pixel groups. The width is rounded
    /// down; callers re-derive pixel counts from the returned window.
    pub fn quantized(mut self) -> Self {
        if self.id.is_binary() && self.resolution > 0 {
            let res = u32::from(self.resolution);
            let mut pixels = self.width * res / BASE_UNITS_PER_INCH;
            pixels -= pixels % BINARY_WIDTH_ALIGN;
            self.width = pixels * BASE_UNITS_PER_INCH / res;
        }
        self
    }

    pub fn pixels_per_line(&self) -> u32 {
        self.width * u32::from(self.resolution) / BASE_UNITS_PER_INCH
    }
}

/// One 64-byte side window descriptor, after width quantization.
pub fn window_descriptor(window: &SideWindow) -> Vec<u8> {
    let window = window.quantized();

    let mut d = Fields::zeroed(SIDE_WINDOW_DESC_LEN);
    d.u8(0, window.id as u8)
        .u16(2, window.resolution)
        .u16(4, window.resolution)
        .u32(6, window.ul_x)
        .u32(10, window.ul_y)
        .u32(14, window.width)
        .u32(18, window.length)
        .u8(25, window.composition)
        .u8(26, window.bits_per_pixel);
    d.into_inner()
}

/// SET WINDOW carrying one descriptor per side window.
pub fn side_windows(windows: &[SideWindow]) -> CommandBlock {
    let total = SET_WINDOW_HEADER_LEN + windows.len() * SIDE_WINDOW_DESC_LEN;

    let mut cdb = Fields::zeroed(TEN_BYTE_CDB);
    cdb.u8(0, opcode::SET_WINDOW).u24(6, total as u32);

    let mut data = Fields::zeroed(SET_WINDOW_HEADER_LEN);
    data.u16(6, SIDE_WINDOW_DESC_LEN as u16);

    let mut data = data.into_inner();
    for window in windows {
        data.extend_from_slice(&window_descriptor(window));
    }

    CommandBlock::new("set_window", cdb).with_data_out(data)
}

/// Minimal inquiry length that still covers the geometry fields.
pub const INQUIRY_MIN_LEN: usize = 56;

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HardwareConfig: u8 {
        const Adc = 0x80;
        const Adf = 0x40;
        const Tpo = 0x20;
        const RingBuffer = 0x10;
        const Halftone16 = 0x08;
        const Halftone8 = 0x04;
        const RowAverage = 0x02;
        const CalibrationAllowed = 0x01;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inquiry {
    pub vendor: BString,
    pub product: BString,
    pub revision: BString,
    pub hardware_config: HardwareConfig,
    pub hardware_status: u8,
    pub model_id: u8,
    pub pixels_per_line: u32,
    pub bytes_per_line: u32,
    pub num_lines: u32,
    pub optical_resolution: u16,
    pub scan_speed: u8,
    /// Exposure time digits, `d1.d2` milliseconds.
    pub exposure: (u8, u8),
    /// Green and blue line lag relative to red, signed.
    pub green_to_red: i8,
    pub blue_to_red: i8,
    pub firmware_date: Option<BString>,
    /// Epson-specific hardware configuration byte.
    pub epson_config: Option<u8>,
}

impl Inquiry {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INQUIRY_MIN_LEN {
            log::error!("Inquiry response is too short: {} bytes", bytes.len());
            return Err(ScanError::Inval);
        }

        let text = |range: std::ops::Range<usize>| BString::from(bytes[range].trim_end());

        Ok(Self {
            vendor: text(8..16),
            product: text(16..32),
            revision: text(32..36),
            hardware_config: HardwareConfig::from_bits_retain(bytes[37]),
            hardware_status: bytes[40],
            model_id: bytes[41],
            pixels_per_line: get_u16(bytes, 42).into(),
            bytes_per_line: get_u16(bytes, 44).into(),
            num_lines: get_u16(bytes, 46).into(),
            optical_resolution: get_u16(bytes, 48),
            scan_speed: bytes[51],
            exposure: (bytes[52], bytes[53]),
            green_to_red: sign_magnitude(bytes[54]),
            blue_to_red: sign_magnitude(bytes[55]),
            firmware_date: (bytes.len() >= 112).then(|| text(96..112)),
            epson_config: bytes.get(138).copied(),
        })
    }

    /// Adds the high byte of the bytes-per-line field some models report at offset 132.
    pub fn with_bytes_per_line_msb(mut self, bytes: &[u8]) -> Self {
        if let Some(&msb) = bytes.get(132) {
            self.bytes_per_line += u32::from(msb) << 16;
        }
        self
    }

    pub fn ms_per_line(&self) -> f64 {
        let exposure = f64::from(self.exposure.0) + f64::from(self.exposure.1) / 10.0;
        exposure * f64::from(self.scan_speed)
    }

    pub fn firmware_missing(&self) -> bool {
        self.hardware_status & 0x02 != 0
    }

    /// Per-channel line offsets (red, green, blue), all non-negative, and their maximum.
    pub fn chroma_offsets(&self) -> ([u32; 3], u32) {
        let g = i32::from(self.green_to_red);
        let b = i32::from(self.blue_to_red);
        let min = g.min(b).min(0);

        let offsets = [(-min) as u32, (g - min) as u32, (b - min) as u32];
        let chroma = offsets.iter().copied().max().unwrap_or(0);

        (offsets, chroma)
    }
}

fn sign_magnitude(byte: u8) -> i8 {
    let magnitude = (byte & 0x7f) as i8;
    if byte & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

pub const IMAGE_HEADER_LEN: usize = 1088;
const IMAGE_HEADER_MIN_LEN: usize = 29;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub total_bytes: u32,
    pub id: u8,
    pub dpi: u16,
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
    pub compression: u8,
}

pub fn read_image_header() -> CommandBlock {
    let mut cdb = Fields::zeroed(TEN_BYTE_CDB);
    cdb.u8(0, opcode::READ)
        .u8(2, 0x81)
        .u24(6, IMAGE_HEADER_LEN as u32);
    CommandBlock::new("read_image_header", cdb).with_data_in(IMAGE_HEADER_LEN)
}

impl ImageHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < IMAGE_HEADER_MIN_LEN {
            log::error!("Image header is too short: {} bytes", bytes.len());
            return Err(ScanError::Inval);
        }

        Ok(Self {
            total_bytes: get_u32(bytes, 4),
            id: bytes[8],
            dpi: get_u16(bytes, 9),
            origin_x: get_u32(bytes, 11),
            origin_y: get_u32(bytes, 15),
            width: get_u32(bytes, 19),
            height: get_u32(bytes, 23),
            bpp: bytes[27],
            compression: bytes[28],
        })
    }

    pub fn bytes_per_line(&self) -> u32 {
        (self.width * u32::from(self.bpp)).div_ceil(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fields_mask_to_width() {
        let mut f = Fields::zeroed(4);
        f.u24(0, 0x1234_5678);
        assert_eq!(f.as_bytes(), &[0x34, 0x56, 0x78, 0x00]);

        let mut f = Fields::zeroed(1);
        f.u8(0, 0b1000_0001).bits(0, 2, 3, 0xff);
        assert_eq!(f.as_bytes(), &[0b1001_1101]);

        f.bits(0, 2, 3, 0b010);
        assert_eq!(f.as_bytes(), &[0b1000_1001]);
        assert_eq!(get_bits(0b1000_1001, 2, 3), 0b010);
    }

    #[test]
    #[should_panic]
    fn bits_must_fit_in_byte() {
        Fields::zeroed(1).bits(0, 6, 3, 1);
    }

    #[test]
    fn fixed_commands() {
        assert_eq!(test_unit_ready().cdb, vec![0x00, 0, 0, 0, 0, 0]);
        assert_eq!(reserve_unit().cdb, vec![0x16, 0, 0, 0, 0, 0]);
        assert_eq!(release_unit().cdb, vec![0x17, 0, 0, 0, 0, 0]);
        assert_eq!(scan().cdb, vec![0x1b, 0, 0, 0, 0, 0]);
        assert_eq!(send_diagnostic().cdb, vec![0x1d, 0x04, 0, 0, 0, 0]);

        let cmd = inquiry(120);
        assert_eq!(cmd.cdb, vec![0x12, 0, 0, 0, 120, 0]);
        assert_eq!(cmd.data_in_len, 120);
    }

    #[test]
    fn read_layout() {
        let cmd = read(ReadKind::TransferTime, 0x01_02_03, 1);
        assert_eq!(cmd.cdb, vec![0x28, 0, 0x80, 0, 0, 1, 0x01, 0x02, 0x03, 0]);
        assert_eq!(cmd.data_in_len, 0x01_02_03);

        let cmd = read(ReadKind::Image, 0, 0);
        assert_eq!(cmd.data_in_len, 0);
    }

    #[test]
    fn send_checks_payload_length() {
        let cmd = send(dtc::GAMMA, 0x80, vec![0; 1024]).unwrap();
        assert_eq!(cmd.cdb, vec![0x2a, 0, 0x03, 0, 0, 0x80, 0, 0x04, 0x00, 0]);
        assert_eq!(cmd.data_out.len(), 1024);

        assert_eq!(send(dtc::GAMMA, 0x80, vec![0; 256]), Err(ScanError::Inval));
        assert_eq!(send(dtc::GAMMA, 0x42, vec![0; 256]), Err(ScanError::Inval));
        assert_eq!(send(dtc::HALFTONE, 0x81, vec![0; 768]).map(|c| c.data_out.len()), Ok(768));
        assert_eq!(send(0x55, 0, vec![]), Err(ScanError::Inval));
    }

    #[test]
    fn firmware_uses_long_length() {
        let cmd = firmware(vec![0xaa; 0x01_0203]).unwrap();
        assert_eq!(cmd.cdb, vec![0x2a, 0, 0x87, 0, 0, 0, 0x01, 0x02, 0x03, 0]);
    }

    fn window() -> Window {
        Window {
            resolution: 300,
            tl_x: 10,
            tl_y: 20,
            br_x: 310,
            br_y: 420,
            threshold: 127,
            composition: Composition::Color,
            bits_per_pixel: 8,
            extended_fields: true,
            downloaded_gamma: true,
            operation_mode: OperationMode::NoPreview,
        }
    }

    #[test]
    fn set_window_layout() {
        let cmd = set_window(&window());
        assert_eq!(cmd.cdb, vec![0x24, 0, 0, 0, 0, 0, 0, 0, 56, 0]);

        let data = &cmd.data_out;
        assert_eq!(data.len(), 56);
        assert_eq!(get_u16(data, 6), 48);

        let d = &data[8..];
        assert_eq!(get_u16(d, 2), 300);
        assert_eq!(get_u16(d, 4), 300);
        assert_eq!(get_u32(d, 6), 10);
        assert_eq!(get_u32(d, 10), 20);
        assert_eq!(get_u32(d, 14), 300);
        assert_eq!(get_u32(d, 18), 400);
        assert_eq!(&d[22..27], &[128, 127, 128, 0x05, 8]);
        assert_eq!(d[35], 0x80);
        assert_eq!(d[40], 2);
        assert_eq!(d[41], 1);
        assert_eq!(d[42], 0x40);
        assert_eq!(&d[43..46], &[0xff, 0xff, 0xff]);
    }

    #[test]
    fn set_window_without_extended_fields() {
        let mut w = window();
        w.extended_fields = false;
        let d = &set_window(&w).data_out[8..];
        assert_eq!(d[40], 0);
        assert_eq!(d[41], 0);
    }

    #[test]
    fn degenerate_window_collapses() {
        let mut w = window();
        w.tl_x = 500;
        w.br_x = 400;
        w.tl_y = 10;
        w.br_y = 50;
        assert_eq!(w.extents(), (325, 10, 75, 75));

        w.tl_x = 100;
        w.br_x = 20;
        assert_eq!(w.extents().0, 0);
        assert_eq!(w.extents().2, 75);
    }

    #[test]
    fn binary_side_window_rounds_down() {
        let window = SideWindow {
            id: WindowId::FrontBinary,
            resolution: 300,
            ul_x: 0,
            ul_y: 0,
            width: 1200 * 8 + 100,
            length: 1200 * 11,
            bits_per_pixel: 1,
            composition: 0,
        };

        let q = window.quantized();
        assert_eq!(q.pixels_per_line() % 32, 0);
        assert_eq!(q.pixels_per_line(), 2400);
        assert!(q.width <= window.width);

        let color = SideWindow {
            id: WindowId::FrontColor,
            ..window
        };
        assert_eq!(color.quantized(), color);

        let cmd = side_windows(&[window, color]);
        assert_eq!(get_u24(&cmd.cdb, 6), 8 + 2 * 64);
        assert_eq!(cmd.data_out[8], 1);
        assert_eq!(get_u32(&cmd.data_out, 8 + 14), q.width);
        assert_eq!(cmd.data_out[8 + 64], 3);
    }

    fn inquiry_bytes() -> Vec<u8> {
        let mut b = vec![0u8; 120];
        b[8..16].copy_from_slice(b"AGFA    ");
        b[16..32].copy_from_slice(b"SNAPSCAN e50    ");
        b[32..36].copy_from_slice(b"1.02");
        b[37] = 0x11;
        b[40] = 0x02;
        b[42..44].copy_from_slice(&2550u16.to_be_bytes());
        b[44..46].copy_from_slice(&7650u16.to_be_bytes());
        b[46..48].copy_from_slice(&3508u16.to_be_bytes());
        b[48..50].copy_from_slice(&600u16.to_be_bytes());
        b[51] = 4;
        b[52] = 2;
        b[53] = 5;
        b[54] = 0x04;
        b[55] = 0x88;
        b
    }

    #[test]
    fn inquiry_fields() {
        let inq = Inquiry::parse(&inquiry_bytes()).unwrap();
        assert_eq!(inq.vendor, "AGFA");
        assert_eq!(inq.product, "SNAPSCAN e50");
        assert_eq!(inq.revision, "1.02");
        assert!(inq.hardware_config.contains(HardwareConfig::RingBuffer));
        assert!(inq.firmware_missing());
        assert_eq!(inq.pixels_per_line, 2550);
        assert_eq!(inq.bytes_per_line, 7650);
        assert_eq!(inq.num_lines, 3508);
        assert_eq!(inq.optical_resolution, 600);
        assert_eq!(inq.green_to_red, 4);
        assert_eq!(inq.blue_to_red, -8);
        assert!((inq.ms_per_line() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn chroma_offsets_are_non_negative() {
        let inq = Inquiry::parse(&inquiry_bytes()).unwrap();
        assert_eq!(inq.chroma_offsets(), ([8, 12, 0], 12));
    }

    #[test]
    fn bytes_per_line_msb() {
        let mut b = inquiry_bytes();
        b.resize(139, 0);
        b[132] = 1;
        let inq = Inquiry::parse(&b).unwrap().with_bytes_per_line_msb(&b);
        assert_eq!(inq.bytes_per_line, 7650 + 0x10000);
        assert_eq!(inq.epson_config, Some(0));
    }

    #[test]
    fn short_inputs_are_rejected() {
        assert_eq!(Inquiry::parse(&[0; 40]), Err(ScanError::Inval));
        assert_eq!(ImageHeader::parse(&[0; 20]), Err(ScanError::Inval));
        assert_eq!(DataBufferStatus::parse(&[0; 4]), Err(ScanError::Inval));
    }

    #[test]
    fn image_header_fields() {
        let mut b = vec![0u8; IMAGE_HEADER_LEN];
        b[4..8].copy_from_slice(&1000u32.to_be_bytes());
        b[8] = 3;
        b[9..11].copy_from_slice(&300u16.to_be_bytes());
        b[11..15].copy_from_slice(&12u32.to_be_bytes());
        b[15..19].copy_from_slice(&34u32.to_be_bytes());
        b[19..23].copy_from_slice(&100u32.to_be_bytes());
        b[23..27].copy_from_slice(&10u32.to_be_bytes());
        b[27] = 1;

        let header = ImageHeader::parse(&b).unwrap();
        assert_eq!(
            header,
            ImageHeader {
                total_bytes: 1000,
                id: 3,
                dpi: 300,
                origin_x: 12,
                origin_y: 34,
                width: 100,
                height: 10,
                bpp: 1,
                compression: 0,
            }
        );
        assert_eq!(header.bytes_per_line(), 13);
        assert_eq!(read_image_header().cdb[2], 0x81);
    }

    #[test]
    fn object_position_layouts() {
        assert_eq!(
            object_position(ObjectPosition::Frame(3)).cdb,
            vec![0x31, 2, 0, 0, 3, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            object_position(ObjectPosition::Focus(0x0123)).cdb,
            vec![0x31, 4, 0, 0x01, 0x23, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn data_buffer_status() {
        let cmd = get_data_buffer_status(true);
        assert_eq!(cmd.cdb[1], 1);
        assert_eq!(get_u16(&cmd.cdb, 7), 12);

        let mut b = [0u8; 12];
        b[4] = 1;
        b[9..12].copy_from_slice(&[0, 0x10, 0]);
        assert_eq!(
            DataBufferStatus::parse(&b),
            Ok(DataBufferStatus {
                window_id: 1,
                available: 0x1000
            })
        );
    }
}

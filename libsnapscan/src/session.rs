//! One open scanner and the state machine a frontend drives it through.

use crate::{
    calibration::{self, CalibrationSetup},
    channel::{exec, exec_read, DeviceChannel, SharedChannel},
    codec::{self, HardwareConfig, Inquiry, ObjectPosition, OperationMode, ReadKind, Window},
    dither, firmware,
    gamma::{self, TableLayout},
    options::{self, Mode, ScanOptions, Source as ScanSource, MM_PER_INCH},
    parameters::Parameters,
    quirks::{Model, ModelQuirks},
    reader::ReaderTask,
    registry,
    result::alloc_buffer,
    source::{build_chain, ChainSpec, ChannelSource, Geometry, RawSource, SampleLayout, Source},
    Result, ScanError,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// How long `cancel` waits for the reader before detaching it.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const IDLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Bus {
    #[default]
    Scsi,
    Usb,
}

/// Static facts about the device behind a channel.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub bus: Bus,
    /// Forces a model instead of detecting it from the inquiry data.
    pub model: Option<Model>,
    /// USB vendor and product id, when the device sits on USB.
    pub usb_id: Option<(u16, u16)>,
    /// Overrides the model's transfer buffer size.
    pub buffer_size: Option<usize>,
    pub firmware: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum State {
    Idle,
    ScanInit,
    Scanning,
    CancelInit,
}

pub struct Session {
    channel: SharedChannel,
    device: DeviceConfig,
    quirks: ModelQuirks,
    options: ScanOptions,
    state: State,

    inquiry: Option<Inquiry>,
    firmware_loaded: bool,
    geometry: Geometry,
    chroma_offsets: [u32; 3],
    /// Largest whole number of lines that fits the transfer buffer.
    buf_sz: usize,

    chain: Option<Box<dyn Source>>,
    reader: Option<ReaderTask>,
    cancelled: Arc<AtomicBool>,
    nonblocking: Arc<AtomicBool>,
    /// A detached reader still owes the unit release and channel close.
    detached: Arc<AtomicBool>,
    cancel_timeout: Duration,

    page_complete: bool,
    /// Feeder batch in progress, the unit stays reserved between pages.
    batch: bool,
    /// A cancel not yet reported through `read`.
    cancel_pending: bool,
}

impl Session {
    /// Identifies the device, runs its self test and uploads firmware if it asks for it.
    pub fn open(
        channel: Box<dyn DeviceChannel>,
        device: DeviceConfig,
        options: ScanOptions,
    ) -> Result<Self> {
        let channel: SharedChannel = Arc::new(Mutex::new(channel));

        let model = match device.model {
            Some(model) => model,
            None => match registry::identify(&channel, device.usb_id) {
                Ok((_, model)) => model,
                Err(err) => {
                    channel.lock().close();
                    return Err(err);
                }
            },
        };

        let quirks = model.quirks();
        options.validate(&quirks)?;

        log::info!("Opening {model} on the {} bus", device.bus);

        let mut session = Self {
            channel,
            device,
            quirks,
            options,
            state: State::Idle,
            inquiry: None,
            firmware_loaded: false,
            geometry: Geometry::default(),
            chroma_offsets: [0; 3],
            buf_sz: 0,
            chain: None,
            reader: None,
            cancelled: Arc::default(),
            nonblocking: Arc::default(),
            detached: Arc::default(),
            cancel_timeout: CANCEL_TIMEOUT,
            page_complete: false,
            batch: false,
            cancel_pending: false,
        };

        let initialized = session.initialize();
        session.close_channel();
        initialized?;

        Ok(session)
    }

    fn initialize(&mut self) -> Result<()> {
        self.wait_ready()?;

        if !self.quirks.skip_self_test {
            exec(&self.channel, &codec::send_diagnostic())?;
        }

        self.inquiry()?;

        let firmware_missing = self.inquiry.as_ref().is_some_and(Inquiry::firmware_missing);
        if self.device.bus == Bus::Usb && firmware_missing {
            self.upload_firmware()?;
        }

        Ok(())
    }

    fn upload_firmware(&mut self) -> Result<()> {
        let Some(path) = self.device.firmware.clone() else {
            log::error!("{} needs a firmware image but none is configured", self.quirks.model);
            return Err(ScanError::Inval);
        };

        firmware::upload(&self.channel, &path, self.quirks.firmware_length)?;
        self.wait_ready()?;

        // Some devices only report their real identity once the firmware runs.
        if self.device.model.is_none() {
            let (_, model) = registry::identify(&self.channel, self.device.usb_id)?;
            if model != self.quirks.model {
                log::info!("Device identifies as {model} after firmware upload");
                self.quirks = model.quirks();
            }
        }

        self.inquiry()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn model(&self) -> Model {
        self.quirks.model
    }

    pub fn quirks(&self) -> &ModelQuirks {
        &self.quirks
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn inquiry_data(&self) -> Option<&Inquiry> {
        self.inquiry.as_ref()
    }

    pub fn set_options(&mut self, options: ScanOptions) -> Result<()> {
        if self.state != State::Idle {
            log::warn!("Options cannot change while the session is {}", self.state);
            return Err(ScanError::DeviceBusy(None));
        }

        options.validate(&self.quirks)?;
        self.options = options;
        Ok(())
    }

    /// Polls the device until it is ready.
    ///
    /// A busy status with a wait hint sleeps for the hint; one without is retried at once.
    /// Transport errors and document feeder trouble end the wait immediately.
    pub fn wait_ready(&self) -> Result<()> {
        let policy = self.quirks.ready_wait;
        let mut last = ScanError::NotReady;

        for attempt in 1..=policy.attempts {
            match exec(&self.channel, &codec::test_unit_ready()) {
                Ok(()) => return Ok(()),
                Err(err @ (ScanError::IO | ScanError::Jammed | ScanError::NoDocs)) => {
                    log::error!("Scanner cannot get ready: {err}");
                    return Err(err);
                }
                Err(ScanError::DeviceBusy(Some(hint))) if policy.sleep_from_hint => {
                    let delay = hint.min(policy.max_sleep);
                    log::info!("Scanner warming up, waiting {delay:?}");
                    thread::sleep(delay);
                    last = ScanError::DeviceBusy(Some(hint));
                }
                Err(err) => {
                    log::debug!("Scanner not ready, attempt {attempt}: {err}");
                    last = err;
                }
            }
        }

        log::error!("Scanner not ready after {} attempts: {last}", policy.attempts);
        Err(last)
    }

    /// Starts a scan, or the next page of a document feeder batch.
    pub fn start(&mut self) -> Result<()> {
        self.cancel_pending = false;

        match self.state {
            State::Idle => {}
            State::Scanning if self.batch && self.page_complete => return self.next_page(),
            State::ScanInit | State::Scanning => {
                log::warn!("Previous page was not read to the end, cancelling it");
                self.cancel();
                self.cancel_pending = false;
            }
            State::CancelInit => return Err(ScanError::DeviceBusy(None)),
        }

        self.page_complete = false;
        self.batch = false;

        self.open_channel()?;
        if let Err(err) = self.wait_ready() {
            self.close_channel();
            return Err(err);
        }

        self.state = State::ScanInit;

        match exec(&self.channel, &codec::reserve_unit()) {
            Ok(()) => {}
            Err(ScanError::DeviceBusy(hint)) => {
                log::error!("Unit is reserved by another initiator");
                self.close_channel();
                self.state = State::Idle;
                return Err(ScanError::DeviceBusy(hint));
            }
            Err(err) => log::warn!("Failed to reserve unit: {err}"),
        }

        if let Err(err) = self.prepare() {
            log::error!("Failed to start scan: {err}");
            self.teardown();
            return Err(err);
        }

        Ok(())
    }

    /// Starts a scan and hands out a reader for its page.
    pub fn scan_page(&mut self) -> Result<PageReader<'_>> {
        self.start()?;
        Ok(PageReader(self))
    }

    fn prepare(&mut self) -> Result<()> {
        let film = self.quirks.film_scanner_12bit;

        if film {
            exec(&self.channel, &codec::object_position(ObjectPosition::Frame(0)))?;
            if let Some(focus) = self.options.focus {
                exec(&self.channel, &codec::object_position(ObjectPosition::Focus(focus)))?;
            }
        }

        self.set_window()?;
        self.inquiry()?;

        let hardware_config = self.hardware_config();
        let scan_depth = self.options.scan_depth(&self.quirks);
        let layout = TableLayout::new(self.quirks.bits_per_sample(hardware_config), scan_depth, film);

        gamma::download_gamma_tables(&self.channel, &self.quirks, &self.options, layout)?;
        dither::download_halftone(&self.channel, &self.options)?;

        let calibrate = self.quirks.calibrates(self.options.quality_cal, hardware_config);
        let epson = self.quirks.model.is_epson();

        if calibrate && epson {
            self.calibrate(scan_depth)?;
        }

        self.measure_transfer_rate()?;

        self.inquiry()?;
        if let Some(inquiry) = &self.inquiry {
            log::debug!(
                "{} bytes per line at {:.2} ms per line",
                self.geometry.bytes_per_line,
                inquiry.ms_per_line()
            );
        }

        if calibrate && !epson {
            self.calibrate(scan_depth)?;
        }

        exec(&self.channel, &codec::scan())?;

        if film {
            let frame = ObjectPosition::Frame(self.options.frame_no);
            exec(&self.channel, &codec::object_position(frame))?;
        }

        if self.options.source == ScanSource::Adf {
            self.wait_ready()?;
        }

        self.arm()
    }

    fn next_page(&mut self) -> Result<()> {
        log::info!("Feeding the next page");

        self.page_complete = false;
        self.state = State::ScanInit;

        if let Err(err) = self.feed_page() {
            if err == ScanError::NoDocs {
                log::info!("Document feeder is empty, batch finished");
            }
            self.teardown();
            return Err(err);
        }

        Ok(())
    }

    fn feed_page(&mut self) -> Result<()> {
        exec(&self.channel, &codec::scan())?;
        self.wait_ready()?;
        self.inquiry()?;
        self.arm()
    }

    /// Reads the inquiry data and derives the transfer geometry from it.
    fn inquiry(&mut self) -> Result<()> {
        let len = self.quirks.inquiry_len(self.firmware_loaded);
        let mut buf = vec![0u8; usize::from(len)];
        let n = exec_read(&self.channel, &codec::inquiry(len), &mut buf)?;
        let bytes = &buf[..n];

        let mut inquiry = Inquiry::parse(bytes)?;
        if self.quirks.bytes_per_line_msb {
            inquiry = inquiry.with_bytes_per_line_msb(bytes);
        }

        if self.device.bus == Bus::Usb && !inquiry.firmware_missing() {
            self.firmware_loaded = true;
        }

        // Colour lag lines only exist in colour scans.
        let colour = self.options.actual_mode().is_colour();
        let (offsets, chroma) = if colour && !self.quirks.zero_chroma {
            inquiry.chroma_offsets()
        } else {
            ([0; 3], 0)
        };

        let chroma = chroma as usize;
        let bytes_per_line = inquiry.bytes_per_line as usize;
        let lines = (inquiry.num_lines as usize).saturating_sub(chroma);

        self.buf_sz = if lines > 0 && bytes_per_line > 0 {
            (self.phys_buf_sz() / bytes_per_line) * bytes_per_line
        } else {
            0
        };

        self.geometry = Geometry {
            bytes_per_line,
            pixels_per_line: inquiry.pixels_per_line as usize,
            lines,
            chroma,
        };
        self.chroma_offsets = offsets;

        log::debug!(
            "Inquiry: {} {} rev {}, {:?}, chroma {offsets:?}",
            inquiry.vendor,
            inquiry.product,
            inquiry.revision,
            self.geometry
        );

        self.inquiry = Some(inquiry);
        Ok(())
    }

    fn set_window(&self) -> Result<()> {
        let opts = &self.options;
        let mode = opts.actual_mode();

        let (tl_x, tl_y, br_x, br_y) = opts.area(self.quirks.model, self.epson_config());
        let factor = f64::from(self.quirks.pos_factor(opts.resolution, self.optical_resolution()));
        let dots = |mm: f64| (factor * mm / MM_PER_INCH) as u32;

        let mut operation_mode = if opts.preview {
            OperationMode::NoHighQuality
        } else {
            OperationMode::NoPreview
        };
        if !opts.high_quality {
            operation_mode |= OperationMode::NoHighQuality;
        }
        if self.quirks.no_preview_bit {
            operation_mode |= OperationMode::NoPreview;
        }
        match opts.source {
            ScanSource::Tpo => operation_mode |= OperationMode::Tpo,
            ScanSource::Adf => operation_mode |= OperationMode::Adf,
            ScanSource::Flatbed => {}
        }

        let window = Window {
            resolution: opts.resolution,
            tl_x: dots(tl_x),
            tl_y: dots(tl_y),
            br_x: dots(br_x),
            br_y: dots(br_y),
            threshold: (255.0 * opts.threshold / 100.0) as u8,
            composition: mode.composition(opts.halftone),
            bits_per_pixel: opts.scan_depth(&self.quirks),
            extended_fields: self.quirks.debug_mode_and_gamma_no,
            downloaded_gamma: mode != Mode::Lineart,
            operation_mode,
        };
        log::debug!("Setting {window:?}");

        let cmd = codec::set_window(&window);
        let mut retries = self.quirks.ready_wait.attempts;
        loop {
            match exec(&self.channel, &cmd) {
                Err(ScanError::DeviceBusy(_)) if retries > 0 => {
                    retries -= 1;
                    log::info!("Waiting for the scanner to warm up");
                    self.wait_ready()?;
                }
                result => return result,
            }
        }
    }

    fn measure_transfer_rate(&self) -> Result<()> {
        let bytes_per_line = self.geometry.bytes_per_line;

        let len = if self.hardware_config().contains(HardwareConfig::RingBuffer) {
            match self.quirks.ring_buffer_read_cap {
                Some(cap) if bytes_per_line == 0 || bytes_per_line > cap => cap,
                Some(cap) => (cap / bytes_per_line) * bytes_per_line,
                None => self.buf_sz.next_multiple_of(128),
            }
        } else {
            bytes_per_line.next_multiple_of(128)
        };

        let qualifier = self.quirks.transtime_qualifier;
        if len > 0 {
            let mut buf = alloc_buffer(len)?;
            let cmd = codec::read(ReadKind::TransferTime, len as u32, qualifier);
            let n = exec_read(&self.channel, &cmd, &mut buf)?;
            log::debug!("Transfer rate probe read {n} of {len} bytes");
        }

        exec(&self.channel, &codec::read(ReadKind::TransferTime, 0, qualifier))
    }

    fn calibrate(&self, scan_depth: u8) -> Result<()> {
        let setup = CalibrationSetup {
            mode: self.options.actual_mode(),
            source: self.options.source,
            resolution: self.options.resolution,
            optical_resolution: self.optical_resolution(),
            scan_depth,
            phys_buf_sz: self.phys_buf_sz(),
        };

        calibration::calibrate(&self.channel, &self.quirks, &setup)
            .inspect_err(|err| log::error!("Calibration failed: {err}"))
    }

    fn chain_spec(&self) -> ChainSpec {
        let layout = if self.options.scan_depth(&self.quirks) <= 8 {
            SampleLayout::Eight
        } else if self.quirks.film_scanner_12bit {
            SampleLayout::Film12In16
        } else {
            SampleLayout::Sixteen
        };

        ChainSpec {
            mode: self.options.actual_mode(),
            negative: self.options.negative,
            deinterlace: self.quirks.deinterlace_at(self.options.resolution),
            deinterlace_lineart: self.quirks.deinterlace_lineart,
            layout,
            chroma_offsets: self.chroma_offsets,
        }
    }

    /// Starts the reader for one page and stacks the chain on top of it.
    fn arm(&mut self) -> Result<()> {
        // A reader detached by an earlier cancel keeps its own flag.
        self.cancelled = Arc::new(AtomicBool::new(false));
        self.nonblocking.store(false, Ordering::SeqCst);

        let raw = RawSource::new(
            self.channel.clone(),
            self.geometry,
            self.phys_buf_sz(),
            self.cancelled.clone(),
        )?;

        let root: Box<dyn Source> = match ReaderTask::spawn(Box::new(raw), self.cancelled.clone()) {
            Ok((reader, rx)) => {
                self.reader = Some(reader);
                Box::new(ChannelSource::new(rx, self.geometry, self.nonblocking.clone()))
            }
            Err(raw) => {
                log::warn!("Reading the device directly, only blocking reads are possible");
                raw
            }
        };

        self.chain = Some(build_chain(root, &self.chain_spec())?);
        Ok(())
    }

    /// Reads image data. `Ok(0)` marks the end of the page.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(ScanError::Inval);
        }

        let state = self.state;
        match state {
            State::Idle if self.cancel_pending => {
                self.cancel_pending = false;
                return Err(ScanError::Cancelled);
            }
            State::Idle if self.page_complete => return Ok(0),
            State::Idle => {
                log::error!("read() called without a scan in progress");
                return Err(ScanError::Inval);
            }
            State::CancelInit => {
                self.state = State::Idle;
                return Err(ScanError::Cancelled);
            }
            State::ScanInit | State::Scanning if self.page_complete => return Ok(0),
            State::ScanInit | State::Scanning => {}
        }

        let nonblocking = self.nonblocking.load(Ordering::SeqCst);
        let Some(chain) = self.chain.as_mut() else {
            return Err(ScanError::Inval);
        };

        let outcome = loop {
            if chain.remaining() == 0 {
                break Ok(0);
            }

            match chain.get(buf) {
                Ok(0) if chain.remaining() > 0 => {
                    if nonblocking {
                        break Err(ScanError::WouldBlock);
                    }
                    thread::sleep(IDLE_POLL);
                }
                Err(ScanError::EOF) => {
                    log::debug!("Hardware reported end of medium");
                    break Ok(0);
                }
                other => break other,
            }
        };
        let drained = chain.remaining() == 0;

        let n = outcome?;
        if n > 0 {
            self.state = State::Scanning;
        }
        if n == 0 || drained {
            self.finish_page();
        }

        Ok(n)
    }

    fn finish_page(&mut self) {
        self.page_complete = true;

        if self.options.source == ScanSource::Adf {
            log::info!("Page complete, feeder batch stays open");
            self.stop_reader(false);
            self.batch = true;
            self.state = State::Scanning;
        } else {
            log::info!("Page complete");
            self.stop_reader(true);
            self.state = State::Idle;
        }
    }

    /// Stops the scan in progress. Does nothing when idle or already cancelling.
    pub fn cancel(&mut self) {
        match self.state {
            State::Idle => return,
            State::CancelInit => {
                log::debug!("Cancellation already in progress");
                return;
            }
            State::ScanInit | State::Scanning => {}
        }

        log::info!("Cancelling scan");
        self.state = State::CancelInit;
        self.teardown();
        self.page_complete = false;
        self.cancel_pending = true;
    }

    /// Output geometry: estimated from the options while idle, as reported by the hardware
    /// while scanning.
    pub fn get_parameters(&self) -> Parameters {
        let mode = self.options.actual_mode();
        let depth = if mode == Mode::Lineart {
            1
        } else if self.quirks.film_scanner_12bit {
            16
        } else if self.options.preview {
            8
        } else {
            self.options
                .bit_depth
                .unwrap_or_else(|| options::supported_bit_depths(self.quirks.model)[0])
        };
        let depth = usize::from(depth);

        if matches!(self.state, State::ScanInit | State::Scanning) {
            let g = &self.geometry;
            let (bytes_per_line, pixels_per_line) = match &self.chain {
                Some(chain) => (chain.bytes_per_line(), chain.pixels_per_line()),
                None if mode == Mode::BilevelColor => (3 * g.pixels_per_line, g.pixels_per_line),
                None => (g.bytes_per_line, g.pixels_per_line),
            };

            return Parameters {
                format: mode.into(),
                last_frame: true,
                bytes_per_line,
                pixels_per_line,
                lines: g.lines,
                depth,
            };
        }

        let (tl_x, tl_y, br_x, br_y) = self.options.area(self.quirks.model, self.epson_config());
        Parameters::estimate(mode, self.options.resolution, br_x - tl_x, br_y - tl_y, depth)
    }

    /// Switches between blocking and non-blocking reads. Only valid before the first read.
    pub fn set_io_mode(&mut self, nonblocking: bool) -> Result<()> {
        if self.state != State::ScanInit {
            return Err(ScanError::Inval);
        }

        if nonblocking && self.reader.is_none() {
            log::info!("No reader task, only blocking reads are possible");
            return Err(ScanError::Unsupported);
        }

        log::debug!("Non-blocking reads {}", if nonblocking { "on" } else { "off" });
        self.nonblocking.store(nonblocking, Ordering::SeqCst);
        Ok(())
    }

    pub fn close(self) {
        log::debug!("Closing {} session", self.quirks.model);
    }

    fn teardown(&mut self) {
        self.stop_reader(true);
        self.batch = false;
        self.state = State::Idle;
    }

    /// Stops the reader. With `release` the unit is released and the channel closed once
    /// the reader is gone, by the reader thread itself if it has to be detached.
    fn stop_reader(&mut self, release: bool) {
        self.cancelled.store(true, Ordering::SeqCst);

        if let Some(mut chain) = self.chain.take() {
            chain.done();
        }

        let reader = self.reader.take();
        if !release {
            if let Some(reader) = reader {
                reader.cancel();
                reader.join(self.cancel_timeout);
            }
            return;
        }

        let channel = self.channel.clone();
        let detached = self.detached.clone();
        let cleanup = move || {
            release_unit(&channel);
            close_channel(&channel);
            detached.store(false, Ordering::SeqCst);
        };

        match reader {
            Some(reader) => {
                reader.cancel();
                self.detached.store(true, Ordering::SeqCst);
                if !reader.join_or_defer(self.cancel_timeout, cleanup) {
                    log::warn!("Reader is stuck in a device call, it releases the unit when that returns");
                }
            }
            None => cleanup(),
        }
    }

    fn open_channel(&self) -> Result<()> {
        if self.detached.load(Ordering::SeqCst) {
            log::error!("Channel is still held by a detached reader");
            return Err(ScanError::DeviceBusy(None));
        }

        let Some(mut channel) = self.channel.try_lock_for(CANCEL_TIMEOUT) else {
            log::error!("Channel is still in use");
            return Err(ScanError::DeviceBusy(None));
        };
        channel.open()
    }

    fn close_channel(&self) {
        if !self.detached.load(Ordering::SeqCst) {
            close_channel(&self.channel);
        }
    }

    fn hardware_config(&self) -> HardwareConfig {
        self.inquiry
            .as_ref()
            .map_or(HardwareConfig::empty(), |inquiry| inquiry.hardware_config)
    }

    fn optical_resolution(&self) -> u16 {
        self.inquiry.as_ref().map_or(0, |inquiry| inquiry.optical_resolution)
    }

    fn epson_config(&self) -> u8 {
        self.inquiry
            .as_ref()
            .and_then(|inquiry| inquiry.epson_config)
            .unwrap_or(0)
    }

    fn phys_buf_sz(&self) -> usize {
        self.device.buffer_size.unwrap_or(self.quirks.phys_buf_sz)
    }
}

fn release_unit(channel: &SharedChannel) {
    let Some(mut channel) = channel.try_lock_for(LOCK_TIMEOUT) else {
        log::warn!("Channel is still in use, unit not released");
        return;
    };

    let cmd = codec::release_unit();
    log::trace!("Call {}(cdb {:02x?})", cmd.name, cmd.cdb);
    if let Err(err) = channel.send(&cmd.cdb, &cmd.data_out, &mut []) {
        log::warn!("Failed to release unit: {err}");
    }
}

fn close_channel(channel: &SharedChannel) {
    match channel.try_lock_for(LOCK_TIMEOUT) {
        Some(mut channel) => channel.close(),
        None => log::warn!("Channel is still in use, leaving it open"),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel();
        self.close_channel();
    }
}

/// One page of a running scan. Dropping it before the page end cancels the scan.
pub struct PageReader<'s>(&'s mut Session);

impl PageReader<'_> {
    pub fn get_parameters(&self) -> Parameters {
        self.0.get_parameters()
    }

    pub fn set_io_mode(&mut self, nonblocking: bool) -> Result<()> {
        self.0.set_io_mode(nonblocking)
    }
}

impl io::Read for PageReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Err(io::ErrorKind::InvalidInput.into());
        }

        match self.0.read(buf) {
            Ok(n) => Ok(n),
            Err(ScanError::EOF) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for PageReader<'_> {
    fn drop(&mut self) {
        if !self.0.page_complete {
            self.0.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        channel::mock::MockChannel,
        codec::{dtc, opcode},
        parameters::FrameFormat,
    };
    use pretty_assertions::assert_eq;
    use std::io::{Read, Write};

    /// A SnapScan e50 with a 100x10 grey page.
    pub(crate) fn inquiry_bytes() -> Vec<u8> {
        let mut b = vec![0u8; 120];
        b[8..16].copy_from_slice(b"AGFA    ");
        b[16..32].copy_from_slice(b"SNAPSCAN e50    ");
        b[32..36].copy_from_slice(b"1.00");
        b[37] = HardwareConfig::RingBuffer.bits();
        b[42..44].copy_from_slice(&100u16.to_be_bytes());
        b[44..46].copy_from_slice(&100u16.to_be_bytes());
        b[46..48].copy_from_slice(&10u16.to_be_bytes());
        b[48..50].copy_from_slice(&600u16.to_be_bytes());
        b[51] = 1;
        b[52] = 1;
        b
    }

    fn gray() -> ScanOptions {
        ScanOptions {
            mode: Mode::Gray,
            ..Default::default()
        }
    }

    fn open(mock: &MockChannel, options: ScanOptions) -> Session {
        Session::open(Box::new(mock.clone()), DeviceConfig::default(), options).unwrap()
    }

    fn read_all(session: &mut Session, step: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; step];
        loop {
            match session.read(&mut buf).unwrap() {
                0 => return out,
                n => out.extend_from_slice(&buf[..n]),
            }
        }
    }

    #[test]
    fn open_identifies_and_closes() {
        let mock = MockChannel::new(inquiry_bytes());
        let session = open(&mock, gray());

        assert_eq!(session.model(), Model::SnapScanE50);
        assert_eq!(session.state(), State::Idle);
        assert!(mock.is_closed());
        assert_eq!(
            mock.opcodes(),
            vec![
                opcode::INQUIRY,
                opcode::TEST_UNIT_READY,
                opcode::SEND_DIAGNOSTIC,
                opcode::INQUIRY
            ]
        );
    }

    #[test]
    fn unknown_devices_are_refused() {
        let mut bytes = inquiry_bytes();
        bytes[16..32].copy_from_slice(b"Mystery Scanner ");
        let mock = MockChannel::new(bytes);

        let result = Session::open(Box::new(mock.clone()), DeviceConfig::default(), gray());
        assert!(matches!(result, Err(ScanError::Unsupported)));
        assert!(mock.is_closed());
    }

    #[test]
    fn start_sequence() {
        let mock = MockChannel::new(inquiry_bytes());
        let mut session = open(&mock, gray());
        mock.state.lock().commands.clear();

        session.start().unwrap();
        assert_eq!(session.state(), State::ScanInit);

        assert_eq!(
            mock.opcodes()[..9],
            [
                opcode::TEST_UNIT_READY,
                opcode::RESERVE_UNIT,
                opcode::SET_WINDOW,
                opcode::INQUIRY,
                opcode::SEND,
                opcode::READ,
                opcode::READ,
                opcode::INQUIRY,
                opcode::SCAN,
            ]
        );

        let state = mock.state.lock();
        // Ring buffer probe: the transfer buffer rounded up to 128 bytes, then an empty read.
        assert_eq!(codec::get_u24(&state.commands[5], 6), 64512);
        assert_eq!(codec::get_u24(&state.commands[6], 6), 0);
        assert_eq!(state.commands[5][2], ReadKind::TransferTime.code());
    }

    #[test]
    fn chunked_transfer_is_reassembled() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 253) as u8).collect();
        let mock = MockChannel::new(inquiry_bytes());
        mock.push_chunks([
            data[..300].to_vec(),
            data[300..600].to_vec(),
            data[600..900].to_vec(),
            data[900..].to_vec(),
        ]);

        let mut session = open(&mock, gray());
        session.start().unwrap();

        assert_eq!(read_all(&mut session, 256), data);
        assert_eq!(session.state(), State::Idle);
        assert_eq!(mock.count(opcode::RELEASE_UNIT), 1);
        assert!(mock.is_closed());

        // The page stays finished until the next start.
        let mut buf = [0u8; 256];
        assert_eq!(session.read(&mut buf), Ok(0));
        assert_eq!(session.read(&mut buf), Ok(0));
    }

    #[test]
    fn read_without_scan_is_invalid() {
        let mock = MockChannel::new(inquiry_bytes());
        let mut session = open(&mock, gray());
        assert_eq!(session.read(&mut [0u8; 16]), Err(ScanError::Inval));
        assert_eq!(session.state(), State::Idle);
    }

    #[test]
    fn cancel_mid_scan() {
        let mock = MockChannel::new(inquiry_bytes());
        // A tenth of the page, the reader keeps polling for the rest.
        mock.push_chunks((0..10).map(|_| vec![0x55; 10]));

        let mut session = open(&mock, gray());
        session.start().unwrap();
        assert_eq!(session.read(&mut [0u8; 4]), Ok(4));
        assert_eq!(session.state(), State::Scanning);

        session.cancel();
        assert_eq!(session.state(), State::Idle);
        assert!(mock.is_closed());
        assert_eq!(mock.count(opcode::RELEASE_UNIT), 1);

        session.cancel();
        assert_eq!(session.read(&mut [0u8; 4]), Err(ScanError::Cancelled));
        assert_eq!(session.read(&mut [0u8; 4]), Err(ScanError::Inval));
    }

    #[test]
    fn cancel_hands_release_to_a_stuck_reader() {
        let mock = MockChannel::new(inquiry_bytes());
        let mut session = open(&mock, gray());
        session.cancel_timeout = Duration::from_millis(50);

        session.start().unwrap();
        mock.state.lock().read_delay = Some(Duration::from_millis(500));
        thread::sleep(Duration::from_millis(100));

        session.cancel();
        assert_eq!(session.state(), State::Idle);
        assert!(!mock.is_closed());
        assert_eq!(session.start(), Err(ScanError::DeviceBusy(None)));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !mock.is_closed() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(mock.is_closed());
        assert_eq!(mock.count(opcode::RELEASE_UNIT), 1);

        mock.state.lock().read_delay = None;
        mock.push_chunks([vec![0x55; 1000]]);
        session.start().unwrap();
        assert_eq!(read_all(&mut session, 256).len(), 1000);
        assert!(mock.is_closed());
    }

    #[test]
    fn wait_ready_gives_up() {
        let mock = MockChannel::new(inquiry_bytes());
        let session = open(&mock, gray());
        mock.state.lock().commands.clear();

        mock.fail(opcode::TEST_UNIT_READY, [ScanError::DeviceBusy(None); 100]);
        assert_eq!(session.wait_ready(), Err(ScanError::DeviceBusy(None)));
        assert_eq!(mock.count(opcode::TEST_UNIT_READY), 20);
    }

    #[test]
    fn wait_ready_honours_hints_and_fatal_errors() {
        let mock = MockChannel::new(inquiry_bytes());
        let session = open(&mock, gray());
        mock.state.lock().commands.clear();

        mock.fail(
            opcode::TEST_UNIT_READY,
            [ScanError::DeviceBusy(Some(Duration::from_millis(10))), ScanError::NotReady],
        );
        assert_eq!(session.wait_ready(), Ok(()));
        assert_eq!(mock.count(opcode::TEST_UNIT_READY), 3);

        mock.fail(opcode::TEST_UNIT_READY, [ScanError::Jammed]);
        assert_eq!(session.wait_ready(), Err(ScanError::Jammed));
        assert_eq!(mock.count(opcode::TEST_UNIT_READY), 4);
    }

    #[test]
    fn reserved_unit_fails_start() {
        let mock = MockChannel::new(inquiry_bytes());
        let mut session = open(&mock, gray());
        mock.fail(opcode::RESERVE_UNIT, [ScanError::DeviceBusy(None)]);

        assert_eq!(session.start(), Err(ScanError::DeviceBusy(None)));
        assert_eq!(session.state(), State::Idle);
        assert_eq!(mock.count(opcode::SET_WINDOW), 0);
        assert!(mock.is_closed());
    }

    #[test]
    fn setup_failure_releases_unit() {
        let mock = MockChannel::new(inquiry_bytes());
        let mut session = open(&mock, gray());
        mock.fail(opcode::SCAN, [ScanError::IO]);

        assert_eq!(session.start(), Err(ScanError::IO));
        assert_eq!(session.state(), State::Idle);
        assert_eq!(mock.count(opcode::RELEASE_UNIT), 1);
        assert!(mock.is_closed());
    }

    #[test]
    fn feeder_batch() {
        let mock = MockChannel::new(inquiry_bytes());
        mock.push_chunks([vec![1; 1000]]);

        let options = ScanOptions {
            source: ScanSource::Adf,
            ..gray()
        };
        let mut session = open(&mock, options);

        session.start().unwrap();
        assert_eq!(read_all(&mut session, 256), vec![1; 1000]);
        assert_eq!(session.state(), State::Scanning);
        assert_eq!(mock.count(opcode::RELEASE_UNIT), 0);
        assert_eq!(session.read(&mut [0u8; 8]), Ok(0));

        mock.push_chunks([vec![2; 1000]]);
        session.start().unwrap();
        assert_eq!(read_all(&mut session, 300), vec![2; 1000]);
        assert_eq!(mock.count(opcode::SCAN), 2);
        assert_eq!(mock.count(opcode::SET_WINDOW), 1);

        mock.fail(opcode::TEST_UNIT_READY, [ScanError::NoDocs]);
        assert_eq!(session.start(), Err(ScanError::NoDocs));
        assert_eq!(session.state(), State::Idle);
        assert_eq!(mock.count(opcode::RELEASE_UNIT), 1);
        assert!(mock.is_closed());
    }

    #[test]
    fn nonblocking_reads() {
        let mock = MockChannel::new(inquiry_bytes());
        let mut session = open(&mock, gray());
        assert_eq!(session.set_io_mode(true), Err(ScanError::Inval));

        session.start().unwrap();
        session.set_io_mode(true).unwrap();
        assert_eq!(session.read(&mut [0u8; 64]), Err(ScanError::WouldBlock));

        mock.push_chunks([vec![7; 1000]]);
        let mut total = 0;
        let mut buf = [0u8; 128];
        for _ in 0..1000 {
            match session.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(ScanError::WouldBlock) => thread::sleep(Duration::from_millis(5)),
                Err(err) => panic!("unexpected {err}"),
            }
        }

        assert_eq!(total, 1000);
        assert_eq!(session.state(), State::Idle);
    }

    #[test]
    fn parameters_follow_the_state() {
        let mock = MockChannel::new(inquiry_bytes());
        mock.push_chunks([vec![0; 1000]]);
        let mut session = open(&mock, gray());

        let estimate = session.get_parameters();
        assert_eq!(estimate.pixels_per_line, 2551);
        assert_eq!(estimate.format, FrameFormat::Gray);
        assert_eq!(estimate.depth, 8);

        let mut page = session.scan_page().unwrap();
        let actual = page.get_parameters();
        assert_eq!(
            (actual.bytes_per_line, actual.pixels_per_line, actual.lines),
            (100, 100, 10)
        );

        let mut image = Vec::new();
        page.read_to_end(&mut image).unwrap();
        assert_eq!(image.len(), actual.total_bytes());
    }

    #[test]
    fn options_are_locked_while_scanning() {
        let mock = MockChannel::new(inquiry_bytes());
        let mut session = open(&mock, gray());
        session.start().unwrap();

        assert_eq!(session.set_options(gray()), Err(ScanError::DeviceBusy(None)));
        session.cancel();
        assert_eq!(session.set_options(gray()), Ok(()));
    }

    #[test]
    fn dropped_page_reader_cancels() {
        let mock = MockChannel::new(inquiry_bytes());
        mock.push_chunks([vec![3; 1000]]);
        let mut session = open(&mock, gray());

        {
            let mut page = session.scan_page().unwrap();
            let mut buf = [0u8; 16];
            assert_eq!(page.read(&mut buf).unwrap(), 16);
            assert_eq!(page.read(&mut []).unwrap_err().kind(), io::ErrorKind::InvalidInput);
        }

        assert_eq!(session.state(), State::Idle);
        assert_eq!(session.read(&mut [0u8; 4]), Err(ScanError::Cancelled));
    }

    #[test]
    fn missing_firmware_is_uploaded() {
        let mut bytes = inquiry_bytes();
        bytes[40] = 0x02;
        let mock = MockChannel::new(bytes);

        let device = DeviceConfig {
            bus: Bus::Usb,
            ..Default::default()
        };
        let result = Session::open(Box::new(mock.clone()), device.clone(), gray());
        assert!(matches!(result, Err(ScanError::Inval)));

        let mut image = vec![0xee; 0x100];
        let at = image.len() - 0x5e;
        image[at..at + 2].copy_from_slice(&0x40u16.to_le_bytes());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&image).unwrap();

        let device = DeviceConfig {
            firmware: Some(file.path().to_owned()),
            ..device
        };
        Session::open(Box::new(mock.clone()), device, gray()).unwrap();

        let state = mock.state.lock();
        let (_, payload) = state
            .payloads
            .iter()
            .find(|(op, payload)| *op == opcode::SEND && payload.len() == 0x40)
            .unwrap();
        assert!(payload.iter().all(|&b| b == 0xee));
        assert!(state
            .commands
            .iter()
            .any(|c| c[0] == opcode::SEND && c[2] == dtc::FIRMWARE));
    }
}

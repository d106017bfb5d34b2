use crate::config::Config;
use anyhow::Context;
use libsnapscan::{FrameFormat, PageReader, ScanError, ScanSource, Session, SgChannel};
use std::{io::Read, thread};
use tokio::sync::{mpsc, oneshot};

const WINDOW_SIZE: usize = 128 * 1024;

pub enum ScanState {
    Prepare,
    Progress(f64),
    Page(RawImage),
    Error(anyhow::Error),
    Cancelled,
}

/// One page as delivered by the session. 16-bit samples are little-endian.
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub format: FrameFormat,
    pub depth: usize,
    pub width: usize,
    pub height: usize,
    pub bytes_per_line: usize,
}

macro_rules! send_state {
    ($tx:expr, $state:expr) => {
        if $tx.blocking_send($state).is_err() {
            log::debug!("State receiver was dropped");
            return Ok(None);
        }
    };
}

macro_rules! check_cancellation {
    ($cancel:expr) => {
        match $cancel.try_recv() {
            Ok(()) => {
                log::debug!("Scan cancelled");
                return Ok(None);
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                log::debug!("Cancel sender was dropped");
                return Ok(None);
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }
    };
}

/// Runs the configured scan on a "scan" thread and reports its progress.
pub fn start(
    config: Config,
    mut cancel: oneshot::Receiver<()>,
) -> anyhow::Result<mpsc::Receiver<ScanState>> {
    let (state_tx, state_rx) = mpsc::channel(4);

    thread::Builder::new()
        .name("scan".to_owned())
        .spawn(move || match scan_pages(&config, &state_tx, &mut cancel) {
            Ok(Some(pages)) => log::info!("Scanned {pages} page(s)"),
            Ok(None) => _ = state_tx.blocking_send(ScanState::Cancelled),
            Err(err) => _ = state_tx.blocking_send(ScanState::Error(err)),
        })
        .context("spawning scan thread")?;

    Ok(state_rx)
}

/// Number of scanned pages, `None` when cancelled.
fn scan_pages(
    config: &Config,
    state: &mpsc::Sender<ScanState>,
    cancel: &mut oneshot::Receiver<()>,
) -> anyhow::Result<Option<usize>> {
    send_state!(state, ScanState::Prepare);

    let device = config.device.device_config()?;
    let path = &config.device.path;
    log::debug!("Use scanner '{}'", path.display());

    check_cancellation!(cancel);
    let channel = SgChannel::open(path)
        .with_context(|| format!("opening device '{}'", path.display()))?;

    check_cancellation!(cancel);
    let mut session = Session::open(Box::new(channel), device, config.scan.clone())
        .context("initializing scanner")?;

    log::info!("Scanning with {}", session.model());

    let batch = config.output.batch && config.scan.source == ScanSource::Adf;
    let mut pages = 0;

    loop {
        check_cancellation!(cancel);

        let reader = match session.scan_page() {
            Ok(reader) => reader,
            Err(ScanError::NoDocs) if pages > 0 => {
                log::info!("Document feeder is empty");
                break;
            }
            Err(err) => return Err(err).context("starting scan"),
        };

        let Some(image) = read_page(reader, state, cancel)? else {
            return Ok(None);
        };

        pages += 1;
        send_state!(state, ScanState::Page(image));

        if !batch {
            break;
        }
    }

    session.close();
    Ok(Some(pages))
}

fn read_page(
    mut reader: PageReader<'_>,
    state: &mpsc::Sender<ScanState>,
    cancel: &mut oneshot::Receiver<()>,
) -> anyhow::Result<Option<RawImage>> {
    let parameters = reader.get_parameters();
    log::debug!("Start page with parameters {parameters:?}");

    let page_size = parameters.total_bytes();
    let mut page = vec![0u8; page_size];
    let mut page_offset = 0;

    send_state!(state, ScanState::Progress(0.0));

    let mut previous_progress = 0.0;
    while page_offset < page_size {
        check_cancellation!(cancel);

        let end = (page_offset + WINDOW_SIZE).min(page_size);
        let read = reader
            .read(&mut page[page_offset..end])
            .context("reading from scanner")?;
        if read == 0 {
            break;
        }
        page_offset += read;

        let progress = page_offset as f64 / page_size as f64 * 100.;
        log::trace!("Scan progress {page_offset} of {page_size} bytes ({progress:.1}%)");

        if progress - previous_progress >= 5.0 {
            send_state!(state, ScanState::Progress(progress));
            previous_progress = progress;
        }
    }

    // Picks up the end of page marker.
    let mut tail = [0u8; 1];
    if page_offset == page_size && page_size > 0 {
        reader.read(&mut tail).context("finishing page")?;
    }

    send_state!(state, ScanState::Progress(100.0));

    let lines = if parameters.bytes_per_line == 0 {
        0
    } else {
        page_offset / parameters.bytes_per_line
    };
    page.truncate(lines * parameters.bytes_per_line);

    log::debug!("Page done, {lines} of {} lines", parameters.lines);

    Ok(Some(RawImage {
        bytes: page,
        format: parameters.format,
        depth: parameters.depth,
        width: parameters.pixels_per_line,
        height: lines,
        bytes_per_line: parameters.bytes_per_line,
    }))
}

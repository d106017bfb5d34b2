//! Background task that drains the chain root into a bounded queue.

use crate::{source::Source, Result};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};

pub const CHUNK_LEN: usize = 4096;
const QUEUE_DEPTH: usize = 32;
const IDLE_SLEEP: Duration = Duration::from_millis(10);
const JOIN_POLL: Duration = Duration::from_millis(20);

pub type Chunks = mpsc::Receiver<Result<Vec<u8>>>;

type Cleanup = Box<dyn FnOnce() + Send>;

enum Exit {
    Running,
    Finished,
    Deferred(Cleanup),
}

pub struct ReaderTask {
    handle: Option<JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
    exit: Arc<Mutex<Exit>>,
}

impl ReaderTask {
    /// Moves `source` onto a thread named "reader". If the thread cannot be created the
    /// source is handed back so the caller can read it directly.
    pub fn spawn(
        source: Box<dyn Source>,
        cancelled: Arc<AtomicBool>,
    ) -> std::result::Result<(Self, Chunks), Box<dyn Source>> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let (source_tx, source_rx) = oneshot::channel::<Box<dyn Source>>();

        let flag = cancelled.clone();
        let exit = Arc::new(Mutex::new(Exit::Running));
        let on_exit = exit.clone();
        let spawned = thread::Builder::new()
            .name("reader".to_owned())
            .spawn(move || {
                if let Ok(source) = source_rx.blocking_recv() {
                    pump(source, tx, &flag);
                }
                finish(&on_exit);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("Failed to start reader thread: {err}");
                return Err(source);
            }
        };

        source_tx.send(source)?;
        log::debug!("Reader started");

        let task = Self {
            handle: Some(handle),
            cancelled,
            exit,
        };
        Ok((task, rx))
    }

    /// Asks the reader to stop at its next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Waits up to `timeout` for the reader to finish. A reader still stuck in a device
    /// call after that is detached; `false` reports that case.
    pub fn join(mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("Reader did not stop within {timeout:?}, detaching it");
                return false;
            }
            thread::sleep(JOIN_POLL);
        }

        if handle.join().is_err() {
            log::error!("Reader thread panicked");
        }
        true
    }

    /// Like [`join`](Self::join), but `cleanup` runs exactly once after the reader is gone:
    /// here when it stops in time, otherwise on the detached thread once its device call
    /// returns. Returns `false` when `cleanup` was left to the detached thread.
    pub fn join_or_defer<F>(self, timeout: Duration, cleanup: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let exit = self.exit.clone();
        if self.join(timeout) {
            cleanup();
            return true;
        }

        let mut exit = exit.lock();
        if let Exit::Finished = *exit {
            drop(exit);
            cleanup();
            return true;
        }

        *exit = Exit::Deferred(Box::new(cleanup));
        false
    }
}

fn finish(exit: &Mutex<Exit>) {
    let exit = std::mem::replace(&mut *exit.lock(), Exit::Finished);
    if let Exit::Deferred(cleanup) = exit {
        log::debug!("Detached reader stopped, running its cleanup");
        cleanup();
    }
}

impl Drop for ReaderTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
        }
    }
}

fn pump(mut source: Box<dyn Source>, tx: mpsc::Sender<Result<Vec<u8>>>, cancelled: &AtomicBool) {
    let mut sent = 0usize;

    loop {
        if cancelled.load(Ordering::SeqCst) {
            log::debug!("Reader cancelled after {sent} bytes");
            break;
        }

        let remaining = source.remaining();
        if remaining == 0 {
            log::debug!("Reader finished, {sent} bytes forwarded");
            break;
        }

        let mut chunk = vec![0u8; CHUNK_LEN.min(remaining)];
        match source.get(&mut chunk) {
            Ok(0) => thread::sleep(IDLE_SLEEP),
            Ok(n) => {
                chunk.truncate(n);
                sent += n;
                if tx.blocking_send(Ok(chunk)).is_err() {
                    log::debug!("Reader queue closed after {sent} bytes");
                    break;
                }
            }
            Err(err) => {
                log::error!("Reader failed after {sent} bytes: {err}");
                _ = tx.blocking_send(Err(err));
                break;
            }
        }
    }

    source.done();
}

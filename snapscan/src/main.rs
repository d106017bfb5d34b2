mod config;
mod output;
mod scan;

use argh::FromArgs;
use config::Config;
use libsnapscan::{DeviceChannel, Registry, SgChannel};
use log::Level;
use scan::ScanState;
use std::{path::PathBuf, process};
use tokio::sync::oneshot;

#[derive(FromArgs)]
/// Scanning frontend for SnapScan-family scanners
struct Args {
    /// path to config
    #[argh(option)]
    config: PathBuf,

    /// enable extra logs
    #[argh(switch)]
    verbose: bool,

    /// probe the configured device, print what it is and exit
    #[argh(switch)]
    list: bool,
}

#[tokio::main]
async fn main() {
    let args: Args = argh::from_env();

    if let Err(err) = simple_logger::init_with_level(if args.verbose {
        Level::Trace
    } else {
        Level::Info
    }) {
        eprintln!("Failed to set up logging: {err}");
    }

    hello(&args);

    let config = match Config::read_from(&args.config) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Failed to read config: {err:#}");
            process::exit(1);
        }
    };

    if args.verbose {
        log::debug!("Use config {config:#?}");
    }

    if args.list {
        list_device(&config);
        return;
    }

    if !run_scan(config).await {
        process::exit(1);
    }
}

fn hello(args: &Args) {
    log::info!(
        "{bin} version {version}, commit {commit}, config from {config_path}, verbose {verbose}",
        bin = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_HASH"),
        config_path = args.config.display(),
        verbose = if args.verbose { "on" } else { "off" },
    );
}

fn open_sg(path: &str) -> libsnapscan::Result<Box<dyn DeviceChannel>> {
    Ok(Box::new(SgChannel::open(path)?))
}

fn list_device(config: &Config) {
    let mut registry = Registry::new();
    let path = config.device.path.to_string_lossy();

    match registry.add(&path, open_sg) {
        Ok(info) => println!(
            "device `{}' is a {} {} {}",
            info.name, info.vendor, info.model, info.kind
        ),
        Err(err) => log::error!("No supported scanner at '{path}': {err}"),
    }
}

/// Scans until done, cancelled with Ctrl-C or failed. Returns `false` on failure.
async fn run_scan(config: Config) -> bool {
    let output = config.output.clone();

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let mut states = match scan::start(config, cancel_rx) {
        Ok(states) => states,
        Err(err) => {
            log::error!("Failed to start scan: {err:#}");
            return false;
        }
    };

    let mut cancel_tx = Some(cancel_tx);
    let mut pages = 0;
    let mut ok = true;

    loop {
        tokio::select! {
            state = states.recv() => {
                let Some(state) = state else {
                    break;
                };

                match state {
                    ScanState::Prepare => log::info!("Preparing scanner"),
                    ScanState::Progress(p) => log::info!("Progress {p:.0}%"),
                    ScanState::Page(image) => {
                        pages += 1;
                        if let Err(err) = output::save(&output, pages, &image) {
                            log::error!("Failed to save page {pages}: {err:#}");
                            ok = false;
                        }
                    }
                    ScanState::Error(err) => {
                        log::error!("Scan failed: {err:#}");
                        ok = false;
                    }
                    ScanState::Cancelled => log::info!("Scan cancelled"),
                }
            }
            _ = tokio::signal::ctrl_c(), if cancel_tx.is_some() => {
                log::info!("Cancelling scan");
                if let Some(tx) = cancel_tx.take() {
                    _ = tx.send(());
                }
            }
        }
    }

    ok
}

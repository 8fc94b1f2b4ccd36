//! Gridwatch
//!
//! Watches a grid of screen regions for announcement text, recognizes it
//! with an external OCR engine and answers each hit with a typed message.

mod automation;
mod cache;
mod capture;
mod config;
mod console;
mod correction;
mod error;
mod grid;
mod logging;
mod monitor;
mod ocr;
mod paths;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select};

use crate::automation::{Automation, LogOnly};
use crate::capture::ScreenCapture;
use crate::config::MonitorConfig;
use crate::monitor::Monitor;
use crate::ocr::TesseractRecognizer;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to config file (defaults to config.json next to the executable)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log triggers instead of clicking and typing
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Save the capture of every trigger under captures/
    #[arg(long)]
    save_captures: bool,

    /// Debug level logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Print every cell's state as JSON on exit
    #[arg(long)]
    print_state: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    paths::ensure_directories().context("failed to create output directories")?;
    logging::init(args.verbose);
    logging::install_panic_hook();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(paths::get_default_config_path);
    let mut config = config::load_config(&config_path)?;
    if args.save_captures {
        config.debug.save_trigger_captures = true;
    }

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let recognizer = TesseractRecognizer::new(&config.recognizer);
    if !recognizer.is_available() {
        log::warn!(
            "Recognizer '{}' did not respond; every scan will fail until it is installed",
            config.recognizer.executable
        );
    }

    let capture = screen_capture()?;
    let automation = automation_for(&config, args.dry_run);

    let monitor = Monitor::new(config, capture, Arc::new(recognizer), automation)?;
    monitor.start()?;

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Failed to set Ctrl+C handler")?;

    let commands = console::spawn_reader()?;
    log::info!("Monitoring. Press Ctrl+C to stop, or type 'help' for commands.");
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(commands) -> command => match command {
                Ok(command) => match console::execute(&monitor, command, &config_path) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => log::error!("{e:#}"),
                },
                // stdin closed; only Ctrl+C can stop us now
                Err(_) => {
                    let _ = stop_rx.recv();
                    break;
                }
            }
        }
    }

    monitor.stop();
    log::info!("Final stats: {}", monitor.stats().summary());
    if args.print_state {
        console::print_state(&monitor)?;
    }
    Ok(())
}

#[cfg(windows)]
fn screen_capture() -> Result<Arc<dyn ScreenCapture>> {
    let capture = capture::GdiCapture::new();
    log::info!("Virtual screen: {}", capture::GdiCapture::virtual_screen());
    Ok(Arc::new(capture))
}

#[cfg(not(windows))]
fn screen_capture() -> Result<Arc<dyn ScreenCapture>> {
    anyhow::bail!("no capture backend for this platform")
}

#[cfg(windows)]
fn automation_for(config: &MonitorConfig, dry_run: bool) -> Arc<dyn Automation> {
    if dry_run {
        Arc::new(LogOnly::new(&config.response))
    } else {
        Arc::new(automation::Responder::new(&config.response))
    }
}

#[cfg(not(windows))]
fn automation_for(config: &MonitorConfig, dry_run: bool) -> Arc<dyn Automation> {
    if !dry_run {
        log::warn!("Input automation is only available on Windows; running dry");
    }
    Arc::new(LogOnly::new(&config.response))
}

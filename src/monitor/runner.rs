//! Thread layout of a running monitor.
//!
//! ```text
//! coordinator ──bounded──▶ capture workers ──bounded──▶ recognition workers
//!      │                         │                             │
//!      └── every cycle           └──────── unbounded ─────────▶ dispatcher
//! ```
//!
//! Shutdown raises the cancel flag, drops the coordinator's sender and lets
//! the disconnect cascade down the pipeline before joining every thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded, unbounded};

use super::pipeline::{CaptureJob, Dispatch, Engine, RecognitionJob};
use super::stats::MonitorStats;
use crate::automation::Automation;
use crate::capture::ScreenCapture;
use crate::config::MonitorConfig;
use crate::correction::TriggerMatch;
use crate::grid::{CellId, CellSnapshot, CellStatus, GridLayout};
use crate::ocr::Recognizer;

const CAPTURE_QUEUE: usize = 256;
const RECOGNITION_QUEUE: usize = 64;

/// Shared stop flag checked by every worker before it touches a cell.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Running {
    cancel: CancelToken,
    shutdown_tx: Sender<()>,
    threads: Vec<JoinHandle<()>>,
    started: Instant,
    capture_workers: usize,
    recognition_workers: usize,
}

/// Handle to the monitoring pipeline. Stopped on drop.
pub struct Monitor {
    engine: Arc<Engine>,
    running: Mutex<Option<Running>>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        capture: Arc<dyn ScreenCapture>,
        recognizer: Arc<dyn Recognizer>,
        automation: Arc<dyn Automation>,
    ) -> Result<Self> {
        let engine = Engine::new(config, capture, recognizer, automation)
            .context("failed to set up monitor")?;
        let monitor = Self {
            engine: Arc::new(engine),
            running: Mutex::new(None),
        };
        monitor.disable_configured(&monitor.engine.config.grid);
        Ok(monitor)
    }

    /// Applies the layout's `disabled_cells` to the current grid.
    fn disable_configured(&self, layout: &GridLayout) {
        for &id in &layout.disabled_cells {
            if !self.set_cell_enabled(id, false) {
                log::warn!("Disabled cell {} is not part of the grid", id);
            }
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    pub fn start(&self) -> Result<()> {
        let mut running = self.running();
        if running.is_some() {
            bail!("monitor is already running");
        }

        // A trigger left pending by an earlier stop never reached its cooldown
        let store = self.engine.grid.current();
        for cell in store.iter() {
            if cell.status() == CellStatus::Triggered {
                cell.set_idle();
            }
        }

        let cancel = CancelToken::new();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (capture_tx, capture_rx) = bounded::<CaptureJob>(CAPTURE_QUEUE);
        let (recognition_tx, recognition_rx) = bounded::<RecognitionJob>(RECOGNITION_QUEUE);
        let (dispatch_tx, dispatch_rx) = unbounded::<Dispatch>();

        let capture_workers = self.engine.capture_pool_size();
        let recognition_workers = self.engine.recognition_pool_size();
        let mut threads = Vec::with_capacity(capture_workers + recognition_workers + 2);

        for index in 0..capture_workers {
            let engine = Arc::clone(&self.engine);
            let rx = capture_rx.clone();
            let recognition_tx = recognition_tx.clone();
            let dispatch_tx = dispatch_tx.clone();
            let cancel = cancel.clone();
            threads.push(spawn(format!("capture-{index}"), move || loop {
                match rx.recv() {
                    Ok(job) => {
                        if let Some(next) = engine.process_capture(job, &dispatch_tx, &cancel) {
                            if recognition_tx.send(next).is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            })?);
        }
        drop(capture_rx);
        drop(recognition_tx);

        for index in 0..recognition_workers {
            let engine = Arc::clone(&self.engine);
            let rx = recognition_rx.clone();
            let dispatch_tx = dispatch_tx.clone();
            let cancel = cancel.clone();
            threads.push(spawn(format!("recognize-{index}"), move || loop {
                match rx.recv() {
                    Ok(job) => engine.process_recognition(job, &dispatch_tx, &cancel),
                    Err(_) => break,
                }
            })?);
        }
        drop(recognition_rx);
        drop(dispatch_tx);

        {
            let engine = Arc::clone(&self.engine);
            let cancel = cancel.clone();
            threads.push(spawn("dispatch".to_string(), move || loop {
                match dispatch_rx.recv() {
                    Ok(dispatch) => engine.complete_dispatch(dispatch, &cancel),
                    Err(_) => break,
                }
            })?);
        }

        let started = Instant::now();
        {
            let engine = Arc::clone(&self.engine);
            let cycle = Duration::from_millis(engine.config.scan.cycle_interval_ms);
            let stats_every = Duration::from_secs(engine.config.debug.stats_interval_secs);
            threads.push(spawn("coordinator".to_string(), move || {
                let mut last_stats = started;
                loop {
                    match shutdown_rx.recv_timeout(cycle) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let now = Instant::now();
                    let queued = engine.run_cycle(&capture_tx, now);
                    if queued > 0 {
                        log::trace!("Cycle queued {} capture(s)", queued);
                    }
                    if !stats_every.is_zero() && now.duration_since(last_stats) >= stats_every {
                        last_stats = now;
                        let stats = collect_stats(
                            &engine,
                            Some((started, capture_workers, recognition_workers)),
                        );
                        log::info!("{}", stats.summary());
                    }
                }
                // capture_tx drops here and the pipeline drains
            })?);
        }

        log::info!(
            "Monitor started: {} cells, {} capture worker(s), {} recognition worker(s), cycle {}ms",
            store.len(),
            capture_workers,
            recognition_workers,
            self.engine.config.scan.cycle_interval_ms
        );

        *running = Some(Running {
            cancel,
            shutdown_tx,
            threads,
            started,
            capture_workers,
            recognition_workers,
        });
        Ok(())
    }

    /// Stops every thread and waits for them. Triggers still queued for the
    /// dispatcher are discarded. No-op when not running.
    pub fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        log::info!("Stopping monitor...");
        running.cancel.cancel();
        let _ = running.shutdown_tx.send(());
        drop(running.shutdown_tx);

        for handle in running.threads {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("Thread {} panicked", name);
            }
        }
        log::info!("Monitor stopped after {}s", running.started.elapsed().as_secs());
    }

    pub fn stats(&self) -> MonitorStats {
        let running = self
            .running()
            .as_ref()
            .map(|r| (r.started, r.capture_workers, r.recognition_workers));
        collect_stats(&self.engine, running)
    }

    /// Replaces the grid and applies the new layout's disabled cells. Jobs
    /// already in the pipeline are discarded as stale.
    pub fn rebuild_grid(&self, layout: &GridLayout) -> Result<u64> {
        let generation = self.engine.rebuild_grid(layout)?;
        self.disable_configured(layout);
        log::info!(
            "Grid rebuilt: generation {}, {} cells",
            generation,
            layout.cell_count()
        );
        Ok(generation)
    }

    /// Returns false if no cell has this id.
    pub fn set_cell_enabled(&self, id: CellId, enabled: bool) -> bool {
        let found = self.engine.grid.current().set_enabled(id, enabled);
        if found && !enabled {
            self.engine.detector.forget(id);
            self.engine.scheduler.forget(id);
        }
        found
    }

    pub fn reset_cell(&self, id: CellId) -> bool {
        self.engine.grid.current().reset(id)
    }

    pub fn reset_all(&self) {
        self.engine.grid.current().reset_all();
    }

    pub fn cell_states(&self) -> Vec<CellSnapshot> {
        self.engine.grid.current().snapshot()
    }

    /// Drops every cached recognition and correction.
    pub fn clear_caches(&self) {
        self.engine.image_cache.clear();
        self.engine.correction_cache.clear();
        log::info!("Caches cleared");
    }

    /// Runs `raw` through the configured correction and trigger matching.
    pub fn check_text(&self, raw: &str) -> (String, Option<TriggerMatch>) {
        let corrector = &self.engine.corrector;
        (corrector.correct(raw), corrector.check_trigger(raw))
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn collect_stats(engine: &Engine, running: Option<(Instant, usize, usize)>) -> MonitorStats {
    let (uptime_secs, capture_workers, recognition_workers) = match running {
        Some((started, capture, recognition)) => (started.elapsed().as_secs(), capture, recognition),
        None => (0, 0, 0),
    };
    MonitorStats {
        running: running.is_some(),
        uptime_secs,
        capture_workers,
        recognition_workers,
        counters: engine.counters.snapshot(),
        grid: engine.grid.current().statistics(),
        scheduler: engine.scheduler.stats(Instant::now()),
        change: engine.detector.stats(),
        image_cache: engine.image_cache.stats(),
        correction_cache: engine.correction_cache.stats(),
    }
}

fn spawn<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .with_context(|| format!("failed to spawn {name} thread"))
}

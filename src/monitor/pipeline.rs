//! The per-cell scan pipeline.
//!
//! capture → change gate → preprocess → fingerprint → image cache or
//! recognizer → correction → trigger match → hand-off to the dispatcher.
//! Every stage works on one cell and never fails the cycle for other cells.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;
use crossbeam_channel::Sender;
use image::{GrayImage, RgbaImage};

use super::change::ChangeDetector;
use super::runner::CancelToken;
use super::scheduler::Scheduler;
use super::stats::{Counters, bump};
use crate::automation::{Automation, TriggerEvent};
use crate::cache::{self, CorrectionCache, Fingerprint, ImageCache};
use crate::capture::ScreenCapture;
use crate::config::{MAX_CAPTURE_WORKERS, MonitorConfig};
use crate::correction::TextCorrector;
use crate::grid::{Cell, CellId, Grid, GridLayout, Rect};
use crate::ocr::{Recognition, Recognizer, prepare_for_recognition};

/// Marks a cell as having a scan outstanding. Dropping it clears the mark,
/// whichever stage the job ends in.
pub(crate) struct ScanTicket {
    cell: Arc<Cell>,
    generation: u64,
}

impl ScanTicket {
    pub fn acquire(cell: &Arc<Cell>, generation: u64) -> Option<Self> {
        cell.try_begin_scan().then(|| Self {
            cell: Arc::clone(cell),
            generation,
        })
    }

    pub fn cell(&self) -> &Arc<Cell> {
        &self.cell
    }
}

impl Drop for ScanTicket {
    fn drop(&mut self) {
        self.cell.end_scan();
    }
}

pub(crate) struct CaptureJob {
    pub ticket: ScanTicket,
}

pub(crate) struct RecognitionJob {
    ticket: ScanTicket,
    capture: RgbaImage,
    prepared: GrayImage,
    fingerprint: Fingerprint,
}

/// A won trigger on its way to the automation boundary.
pub(crate) struct Dispatch {
    pub event: TriggerEvent,
    cell: Arc<Cell>,
    capture: Option<RgbaImage>,
}

/// Everything the workers share.
pub(crate) struct Engine {
    pub config: MonitorConfig,
    pub grid: Grid,
    pub corrector: TextCorrector,
    pub image_cache: ImageCache,
    pub correction_cache: CorrectionCache,
    pub detector: ChangeDetector,
    pub scheduler: Scheduler,
    pub counters: Counters,
    capture: Arc<dyn ScreenCapture>,
    recognizer: Arc<dyn Recognizer>,
    automation: Arc<dyn Automation>,
    cooldown: Duration,
    captures_dir: Option<PathBuf>,
    /// Held for writing by a rebuild and for reading around every per-cell
    /// history write, so no write lands on the wrong generation.
    epoch: RwLock<()>,
}

impl Engine {
    pub fn new(
        config: MonitorConfig,
        capture: Arc<dyn ScreenCapture>,
        recognizer: Arc<dyn Recognizer>,
        automation: Arc<dyn Automation>,
    ) -> Result<Self> {
        config.validate()?;
        let corrector =
            TextCorrector::new(&config.correction).context("invalid correction configuration")?;
        let grid = Grid::new(&config.grid)?;
        let captures_dir = config
            .debug
            .save_trigger_captures
            .then(crate::paths::get_captures_dir);

        Ok(Self {
            grid,
            corrector,
            image_cache: cache::image_cache(&config.cache),
            correction_cache: cache::correction_cache(&config.cache),
            detector: ChangeDetector::new(&config.detection),
            scheduler: Scheduler::new(&config.scan, &config.priority),
            counters: Counters::default(),
            capture,
            recognizer,
            automation,
            cooldown: Duration::from_millis(config.scan.cooldown_ms),
            captures_dir,
            epoch: RwLock::new(()),
            config,
        })
    }

    pub fn capture_pool_size(&self) -> usize {
        self.config.workers.capture_workers.clamp(1, MAX_CAPTURE_WORKERS)
    }

    /// Recognition threads. A recognizer that is not safe to call
    /// concurrently gets exactly one.
    pub fn recognition_pool_size(&self) -> usize {
        if self.recognizer.concurrent_safe() {
            let workers = &self.config.workers;
            workers
                .recognition_workers
                .clamp(1, workers.max_recognition_workers.max(1))
        } else {
            1
        }
    }

    /// One coordinator cycle: expire cooldowns, pick due cells, queue captures.
    /// Returns the number of jobs queued.
    pub fn run_cycle(&self, capture_tx: &Sender<CaptureJob>, now: Instant) -> usize {
        bump(&self.counters.cycles);
        let store = self.grid.current();

        let expired = store.expire_cooldowns(now);
        if expired > 0 {
            log::debug!("{} cell(s) left cooldown", expired);
        }

        let candidates: Vec<CellId> = store
            .iter()
            .filter(|cell| !cell.is_in_flight() && cell.can_be_triggered_at(now))
            .map(|cell| cell.id())
            .collect();

        let mut queued = 0;
        for id in self.scheduler.cells_due(now, &candidates) {
            let Some(cell) = store.get(id) else {
                continue;
            };
            let Some(ticket) = ScanTicket::acquire(cell, store.generation()) else {
                continue;
            };
            match capture_tx.try_send(CaptureJob { ticket }) {
                Ok(()) => {
                    queued += 1;
                    bump(&self.counters.dispatched);
                }
                Err(crossbeam_channel::TrySendError::Full(_)) => {
                    bump(&self.counters.queue_full);
                    break;
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => break,
            }
        }
        queued
    }

    fn is_stale(&self, generation: u64) -> bool {
        if self.grid.is_current(generation) {
            false
        } else {
            bump(&self.counters.stale_discards);
            true
        }
    }

    /// Runs `f` if `generation` is still current. A rebuild cannot happen
    /// between the check and the end of `f`.
    fn while_current<R>(&self, generation: u64, f: impl FnOnce() -> R) -> Option<R> {
        let _epoch = self.epoch.read().unwrap_or_else(|e| e.into_inner());
        if self.is_stale(generation) {
            None
        } else {
            Some(f())
        }
    }

    /// Replaces the grid. Jobs already in the pipeline are discarded as stale
    /// and per-cell scheduling and change history starts over.
    pub fn rebuild_grid(&self, layout: &GridLayout) -> Result<u64> {
        let _epoch = self.epoch.write().unwrap_or_else(|e| e.into_inner());
        let generation = self.grid.rebuild(layout)?;
        self.detector.reset();
        self.scheduler.reset();
        Ok(generation)
    }

    /// Capture stage. Returns a recognition job when the capture is new to
    /// both the change gate and the image cache.
    pub fn process_capture(
        &self,
        job: CaptureJob,
        dispatch_tx: &Sender<Dispatch>,
        cancel: &CancelToken,
    ) -> Option<RecognitionJob> {
        let ticket = job.ticket;
        if cancel.is_cancelled() {
            return None;
        }

        let cell = Arc::clone(ticket.cell());
        let id = cell.id();
        self.while_current(ticket.generation, || {
            self.scheduler.record_scan(id, Instant::now())
        })?;

        let capture = match self.capture.capture(cell.capture_area()) {
            Ok(img) => img,
            Err(e) => {
                bump(&self.counters.capture_errors);
                log::warn!("{}: capture failed: {}", id, e);
                return None;
            }
        };
        bump(&self.counters.captures);

        // The grid may have been rebuilt while the capture ran
        let changed = self.while_current(ticket.generation, || {
            self.detector.should_scan(id, &capture)
        })?;
        if !changed {
            bump(&self.counters.change_skips);
            return None;
        }

        let prepared = prepare_for_recognition(&capture, self.config.recognizer.scale);
        let fingerprint = Fingerprint::of_gray(&prepared);

        if let Some(recognition) = self.image_cache.get(&fingerprint) {
            bump(&self.counters.image_cache_hits);
            log::debug!("{}: image cache hit {}", id, fingerprint);
            self.while_current(ticket.generation, || self.detector.mark_result(id))?;
            self.evaluate(&cell, ticket.generation, &recognition, &capture, dispatch_tx, cancel);
            return None;
        }

        Some(RecognitionJob {
            ticket,
            capture,
            prepared,
            fingerprint,
        })
    }

    /// Recognition stage.
    pub fn process_recognition(
        &self,
        job: RecognitionJob,
        dispatch_tx: &Sender<Dispatch>,
        cancel: &CancelToken,
    ) {
        let RecognitionJob {
            ticket,
            capture,
            prepared,
            fingerprint,
        } = job;
        if cancel.is_cancelled() || self.is_stale(ticket.generation) {
            return;
        }

        let cell = Arc::clone(ticket.cell());
        let id = cell.id();

        let recognition = match self.recognizer.recognize(&prepared) {
            Ok(recognition) => recognition,
            Err(e) => {
                bump(&self.counters.recognition_errors);
                let factor = self.while_current(ticket.generation, || {
                    // Retry this content next time instead of treating it as seen
                    self.detector.forget(id);
                    self.scheduler.record_recognition_failure(id)
                });
                if let Some(factor) = factor {
                    log::warn!("{}: recognition failed (backoff x{}): {}", id, factor, e);
                }
                return;
            }
        };
        bump(&self.counters.recognitions);

        self.image_cache.put(fingerprint, recognition.clone());
        let recorded = self.while_current(ticket.generation, || {
            self.detector.mark_result(id);
            self.scheduler.record_recognition_success(id);
        });
        if recorded.is_none() {
            return;
        }

        if !recognition.text.is_empty() {
            log::debug!(
                "{}: recognized {:?} (confidence {:.1})",
                id,
                recognition.text,
                recognition.confidence
            );
        }

        self.evaluate(&cell, ticket.generation, &recognition, &capture, dispatch_tx, cancel);
    }

    fn corrected(&self, raw: &str) -> String {
        if let Some(corrected) = self.correction_cache.get(&raw.to_string()) {
            return corrected;
        }
        let corrected = self.corrector.correct(raw);
        self.correction_cache.put(raw.to_string(), corrected.clone());
        corrected
    }

    /// Screen position of the first recognized line that contains a trigger.
    fn locate(&self, recognition: &Recognition, area: Rect) -> Option<(i32, i32)> {
        let scale = self.config.recognizer.scale.max(1.0);
        let line = recognition
            .boxes
            .iter()
            .find(|b| self.corrector.match_corrected(&self.corrected(&b.text)).is_some())?;
        let (cx, cy) = line.center();
        Some((
            area.x + (cx as f32 / scale).round() as i32,
            area.y + (cy as f32 / scale).round() as i32,
        ))
    }

    /// Matches recognized text and, if this caller wins the cell's trigger,
    /// hands the event to the dispatcher.
    pub fn evaluate(
        &self,
        cell: &Arc<Cell>,
        generation: u64,
        recognition: &Recognition,
        capture: &RgbaImage,
        dispatch_tx: &Sender<Dispatch>,
        cancel: &CancelToken,
    ) -> bool {
        if cancel.is_cancelled() || self.is_stale(generation) {
            return false;
        }
        if recognition.text.trim().is_empty() {
            return false;
        }

        let corrected = self.corrected(&recognition.text);
        let Some(found) = self.corrector.match_corrected(&corrected) else {
            return false;
        };

        let position = self.locate(recognition, cell.capture_area());
        let now = Instant::now();
        let won = self.while_current(generation, || {
            if !cell.set_triggered(&corrected, position) {
                return false;
            }
            self.scheduler.record_trigger(cell.id(), now);
            true
        });
        if won != Some(true) {
            return false;
        }

        bump(&self.counters.triggers);
        log::info!(
            "{}: trigger {:?} (distance {}) in {:?}",
            cell.id(),
            found.phrase,
            found.distance,
            corrected
        );
        let priority = self.scheduler.priority(cell.id(), now);
        log::debug!(
            "{}: priority {:.2}, next scan in {:?} after cooldown",
            cell.id(),
            priority.score,
            priority.interval
        );

        let event = TriggerEvent {
            cell_id: cell.id(),
            generation,
            bounds: cell.bounds(),
            capture_area: cell.capture_area(),
            text: corrected,
            phrase: found.phrase,
            distance: found.distance,
            position,
            timestamp: Local::now(),
        };
        let dispatch = Dispatch {
            event,
            cell: Arc::clone(cell),
            capture: self.captures_dir.as_ref().map(|_| capture.clone()),
        };

        if let Err(e) = dispatch_tx.send(dispatch) {
            // Dispatcher is gone; still start the cooldown so the cell recovers.
            log::warn!("{}: trigger dropped, dispatcher closed", cell.id());
            e.into_inner().cell.set_cooldown(self.cooldown);
        }
        true
    }

    /// Dispatcher stage: run the action, then start the cooldown whatever
    /// the outcome.
    pub fn complete_dispatch(&self, dispatch: Dispatch, cancel: &CancelToken) {
        let Dispatch {
            event,
            cell,
            capture,
        } = dispatch;
        if cancel.is_cancelled() {
            log::debug!("{}: trigger discarded during shutdown", event.cell_id);
            return;
        }

        match self.automation.perform(&event) {
            Ok(()) => bump(&self.counters.automation_ok),
            Err(e) => {
                bump(&self.counters.automation_errors);
                log::error!("{}: automation failed: {}", event.cell_id, e);
            }
        }
        cell.set_cooldown(self.cooldown);

        if let (Some(dir), Some(img)) = (&self.captures_dir, capture) {
            let name = format!(
                "{}_{}.png",
                event.timestamp.format("%Y%m%d_%H%M%S%.3f"),
                event.cell_id
            );
            let path = dir.join(name);
            match img.save(&path) {
                Ok(()) => {
                    bump(&self.counters.saved_captures);
                    log::debug!("Saved trigger capture {}", path.display());
                }
                Err(e) => log::warn!("Failed to save {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{AutomationError, CaptureError, RecognitionError};
    use crate::grid::CellStatus;
    use crate::ocr::TextBox;
    use crossbeam_channel::{Receiver, bounded, unbounded};
    use image::Rgba;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    pub struct FakeCapture {
        pub value: Mutex<u8>,
        pub fail: AtomicBool,
        pub calls: AtomicUsize,
    }

    impl FakeCapture {
        pub fn new() -> Self {
            Self {
                value: Mutex::new(0),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ScreenCapture for FakeCapture {
        fn capture(&self, rect: Rect) -> Result<RgbaImage, CaptureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CaptureError::RegionUnavailable(rect));
            }
            let v = *self.value.lock().unwrap();
            Ok(RgbaImage::from_pixel(rect.width, rect.height, Rgba([v, v, v, 255])))
        }
    }

    pub struct FakeRecognizer {
        pub text: Mutex<String>,
        pub boxes: Mutex<Vec<TextBox>>,
        pub fail: AtomicBool,
        pub calls: AtomicUsize,
        pub concurrent: bool,
    }

    impl FakeRecognizer {
        pub fn new(text: &str) -> Self {
            Self {
                text: Mutex::new(text.to_string()),
                boxes: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                concurrent: false,
            }
        }
    }

    impl Recognizer for FakeRecognizer {
        fn recognize(&self, _image: &GrayImage) -> Result<Recognition, RecognitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(RecognitionError::Engine("fake failure".to_string()));
            }
            Ok(Recognition {
                text: self.text.lock().unwrap().clone(),
                confidence: 90.0,
                boxes: self.boxes.lock().unwrap().clone(),
            })
        }

        fn concurrent_safe(&self) -> bool {
            self.concurrent
        }
    }

    #[derive(Default)]
    pub struct RecordingAutomation {
        pub events: Mutex<Vec<TriggerEvent>>,
        pub fail: AtomicBool,
    }

    impl Automation for RecordingAutomation {
        fn perform(&self, event: &TriggerEvent) -> Result<(), AutomationError> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail.load(Ordering::SeqCst) {
                return Err(AutomationError::Input("fake failure".to_string()));
            }
            Ok(())
        }
    }

    pub fn small_config(rows: u32, cols: u32) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        let grid = &mut config.grid;
        grid.rows = rows;
        grid.cols = cols;
        grid.capture_height = 20;
        grid.capture_inset_x = 0;
        grid.monitors.truncate(1);
        let monitor = &mut grid.monitors[0];
        (monitor.x, monitor.y) = (0, 0);
        (monitor.width, monitor.height) = (100 * cols, 60 * rows);
        config.recognizer.scale = 1.0;
        config
    }

    pub struct Harness {
        pub engine: Engine,
        pub capture: Arc<FakeCapture>,
        pub recognizer: Arc<FakeRecognizer>,
        pub automation: Arc<RecordingAutomation>,
        pub dispatch_tx: Sender<Dispatch>,
        pub dispatch_rx: Receiver<Dispatch>,
        pub cancel: CancelToken,
    }

    pub fn harness(config: MonitorConfig, text: &str) -> Harness {
        let capture = Arc::new(FakeCapture::new());
        let recognizer = Arc::new(FakeRecognizer::new(text));
        let automation = Arc::new(RecordingAutomation::default());
        let engine = Engine::new(
            config,
            capture.clone(),
            recognizer.clone(),
            automation.clone(),
        )
        .unwrap();
        let (dispatch_tx, dispatch_rx) = unbounded();
        Harness {
            engine,
            capture,
            recognizer,
            automation,
            dispatch_tx,
            dispatch_rx,
            cancel: CancelToken::new(),
        }
    }

    impl Harness {
        fn cell(&self, index: usize) -> Arc<Cell> {
            Arc::clone(self.engine.grid.current().iter().nth(index).unwrap())
        }

        /// Runs one cell through capture and, if needed, recognition.
        fn scan(&self, cell: &Arc<Cell>) {
            let generation = self.engine.grid.generation();
            let ticket = ScanTicket::acquire(cell, generation).unwrap();
            if let Some(job) =
                self.engine
                    .process_capture(CaptureJob { ticket }, &self.dispatch_tx, &self.cancel)
            {
                self.engine
                    .process_recognition(job, &self.dispatch_tx, &self.cancel);
            }
        }

        fn drain_dispatches(&self) -> usize {
            let mut n = 0;
            while let Ok(dispatch) = self.dispatch_rx.try_recv() {
                self.engine.complete_dispatch(dispatch, &self.cancel);
                n += 1;
            }
            n
        }
    }

    #[test]
    fn test_misread_trigger_fires_once_per_cooldown() {
        let h = harness(small_config(1, 1), "홍길동님이 들머왔습니다");
        let cell = h.cell(0);

        h.scan(&cell);
        let dispatch = h.dispatch_rx.try_recv().unwrap();
        assert_eq!(dispatch.event.phrase, "들어왔습니다");
        assert_eq!(dispatch.event.text, "홍길동님이들어왔습니다");
        assert_eq!(cell.status(), CellStatus::Triggered);

        h.engine.complete_dispatch(dispatch, &h.cancel);
        assert_eq!(cell.status(), CellStatus::Cooldown);
        assert!(!cell.is_in_flight());

        // A coordinator cycle inside the cooldown does not pick the cell
        let (capture_tx, capture_rx) = bounded(8);
        assert_eq!(h.engine.run_cycle(&capture_tx, Instant::now()), 0);
        assert!(capture_rx.try_recv().is_err());

        // Identical capture pushed through anyway: no second event
        h.scan(&cell);
        let recognition = Recognition {
            text: "홍길동님이 들머왔습니다".to_string(),
            ..Recognition::default()
        };
        let capture = RgbaImage::new(1, 1);
        assert!(!h.engine.evaluate(
            &cell,
            h.engine.grid.generation(),
            &recognition,
            &capture,
            &h.dispatch_tx,
            &h.cancel
        ));
        assert_eq!(h.drain_dispatches(), 0);
        assert_eq!(h.automation.events.lock().unwrap().len(), 1);
        assert_eq!(cell.trigger_count(), 1);
    }

    #[test]
    fn test_concurrent_evaluations_emit_one_event() {
        const RACERS: usize = 16;
        let h = Arc::new(harness(small_config(1, 1), ""));
        let cell = h.cell(0);
        let generation = h.engine.grid.generation();
        let barrier = Arc::new(Barrier::new(RACERS));

        let handles: Vec<_> = (0..RACERS)
            .map(|_| {
                let h = Arc::clone(&h);
                let cell = Arc::clone(&cell);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let recognition = Recognition {
                        text: "들어왔습니다".to_string(),
                        ..Recognition::default()
                    };
                    let capture = RgbaImage::new(1, 1);
                    barrier.wait();
                    h.engine.evaluate(
                        &cell,
                        generation,
                        &recognition,
                        &capture,
                        &h.dispatch_tx,
                        &h.cancel,
                    )
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(h.dispatch_rx.len(), 1);
        assert_eq!(cell.trigger_count(), 1);
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let h = harness(small_config(1, 2), "들어왔습니다");
        let old_cell = h.cell(0);
        let ticket = ScanTicket::acquire(&old_cell, h.engine.grid.generation()).unwrap();
        let job = h
            .engine
            .process_capture(CaptureJob { ticket }, &h.dispatch_tx, &h.cancel)
            .unwrap();

        h.engine.rebuild_grid(&small_config(2, 2).grid).unwrap();
        h.engine.process_recognition(job, &h.dispatch_tx, &h.cancel);

        assert!(h.dispatch_rx.try_recv().is_err());
        assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.engine.counters.snapshot().stale_discards, 1);
        assert_eq!(old_cell.status(), CellStatus::Idle);
        assert!(!old_cell.is_in_flight());
    }

    #[test]
    fn test_unchanged_capture_skips_recognizer() {
        let h = harness(small_config(1, 1), "아무것도 아님");
        let cell = h.cell(0);
        h.scan(&cell);
        h.scan(&cell);
        h.scan(&cell);

        assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 1);
        let counters = h.engine.counters.snapshot();
        assert_eq!(counters.captures, 3);
        assert_eq!(counters.change_skips, 2);
    }

    #[test]
    fn test_image_cache_shared_between_cells() {
        let h = harness(small_config(1, 2), "아무것도 아님");
        h.scan(&h.cell(0));
        h.scan(&h.cell(1));

        assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.counters.snapshot().image_cache_hits, 1);
        assert_eq!(h.engine.image_cache.stats().hits, 1);
    }

    #[test]
    fn test_capture_failure_releases_cell() {
        let h = harness(small_config(1, 1), "들어왔습니다");
        h.capture.fail.store(true, Ordering::SeqCst);
        let cell = h.cell(0);
        h.scan(&cell);

        assert!(!cell.is_in_flight());
        assert_eq!(h.engine.counters.snapshot().capture_errors, 1);
        assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
        assert!(h.dispatch_rx.try_recv().is_err());
    }

    #[test]
    fn test_recognition_failures_back_off_and_retry() {
        let h = harness(small_config(1, 1), "들어왔습니다");
        h.recognizer.fail.store(true, Ordering::SeqCst);
        let cell = h.cell(0);

        for _ in 0..3 {
            h.scan(&cell);
        }
        // Failed content is never treated as seen
        assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.engine.scheduler.priority(cell.id(), Instant::now()).backoff_factor, 2);

        h.recognizer.fail.store(false, Ordering::SeqCst);
        h.scan(&cell);
        assert_eq!(h.engine.scheduler.priority(cell.id(), Instant::now()).backoff_factor, 1);
        assert_eq!(h.drain_dispatches(), 1);
    }

    #[test]
    fn test_automation_failure_still_starts_cooldown() {
        let h = harness(small_config(1, 1), "들어왔습니다");
        h.automation.fail.store(true, Ordering::SeqCst);
        let cell = h.cell(0);
        h.scan(&cell);
        assert_eq!(h.drain_dispatches(), 1);

        assert_eq!(cell.status(), CellStatus::Cooldown);
        let counters = h.engine.counters.snapshot();
        assert_eq!(counters.automation_errors, 1);
        assert_eq!(counters.automation_ok, 0);
    }

    #[test]
    fn test_cancelled_pipeline_does_not_touch_cells() {
        let h = harness(small_config(1, 1), "들어왔습니다");
        let cell = h.cell(0);
        h.cancel.cancel();
        h.scan(&cell);

        assert_eq!(h.capture.calls.load(Ordering::SeqCst), 0);
        assert_eq!(cell.status(), CellStatus::Idle);
        assert!(!cell.is_in_flight());
    }

    #[test]
    fn test_run_cycle_marks_cells_in_flight() {
        let h = harness(small_config(2, 2), "");
        let (capture_tx, capture_rx) = bounded(16);
        assert_eq!(h.engine.run_cycle(&capture_tx, Instant::now()), 4);
        assert!(h.engine.grid.current().iter().all(|c| c.is_in_flight()));

        // Still in flight: nothing new is queued
        assert_eq!(h.engine.run_cycle(&capture_tx, Instant::now()), 0);

        drop(capture_rx.try_iter().collect::<Vec<_>>());
        assert!(h.engine.grid.current().iter().all(|c| !c.is_in_flight()));
    }

    #[test]
    fn test_disabled_cell_is_never_scheduled() {
        let h = harness(small_config(1, 2), "");
        let store = h.engine.grid.current();
        store.set_enabled(CellId::new(0, 0, 1), false);

        let (capture_tx, capture_rx) = bounded(16);
        assert_eq!(h.engine.run_cycle(&capture_tx, Instant::now()), 1);
        let job = capture_rx.try_recv().unwrap();
        assert_eq!(job.ticket.cell().id(), CellId::new(0, 0, 0));
    }

    fn line(text: &str, left: u32, top: u32, width: u32, height: u32) -> TextBox {
        TextBox {
            text: text.to_string(),
            confidence: 90.0,
            left,
            top,
            width,
            height,
        }
    }

    #[test]
    fn test_trigger_position_maps_box_to_screen() {
        let mut config = small_config(1, 2);
        config.recognizer.scale = 2.0;
        let h = harness(config, "안녕하세요\n홍길동님이 들머왔습니다");
        // Only the second line carries the phrase
        *h.recognizer.boxes.lock().unwrap() = vec![
            line("안녕하세요", 10, 2, 60, 14),
            line("홍길동님이 들머왔습니다", 20, 22, 120, 16),
        ];

        let cell = h.cell(1);
        let area = cell.capture_area();
        assert_eq!(area, Rect::new(100, 40, 100, 20));
        h.scan(&cell);

        let dispatch = h.dispatch_rx.try_recv().unwrap();
        // Box center (80, 30) in the 2x upscaled capture
        assert_eq!(dispatch.event.position, Some((area.x + 40, area.y + 15)));
        assert_eq!(cell.snapshot().detected_position, Some((140, 55)));
    }

    #[test]
    fn test_trigger_position_uses_first_matching_line() {
        let h = harness(small_config(1, 1), "들어왔습니다\n들어왔습니다");
        *h.recognizer.boxes.lock().unwrap() = vec![
            line("들어왔습니다", 4, 0, 40, 8),
            line("들어왔습니다", 50, 10, 40, 8),
        ];
        let cell = h.cell(0);
        h.scan(&cell);

        let dispatch = h.dispatch_rx.try_recv().unwrap();
        assert_eq!(dispatch.event.position, Some((24, 44)));
    }

    #[test]
    fn test_trigger_without_matching_box_has_no_position() {
        let h = harness(small_config(1, 1), "들어왔습니다");
        *h.recognizer.boxes.lock().unwrap() = vec![line("다른 줄", 0, 0, 10, 10)];
        h.scan(&h.cell(0));

        let dispatch = h.dispatch_rx.try_recv().unwrap();
        assert_eq!(dispatch.event.position, None);
    }

    /// Blocks inside `capture` until released.
    struct GatedCapture {
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl ScreenCapture for GatedCapture {
        fn capture(&self, rect: Rect) -> Result<RgbaImage, CaptureError> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Ok(RgbaImage::from_pixel(rect.width, rect.height, Rgba([0, 0, 0, 255])))
        }
    }

    #[test]
    fn test_rebuild_during_capture_leaves_no_history() {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let engine = Arc::new(
            Engine::new(
                small_config(1, 2),
                Arc::new(GatedCapture {
                    entered: entered_tx,
                    release: release_rx,
                }),
                Arc::new(FakeRecognizer::new("들어왔습니다")),
                Arc::new(RecordingAutomation::default()),
            )
            .unwrap(),
        );
        let (dispatch_tx, dispatch_rx) = unbounded();
        let old_cell = Arc::clone(engine.grid.current().get(CellId::new(0, 0, 0)).unwrap());
        let ticket = ScanTicket::acquire(&old_cell, engine.grid.generation()).unwrap();

        let worker = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine
                    .process_capture(CaptureJob { ticket }, &dispatch_tx, &CancelToken::new())
                    .is_some()
            })
        };
        entered_rx.recv().unwrap();
        assert_eq!(engine.rebuild_grid(&small_config(2, 2).grid).unwrap(), 2);
        release_tx.send(()).unwrap();

        assert!(!worker.join().unwrap());
        assert!(dispatch_rx.try_recv().is_err());
        assert_eq!(engine.counters.snapshot().stale_discards, 1);
        assert_eq!(engine.detector.stats().tracked, 0);
        assert_eq!(engine.scheduler.stats(Instant::now()).tracked, 0);
        assert!(!old_cell.is_in_flight());
    }

    #[test]
    fn test_recognition_pool_size() {
        let h = harness(small_config(1, 1), "");
        assert_eq!(h.engine.recognition_pool_size(), 1);

        let mut recognizer = FakeRecognizer::new("");
        recognizer.concurrent = true;
        let mut config = small_config(1, 1);
        config.workers.recognition_workers = 10;
        let engine = Engine::new(
            config,
            Arc::new(FakeCapture::new()),
            Arc::new(recognizer),
            Arc::new(RecordingAutomation::default()),
        )
        .unwrap();
        assert_eq!(engine.recognition_pool_size(), 4);
        assert_eq!(engine.capture_pool_size(), 4);
    }
}

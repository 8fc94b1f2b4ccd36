//! A monitored screen region and its trigger state machine.
//!
//! States cycle `Idle → Triggered → Cooldown → Idle`. `Disabled` is entered
//! and left only through [`Cell::set_enabled`]. All transitions happen under
//! the cell's own lock, which makes `set_triggered` the single test-and-set
//! point that decides which of several racing scans gets to fire.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A pixel rectangle in virtual-screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn center(&self) -> (i32, i32) {
        (
            self.x + (self.width / 2) as i32,
            self.y + (self.height / 2) as i32,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Stable identity of a cell: monitor index, grid row, grid column.
///
/// Ordering is (monitor, row, col), which is also the scheduler's tie-break.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    pub monitor: u32,
    pub row: u32,
    pub col: u32,
}

impl CellId {
    pub fn new(monitor: u32, row: u32, col: u32) -> Self {
        Self { monitor, row, col }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "monitor_{}_cell_{}_{}",
            self.monitor, self.row, self.col
        )
    }
}

/// Cell trigger states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    /// Watching for the trigger phrase
    Idle,
    /// A scan won the trigger; the action has not finished yet
    Triggered,
    /// Action done, waiting for the cooldown to expire
    Cooldown,
    /// Excluded from scanning by configuration
    Disabled,
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellStatus::Idle => write!(f, "Idle"),
            CellStatus::Triggered => write!(f, "Triggered"),
            CellStatus::Cooldown => write!(f, "Cooldown"),
            CellStatus::Disabled => write!(f, "Disabled"),
        }
    }
}

#[derive(Debug)]
struct CellState {
    status: CellStatus,
    enabled: bool,
    last_triggered: Option<DateTime<Local>>,
    cooldown_until: Option<Instant>,
    detected_text: String,
    detected_position: Option<(i32, i32)>,
    trigger_count: u64,
}

impl CellState {
    /// Lazily turns an expired cooldown back into `Idle`.
    fn refresh(&mut self, now: Instant) {
        if self.status == CellStatus::Cooldown
            && self.cooldown_until.is_none_or(|until| now >= until)
        {
            self.make_idle();
        }
    }

    fn make_idle(&mut self) {
        self.status = CellStatus::Idle;
        self.cooldown_until = None;
        self.detected_text.clear();
        self.detected_position = None;
    }

    fn triggerable(&self) -> bool {
        self.enabled && self.status == CellStatus::Idle
    }
}

/// Serializable view of a cell, as printed by `--print-state` and the `cells` command.
#[derive(Clone, Debug, Serialize)]
pub struct CellSnapshot {
    pub id: CellId,
    pub bounds: Rect,
    pub capture_area: Rect,
    pub status: CellStatus,
    pub enabled: bool,
    pub trigger_count: u64,
    pub last_triggered: Option<DateTime<Local>>,
    pub detected_text: String,
    pub detected_position: Option<(i32, i32)>,
}

/// One monitored region of the screen.
#[derive(Debug)]
pub struct Cell {
    id: CellId,
    bounds: Rect,
    capture_area: Rect,
    state: Mutex<CellState>,
    in_flight: AtomicBool,
}

impl Cell {
    pub fn new(id: CellId, bounds: Rect, capture_area: Rect) -> Self {
        Self {
            id,
            bounds,
            capture_area,
            state: Mutex::new(CellState {
                status: CellStatus::Idle,
                enabled: true,
                last_triggered: None,
                cooldown_until: None,
                detected_text: String::new(),
                detected_position: None,
                trigger_count: 0,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn capture_area(&self) -> Rect {
        self.capture_area
    }

    fn state(&self) -> MutexGuard<'_, CellState> {
        // A panic while holding the lock leaves the state consistent; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> CellStatus {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> CellStatus {
        let mut state = self.state();
        state.refresh(now);
        state.status
    }

    pub fn trigger_count(&self) -> u64 {
        self.state().trigger_count
    }

    /// True iff the cell is enabled and `Idle`, treating an expired cooldown as `Idle`.
    pub fn can_be_triggered_at(&self, now: Instant) -> bool {
        let mut state = self.state();
        state.refresh(now);
        state.triggerable()
    }

    pub fn set_triggered(&self, text: &str, position: Option<(i32, i32)>) -> bool {
        self.set_triggered_at(text, position, Instant::now())
    }

    /// Moves the cell to `Triggered` if it is triggerable.
    ///
    /// Returns `true` only for the caller that performed the transition;
    /// every other caller is a no-op.
    pub fn set_triggered_at(&self, text: &str, position: Option<(i32, i32)>, now: Instant) -> bool {
        let mut state = self.state();
        state.refresh(now);
        if !state.triggerable() {
            log::debug!(
                "{}: trigger ignored, cell is {} (enabled={})",
                self.id,
                state.status,
                state.enabled
            );
            return false;
        }

        state.status = CellStatus::Triggered;
        state.detected_text = text.to_string();
        state.detected_position = position;
        state.last_triggered = Some(Local::now());
        state.trigger_count += 1;
        true
    }

    pub fn set_cooldown(&self, duration: Duration) -> bool {
        self.set_cooldown_at(duration, Instant::now())
    }

    /// Moves a `Triggered` cell into `Cooldown` until `now + duration`.
    pub fn set_cooldown_at(&self, duration: Duration, now: Instant) -> bool {
        let mut state = self.state();
        if state.status != CellStatus::Triggered {
            log::debug!(
                "{}: cooldown ignored, cell is {}",
                self.id,
                state.status
            );
            return false;
        }
        state.status = CellStatus::Cooldown;
        state.cooldown_until = Some(now + duration);
        true
    }

    /// Forces the cell back to `Idle`. A disabled cell stays `Disabled`.
    pub fn set_idle(&self) {
        let mut state = self.state();
        if state.enabled {
            state.make_idle();
        } else {
            state.cooldown_until = None;
            state.detected_text.clear();
            state.detected_position = None;
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state();
        state.enabled = enabled;
        if !enabled {
            state.status = CellStatus::Disabled;
            state.cooldown_until = None;
        } else if state.status == CellStatus::Disabled {
            state.make_idle();
        }
    }

    /// Applies the lazy cooldown expiry. Returns true if the cell became `Idle`.
    pub fn expire_cooldown_at(&self, now: Instant) -> bool {
        let mut state = self.state();
        let before = state.status;
        state.refresh(now);
        before == CellStatus::Cooldown && state.status == CellStatus::Idle
    }

    /// Marks a scan job as outstanding. Returns false if one already is.
    pub fn try_begin_scan(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_scan(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CellSnapshot {
        let mut state = self.state();
        state.refresh(Instant::now());
        CellSnapshot {
            id: self.id,
            bounds: self.bounds,
            capture_area: self.capture_area,
            status: state.status,
            enabled: state.enabled,
            trigger_count: state.trigger_count,
            last_triggered: state.last_triggered,
            detected_text: state.detected_text.clone(),
            detected_position: state.detected_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn test_cell() -> Cell {
        Cell::new(
            CellId::new(0, 1, 2),
            Rect::new(0, 0, 384, 360),
            Rect::new(0, 280, 384, 80),
        )
    }

    #[test]
    fn test_cell_id_display_and_order() {
        assert_eq!(CellId::new(0, 1, 2).to_string(), "monitor_0_cell_1_2");
        assert!(CellId::new(0, 0, 4) < CellId::new(0, 1, 0));
        assert!(CellId::new(0, 2, 4) < CellId::new(1, 0, 0));
    }

    #[test]
    fn test_rect_helpers() {
        let rect = Rect::new(10, 20, 100, 50);
        assert_eq!(rect.center(), (60, 45));
        assert_eq!((rect.right(), rect.bottom()), (110, 70));
        assert!(!rect.is_empty());
        assert_eq!(rect.to_string(), "100x50+10+20");
    }

    #[test]
    fn test_full_trigger_cycle() {
        let cell = test_cell();
        let t0 = Instant::now();
        assert!(cell.can_be_triggered_at(t0));

        assert!(cell.set_triggered_at("들어왔습니다", Some((5, 6)), t0));
        assert_eq!(cell.status_at(t0), CellStatus::Triggered);
        assert_eq!(cell.trigger_count(), 1);
        assert!(!cell.can_be_triggered_at(t0));

        assert!(cell.set_cooldown_at(Duration::from_secs(5), t0));
        assert_eq!(cell.status_at(t0), CellStatus::Cooldown);

        let later = t0 + Duration::from_secs(5);
        assert!(cell.can_be_triggered_at(later));
        assert_eq!(cell.status_at(later), CellStatus::Idle);
    }

    #[test]
    fn test_set_triggered_is_noop_when_not_triggerable() {
        let cell = test_cell();
        let t0 = Instant::now();
        assert!(cell.set_triggered_at("a", None, t0));
        assert!(!cell.set_triggered_at("b", None, t0));
        assert_eq!(cell.trigger_count(), 1);
        assert_eq!(cell.snapshot().detected_text, "a");
    }

    #[test]
    fn test_cooldown_requires_triggered() {
        let cell = test_cell();
        assert!(!cell.set_cooldown(Duration::from_secs(1)));
        assert_eq!(cell.status(), CellStatus::Idle);
    }

    #[test]
    fn test_cooldown_monotonicity() {
        for millis in [1u64, 10, 250, 5_000, 60_000] {
            let cell = test_cell();
            let t0 = Instant::now();
            let d = Duration::from_millis(millis);
            assert!(cell.set_triggered_at("x", None, t0));
            assert!(cell.set_cooldown_at(d, t0));

            for step in [0u64, millis / 4, millis / 2, millis - 1] {
                let now = t0 + Duration::from_millis(step);
                assert!(
                    !cell.can_be_triggered_at(now),
                    "d={millis}ms triggerable at +{step}ms"
                );
            }
            assert!(cell.can_be_triggered_at(t0 + d));
            assert!(cell.can_be_triggered_at(t0 + d + Duration::from_millis(1)));
        }
    }

    #[test]
    fn test_disable_and_enable() {
        let cell = test_cell();
        cell.set_enabled(false);
        assert_eq!(cell.status(), CellStatus::Disabled);
        assert!(!cell.can_be_triggered_at(Instant::now()));
        assert!(!cell.set_triggered("x", None));

        cell.set_idle();
        assert_eq!(cell.status(), CellStatus::Disabled);

        cell.set_enabled(true);
        assert_eq!(cell.status(), CellStatus::Idle);
        assert!(cell.can_be_triggered_at(Instant::now()));
    }

    #[test]
    fn test_set_idle_clears_cooldown() {
        let cell = test_cell();
        assert!(cell.set_triggered("x", Some((1, 1))));
        assert!(cell.set_cooldown(Duration::from_secs(60)));
        cell.set_idle();
        let snapshot = cell.snapshot();
        assert_eq!(snapshot.status, CellStatus::Idle);
        assert!(snapshot.detected_text.is_empty());
        assert_eq!(snapshot.trigger_count, 1);
    }

    #[test]
    fn test_in_flight_flag() {
        let cell = test_cell();
        assert!(cell.try_begin_scan());
        assert!(!cell.try_begin_scan());
        assert!(cell.is_in_flight());
        cell.end_scan();
        assert!(cell.try_begin_scan());
    }

    #[test]
    fn test_concurrent_trigger_has_single_winner() {
        const RACERS: usize = 32;

        for _ in 0..20 {
            let cell = Arc::new(test_cell());
            let barrier = Arc::new(Barrier::new(RACERS));

            let handles: Vec<_> = (0..RACERS)
                .map(|i| {
                    let cell = Arc::clone(&cell);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        cell.set_triggered(&format!("racer {i}"), None)
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().expect("racer panicked"))
                .filter(|won| *won)
                .count();

            assert_eq!(winners, 1);
            assert_eq!(cell.trigger_count(), 1);
            assert_eq!(cell.status(), CellStatus::Triggered);
        }
    }
}

//! Adaptive per-cell scan scheduling.
//!
//! Busy cells are polled near `min_interval`, quiet ones near
//! `max_interval`. A periodic full sweep makes every schedulable cell due so
//! nothing goes unobserved for long, and repeated recognition failures stretch
//! a cell's interval until it recovers.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::priority::{CellActivity, PriorityModel, PriorityRecord};
use crate::config::{PriorityConfig, ScanConfig};
use crate::grid::CellId;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub tracked: usize,
    /// Cells triggered within the recency horizon
    pub active: usize,
    pub quiet: usize,
    pub backed_off: usize,
    pub avg_interval_ms: f64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

#[derive(Default)]
struct SchedulerState {
    cells: HashMap<CellId, CellActivity>,
    last_full_sweep: Option<Instant>,
}

pub struct Scheduler {
    model: PriorityModel,
    full_sweep_interval: Duration,
    max_cells_per_cycle: usize,
    failures_per_backoff: u32,
    max_backoff_factor: u32,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(scan: &ScanConfig, priority: &PriorityConfig) -> Self {
        Self {
            model: PriorityModel::new(scan, priority),
            full_sweep_interval: Duration::from_millis(scan.full_sweep_interval_ms),
            max_cells_per_cycle: scan.max_cells_per_cycle,
            failures_per_backoff: scan.failures_per_backoff.max(1),
            max_backoff_factor: scan.max_backoff_factor.max(1),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Picks the cells to scan this cycle from `candidates`.
    ///
    /// Candidates are expected to be schedulable already (enabled, idle, not
    /// in flight). Result is ordered by score, highest first, then by cell id.
    pub fn cells_due(&self, now: Instant, candidates: &[CellId]) -> Vec<CellId> {
        let mut state = self.lock();

        let full_sweep = match state.last_full_sweep {
            None => {
                state.last_full_sweep = Some(now);
                false
            }
            Some(at) if now.saturating_duration_since(at) >= self.full_sweep_interval => {
                state.last_full_sweep = Some(now);
                true
            }
            Some(_) => false,
        };
        if full_sweep {
            log::debug!("Full sweep over {} candidate cells", candidates.len());
        }

        let mut due: Vec<(CellId, f64)> = Vec::new();
        for &cell in candidates {
            let activity = state.cells.entry(cell).or_default();
            self.model.prune(activity, now);
            let record = self.model.record(activity, now);

            let is_due = full_sweep
                || match activity.last_scan {
                    None => true,
                    Some(at) => now.saturating_duration_since(at) >= record.interval,
                };
            if is_due {
                due.push((cell, record.score));
            }
        }

        due.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        if self.max_cells_per_cycle > 0 {
            due.truncate(self.max_cells_per_cycle);
        }
        due.into_iter().map(|(cell, _)| cell).collect()
    }

    pub fn record_scan(&self, cell: CellId, now: Instant) {
        self.lock().cells.entry(cell).or_default().last_scan = Some(now);
    }

    pub fn record_trigger(&self, cell: CellId, now: Instant) {
        let mut state = self.lock();
        let activity = state.cells.entry(cell).or_default();
        activity.last_trigger = Some(now);
        activity.recent_triggers.push_back(now);
        activity.total_triggers += 1;
        self.model.prune(activity, now);
    }

    pub fn record_recognition_success(&self, cell: CellId) {
        let mut state = self.lock();
        let activity = state.cells.entry(cell).or_default();
        if activity.backoff_factor > 1 {
            log::info!("{}: recognizer recovered, backoff cleared", cell);
        }
        activity.consecutive_failures = 0;
        activity.backoff_factor = 1;
    }

    /// Counts a failure. Every `failures_per_backoff` consecutive failures
    /// double the backoff factor, up to the configured maximum. Returns the
    /// factor now in effect.
    pub fn record_recognition_failure(&self, cell: CellId) -> u32 {
        let mut state = self.lock();
        let activity = state.cells.entry(cell).or_default();
        activity.consecutive_failures += 1;

        if activity.consecutive_failures % self.failures_per_backoff == 0 {
            let next = (activity.backoff_factor.saturating_mul(2)).min(self.max_backoff_factor);
            if next != activity.backoff_factor {
                log::warn!(
                    "{}: {} consecutive recognition failures, backing off x{}",
                    cell,
                    activity.consecutive_failures,
                    next
                );
            }
            activity.backoff_factor = next;
        }
        activity.backoff_factor
    }

    pub fn priority(&self, cell: CellId, now: Instant) -> PriorityRecord {
        let state = self.lock();
        match state.cells.get(&cell) {
            Some(activity) => self.model.record(activity, now),
            None => self.model.record(&CellActivity::default(), now),
        }
    }

    pub fn forget(&self, cell: CellId) {
        self.lock().cells.remove(&cell);
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.cells.clear();
        state.last_full_sweep = None;
    }

    pub fn stats(&self, now: Instant) -> SchedulerStats {
        let state = self.lock();
        let mut stats = SchedulerStats {
            tracked: state.cells.len(),
            ..SchedulerStats::default()
        };
        if state.cells.is_empty() {
            return stats;
        }

        let horizon = self.model.recency_horizon();
        let mut total_ms = 0.0;
        let mut min_ms = u64::MAX;
        let mut max_ms = 0u64;

        for activity in state.cells.values() {
            let recently_triggered = activity
                .last_trigger
                .is_some_and(|at| now.saturating_duration_since(at) < horizon);
            if recently_triggered {
                stats.active += 1;
            } else {
                stats.quiet += 1;
            }
            if activity.backoff_factor > 1 {
                stats.backed_off += 1;
            }

            let ms = self.model.record(activity, now).interval.as_millis() as u64;
            total_ms += ms as f64;
            min_ms = min_ms.min(ms);
            max_ms = max_ms.max(ms);
        }

        stats.avg_interval_ms = total_ms / state.cells.len() as f64;
        stats.min_interval_ms = min_ms;
        stats.max_interval_ms = max_ms;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(&ScanConfig::default(), &PriorityConfig::default())
    }

    fn ids(n: u32) -> Vec<CellId> {
        (0..n).map(|i| CellId::new(0, i / 5, i % 5)).collect()
    }

    #[test]
    fn test_frequent_trigger_cell_gets_shorter_interval() {
        let s = scheduler();
        let busy = CellId::new(0, 0, 0);
        let quiet = CellId::new(0, 0, 1);

        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(7200);
        // Quiet cell: one trigger two hours ago
        s.record_trigger(quiet, t0);
        // Busy cell: ten triggers in the last minute
        for i in 0..10 {
            s.record_trigger(busy, now - Duration::from_secs(60) + Duration::from_secs(i * 6));
        }

        let busy_interval = s.priority(busy, now).interval;
        let quiet_interval = s.priority(quiet, now).interval;
        assert!(
            busy_interval < quiet_interval,
            "{busy_interval:?} !< {quiet_interval:?}"
        );
    }

    #[test]
    fn test_never_scanned_cells_are_due() {
        let s = scheduler();
        let cells = ids(15);
        let due = s.cells_due(Instant::now(), &cells);
        assert_eq!(due, cells);
    }

    #[test]
    fn test_scanned_cell_waits_for_interval() {
        let s = scheduler();
        let cell = CellId::new(0, 0, 0);
        let t0 = Instant::now();
        s.cells_due(t0, &[cell]);
        s.record_scan(cell, t0);

        // Quiet cell: 2000ms interval
        assert!(s.cells_due(t0 + Duration::from_millis(500), &[cell]).is_empty());
        assert_eq!(s.cells_due(t0 + Duration::from_millis(2000), &[cell]), vec![cell]);
    }

    #[test]
    fn test_full_sweep_makes_everything_due() {
        let s = scheduler();
        let cells = ids(3);
        let t0 = Instant::now();
        s.cells_due(t0, &cells);

        // Every cell scanned just before the sweep boundary
        let just_before = t0 + Duration::from_millis(9_900);
        for &c in &cells {
            s.record_scan(c, just_before);
        }
        assert!(s.cells_due(t0 + Duration::from_millis(9_950), &cells).is_empty());
        assert_eq!(s.cells_due(t0 + Duration::from_secs(10), &cells).len(), 3);
    }

    #[test]
    fn test_order_by_score_then_id_and_truncation() {
        let scan = ScanConfig {
            max_cells_per_cycle: 3,
            ..ScanConfig::default()
        };
        let s = Scheduler::new(&scan, &PriorityConfig::default());
        let cells = ids(6);
        let t0 = Instant::now();
        s.record_trigger(cells[4], t0);

        let due = s.cells_due(t0, &cells);
        assert_eq!(due, vec![cells[4], cells[0], cells[1]]);
    }

    #[test]
    fn test_backoff_after_three_failures_and_reset() {
        let s = scheduler();
        let cell = CellId::new(0, 1, 1);
        let now = Instant::now();
        let base = s.priority(cell, now).interval;

        assert_eq!(s.record_recognition_failure(cell), 1);
        assert_eq!(s.record_recognition_failure(cell), 1);
        assert_eq!(s.record_recognition_failure(cell), 2);
        assert!(s.priority(cell, now).interval > base);
        assert_eq!(s.stats(now).backed_off, 1);

        for _ in 0..3 {
            s.record_recognition_failure(cell);
        }
        assert_eq!(s.priority(cell, now).backoff_factor, 4);

        s.record_recognition_success(cell);
        let record = s.priority(cell, now);
        assert_eq!(record.backoff_factor, 1);
        assert_eq!(record.interval, base);
    }

    #[test]
    fn test_backoff_factor_is_capped() {
        let scan = ScanConfig {
            max_backoff_factor: 4,
            ..ScanConfig::default()
        };
        let s = Scheduler::new(&scan, &PriorityConfig::default());
        let cell = CellId::new(0, 0, 0);
        for _ in 0..30 {
            s.record_recognition_failure(cell);
        }
        assert_eq!(s.priority(cell, Instant::now()).backoff_factor, 4);
    }

    #[test]
    fn test_stats_and_reset() {
        let s = scheduler();
        let t0 = Instant::now();
        s.record_trigger(CellId::new(0, 0, 0), t0);
        s.record_scan(CellId::new(0, 0, 1), t0);

        let stats = s.stats(t0);
        assert_eq!(stats.tracked, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.quiet, 1);
        assert!(stats.min_interval_ms < stats.max_interval_ms);

        s.reset();
        assert_eq!(s.stats(t0).tracked, 0);
    }
}

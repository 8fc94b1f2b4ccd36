use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::change::ChangeStats;
use super::scheduler::SchedulerStats;
use crate::cache::CacheStats;
use crate::grid::GridStats;

/// Pipeline event counters, updated lock-free by every worker.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub cycles: AtomicU64,
    pub dispatched: AtomicU64,
    pub queue_full: AtomicU64,
    pub captures: AtomicU64,
    pub capture_errors: AtomicU64,
    pub change_skips: AtomicU64,
    pub image_cache_hits: AtomicU64,
    pub recognitions: AtomicU64,
    pub recognition_errors: AtomicU64,
    pub stale_discards: AtomicU64,
    pub triggers: AtomicU64,
    pub automation_ok: AtomicU64,
    pub automation_errors: AtomicU64,
    pub saved_captures: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            cycles: get(&self.cycles),
            dispatched: get(&self.dispatched),
            queue_full: get(&self.queue_full),
            captures: get(&self.captures),
            capture_errors: get(&self.capture_errors),
            change_skips: get(&self.change_skips),
            image_cache_hits: get(&self.image_cache_hits),
            recognitions: get(&self.recognitions),
            recognition_errors: get(&self.recognition_errors),
            stale_discards: get(&self.stale_discards),
            triggers: get(&self.triggers),
            automation_ok: get(&self.automation_ok),
            automation_errors: get(&self.automation_errors),
            saved_captures: get(&self.saved_captures),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub cycles: u64,
    pub dispatched: u64,
    pub queue_full: u64,
    pub captures: u64,
    pub capture_errors: u64,
    pub change_skips: u64,
    pub image_cache_hits: u64,
    pub recognitions: u64,
    pub recognition_errors: u64,
    pub stale_discards: u64,
    pub triggers: u64,
    pub automation_ok: u64,
    pub automation_errors: u64,
    pub saved_captures: u64,
}

/// Point-in-time view of the whole monitor.
#[derive(Clone, Debug, Serialize)]
pub struct MonitorStats {
    pub running: bool,
    pub uptime_secs: u64,
    pub capture_workers: usize,
    pub recognition_workers: usize,
    pub counters: CounterSnapshot,
    pub grid: GridStats,
    pub scheduler: SchedulerStats,
    pub change: ChangeStats,
    pub image_cache: CacheStats,
    pub correction_cache: CacheStats,
}

impl MonitorStats {
    /// One log line.
    pub fn summary(&self) -> String {
        let c = &self.counters;
        format!(
            "cycles={} scans={} skipped={} ({:.0}%) ocr={} ocr_err={} cache_hit={:.0}% triggers={} \
             actions={}/{} cells idle={} cooldown={} disabled={} interval avg={:.0}ms backed_off={}",
            c.cycles,
            c.captures,
            c.change_skips,
            self.change.skip_ratio() * 100.0,
            c.recognitions,
            c.recognition_errors,
            self.image_cache.hit_rate() * 100.0,
            c.triggers,
            c.automation_ok,
            c.automation_ok + c.automation_errors,
            self.grid.idle,
            self.grid.cooldown,
            self.grid.disabled,
            self.scheduler.avg_interval_ms,
            self.scheduler.backed_off,
        )
    }
}

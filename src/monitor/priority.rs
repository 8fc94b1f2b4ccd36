//! Activity score and the scan interval derived from it.
//!
//! `score = w_r * recency + w_f * frequency + w_c * cumulative`, normalized by
//! the weight sum so it stays in `[0, 1]`. The interval is interpolated
//! geometrically between the configured bounds:
//! `min * (max / min) ^ (1 - score)`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{PriorityConfig, ScanConfig};

/// Scan and trigger history of one cell.
#[derive(Debug, Clone)]
pub struct CellActivity {
    pub last_scan: Option<Instant>,
    pub last_trigger: Option<Instant>,
    pub recent_triggers: VecDeque<Instant>,
    pub total_triggers: u64,
    pub consecutive_failures: u32,
    pub backoff_factor: u32,
}

impl Default for CellActivity {
    fn default() -> Self {
        Self {
            last_scan: None,
            last_trigger: None,
            recent_triggers: VecDeque::new(),
            total_triggers: 0,
            consecutive_failures: 0,
            backoff_factor: 1,
        }
    }
}

/// Derived priority of one cell at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriorityRecord {
    pub score: f64,
    pub interval: Duration,
    pub backoff_factor: u32,
}

#[derive(Debug, Clone)]
pub struct PriorityModel {
    recency_weight: f64,
    frequency_weight: f64,
    cumulative_weight: f64,
    recency_horizon: Duration,
    frequency_window: Duration,
    frequency_saturation: f64,
    cumulative_saturation: f64,
    min_interval: Duration,
    max_interval: Duration,
    max_backoff_interval: Duration,
}

impl PriorityModel {
    pub fn new(scan: &ScanConfig, priority: &PriorityConfig) -> Self {
        Self {
            recency_weight: priority.recency_weight,
            frequency_weight: priority.frequency_weight,
            cumulative_weight: priority.cumulative_weight,
            recency_horizon: Duration::from_secs(priority.recency_horizon_secs.max(1)),
            frequency_window: Duration::from_secs(priority.frequency_window_secs.max(1)),
            frequency_saturation: priority.frequency_saturation.max(1) as f64,
            cumulative_saturation: priority.cumulative_saturation.max(1) as f64,
            min_interval: Duration::from_millis(scan.min_interval_ms.max(1)),
            max_interval: Duration::from_millis(scan.max_interval_ms.max(scan.min_interval_ms).max(1)),
            max_backoff_interval: Duration::from_millis(scan.max_backoff_interval_ms),
        }
    }

    pub fn recency_horizon(&self) -> Duration {
        self.recency_horizon
    }

    /// Drops trigger instants that fell out of the frequency window.
    pub fn prune(&self, activity: &mut CellActivity, now: Instant) {
        while let Some(&oldest) = activity.recent_triggers.front() {
            if now.saturating_duration_since(oldest) > self.frequency_window {
                activity.recent_triggers.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn score(&self, activity: &CellActivity, now: Instant) -> f64 {
        let recency = match activity.last_trigger {
            Some(at) => {
                let since = now.saturating_duration_since(at).as_secs_f64();
                (1.0 - since / self.recency_horizon.as_secs_f64()).max(0.0)
            }
            None => 0.0,
        };

        let in_window = activity
            .recent_triggers
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) <= self.frequency_window)
            .count();
        let frequency = (in_window as f64 / self.frequency_saturation).min(1.0);
        let cumulative = (activity.total_triggers as f64 / self.cumulative_saturation).min(1.0);

        let weight_sum = self.recency_weight + self.frequency_weight + self.cumulative_weight;
        if weight_sum <= 0.0 {
            return 0.0;
        }
        let weighted = self.recency_weight * recency
            + self.frequency_weight * frequency
            + self.cumulative_weight * cumulative;
        (weighted / weight_sum).clamp(0.0, 1.0)
    }

    /// Strictly decreasing in `score` whenever `min < max`.
    pub fn interval_for_score(&self, score: f64) -> Duration {
        let min = self.min_interval.as_secs_f64();
        let max = self.max_interval.as_secs_f64();
        let score = score.clamp(0.0, 1.0);
        let secs = min * (max / min).powf(1.0 - score);
        Duration::from_secs_f64(secs.clamp(min, max))
    }

    /// Applies the failure backoff factor, capped at the backoff ceiling.
    pub fn backed_off(&self, interval: Duration, factor: u32) -> Duration {
        if factor <= 1 {
            return interval;
        }
        let stretched = interval.saturating_mul(factor);
        stretched.min(self.max_backoff_interval).max(interval)
    }

    pub fn record(&self, activity: &CellActivity, now: Instant) -> PriorityRecord {
        let score = self.score(activity, now);
        let interval = self.backed_off(self.interval_for_score(score), activity.backoff_factor);
        PriorityRecord {
            score,
            interval,
            backoff_factor: activity.backoff_factor,
        }
    }
}

//! Configuration types for the monitor.
//!
//! Loaded from config.json at startup (next to the executable unless a path
//! is given on the command line). Every section and field has a default, so
//! a partial file only needs to name what it changes.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::correction::{CorrectionRule, default_rules};
use crate::grid::GridLayout;

/// Scan cadence, cooldown and failure backoff.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Coordinator cycle period
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    /// Interval for the most active cells
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Interval for quiet cells
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Every cell becomes due at least this often
    #[serde(default = "default_full_sweep_interval_ms")]
    pub full_sweep_interval_ms: u64,
    /// Upper bound of cells dispatched per cycle (0 = unlimited)
    #[serde(default)]
    pub max_cells_per_cycle: usize,
    /// Cooldown after a trigger's action completes
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Consecutive recognition failures per backoff step
    #[serde(default = "default_failures_per_backoff")]
    pub failures_per_backoff: u32,
    #[serde(default = "default_max_backoff_factor")]
    pub max_backoff_factor: u32,
    #[serde(default = "default_max_backoff_interval_ms")]
    pub max_backoff_interval_ms: u64,
}

fn default_cycle_interval_ms() -> u64 {
    100
}

fn default_min_interval_ms() -> u64 {
    100
}

fn default_max_interval_ms() -> u64 {
    2000
}

fn default_full_sweep_interval_ms() -> u64 {
    10_000
}

fn default_cooldown_ms() -> u64 {
    5000
}

fn default_failures_per_backoff() -> u32 {
    3
}

fn default_max_backoff_factor() -> u32 {
    8
}

fn default_max_backoff_interval_ms() -> u64 {
    30_000
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            full_sweep_interval_ms: default_full_sweep_interval_ms(),
            max_cells_per_cycle: 0,
            cooldown_ms: default_cooldown_ms(),
            failures_per_backoff: default_failures_per_backoff(),
            max_backoff_factor: default_max_backoff_factor(),
            max_backoff_interval_ms: default_max_backoff_interval_ms(),
        }
    }
}

/// Activity score weights and saturation points.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub recency_weight: f64,
    pub frequency_weight: f64,
    pub cumulative_weight: f64,
    pub recency_horizon_secs: u64,
    pub frequency_window_secs: u64,
    pub frequency_saturation: u32,
    pub cumulative_saturation: u64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            recency_weight: 0.5,
            frequency_weight: 0.3,
            cumulative_weight: 0.2,
            recency_horizon_secs: 300,
            frequency_window_secs: 300,
            frequency_saturation: 10,
            cumulative_saturation: 100,
        }
    }
}

/// Change detection gate in front of the recognizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enabled: bool,
    /// Fraction of changed pixels above which a cell is rescanned
    pub change_threshold: f64,
    /// Per-pixel luma difference that counts as a change
    pub pixel_noise_threshold: u8,
    /// Downscale factor for stored signatures, in (0, 1]
    pub signature_scale: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            change_threshold: 0.05,
            pixel_noise_threshold: 30,
            signature_scale: 0.5,
        }
    }
}

/// Capacities and lifetimes of the two result caches.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub image_capacity: usize,
    pub image_ttl_secs: Option<u64>,
    pub correction_capacity: usize,
    pub correction_ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            image_capacity: 256,
            image_ttl_secs: Some(60),
            correction_capacity: 1024,
            correction_ttl_secs: None,
        }
    }
}

/// Trigger phrases, fuzzy tolerance and the rule table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrectionConfig {
    #[serde(default = "default_trigger_phrases")]
    pub trigger_phrases: Vec<String>,
    #[serde(default = "default_tolerance_ratio")]
    pub tolerance_ratio: f32,
    #[serde(default = "default_min_tolerance")]
    pub min_tolerance: usize,
    /// Upper bound on rule passes when iterating to a fixpoint
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
    #[serde(default = "default_rules")]
    pub rules: Vec<CorrectionRule>,
}

fn default_trigger_phrases() -> Vec<String> {
    vec!["들어왔습니다".to_string()]
}

fn default_tolerance_ratio() -> f32 {
    0.2
}

fn default_min_tolerance() -> usize {
    1
}

fn default_max_passes() -> usize {
    4
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            trigger_phrases: default_trigger_phrases(),
            tolerance_ratio: default_tolerance_ratio(),
            min_tolerance: default_min_tolerance(),
            max_passes: default_max_passes(),
            rules: default_rules(),
        }
    }
}

/// Worker pool sizes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub capture_workers: usize,
    pub recognition_workers: usize,
    pub max_recognition_workers: usize,
}

/// Hard cap on capture threads regardless of configuration.
pub const MAX_CAPTURE_WORKERS: usize = 16;

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            capture_workers: 4,
            recognition_workers: 2,
            max_recognition_workers: 4,
        }
    }
}

/// Tesseract CLI settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_psm")]
    pub psm: u8,
    /// Upscale factor applied to captures before recognition
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Allow more than one recognition worker to call the engine at once
    #[serde(default)]
    pub concurrent_safe: bool,
}

fn default_executable() -> String {
    "tesseract".to_string()
}

fn default_language() -> String {
    "kor".to_string()
}

fn default_psm() -> u8 {
    6
}

fn default_scale() -> f32 {
    2.0
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            language: default_language(),
            psm: default_psm(),
            scale: default_scale(),
            timeout_ms: default_timeout_ms(),
            concurrent_safe: false,
        }
    }
}

/// What the responder types and where it clicks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub message: String,
    /// Added to the detected text position to reach the input box
    pub input_offset_y: i32,
    /// Distance above the capture area bottom used when no position was detected
    pub fallback_offset: i32,
    /// Select-all and delete before typing
    pub clear_before_typing: bool,
    pub click_delay_ms: u64,
    pub type_delay_ms: u64,
    pub send_delay_ms: u64,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            message: "어서오세요! 환영합니다 😊".to_string(),
            input_offset_y: 40,
            fallback_offset: 25,
            clear_before_typing: true,
            click_delay_ms: 300,
            type_delay_ms: 200,
            send_delay_ms: 200,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Save the capture that fired each trigger into captures/
    pub save_trigger_captures: bool,
    /// Period of the statistics log line (0 disables it)
    pub stats_interval_secs: u64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            save_trigger_captures: false,
            stats_interval_secs: 30,
        }
    }
}

/// Complete monitor configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub grid: GridLayout,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub priority: PriorityConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

impl MonitorConfig {
    /// Checks cross-field constraints serde cannot express.
    ///
    /// The correction table is validated separately when the corrector is built.
    pub fn validate(&self) -> Result<()> {
        self.grid.validate().context("invalid grid layout")?;

        let scan = &self.scan;
        if scan.cycle_interval_ms == 0 {
            bail!("scan.cycle_interval_ms must be positive");
        }
        if scan.min_interval_ms == 0 || scan.min_interval_ms > scan.max_interval_ms {
            bail!(
                "scan intervals must satisfy 0 < min ({}) <= max ({})",
                scan.min_interval_ms,
                scan.max_interval_ms
            );
        }
        if scan.failures_per_backoff == 0 || scan.max_backoff_factor == 0 {
            bail!("scan backoff settings must be positive");
        }

        let p = &self.priority;
        let weights = [p.recency_weight, p.frequency_weight, p.cumulative_weight];
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            bail!("priority weights must be non-negative and not all zero");
        }
        if p.recency_horizon_secs == 0
            || p.frequency_window_secs == 0
            || p.frequency_saturation == 0
            || p.cumulative_saturation == 0
        {
            bail!("priority horizons and saturations must be positive");
        }

        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.change_threshold) {
            bail!("detection.change_threshold must be within [0, 1]");
        }
        if !(d.signature_scale > 0.0 && d.signature_scale <= 1.0) {
            bail!("detection.signature_scale must be within (0, 1]");
        }

        if self.cache.image_capacity == 0 || self.cache.correction_capacity == 0 {
            bail!("cache capacities must be positive");
        }
        if self.workers.capture_workers == 0
            || self.workers.recognition_workers == 0
            || self.workers.max_recognition_workers == 0
        {
            bail!("worker counts must be positive");
        }
        if !(self.recognizer.scale >= 1.0 && self.recognizer.scale <= 8.0) {
            bail!("recognizer.scale must be within [1, 8]");
        }
        Ok(())
    }
}

/// Loads configuration from `path`. A missing file yields the defaults;
/// an unreadable or malformed one is an error.
pub fn load_config(path: &Path) -> Result<MonitorConfig> {
    log::info!("Looking for config at: {}", path.display());

    if !path.exists() {
        log::info!("{} not found. Using default config.", path.display());
        return Ok(MonitorConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: MonitorConfig = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    config.validate()?;

    log::info!("Config loaded from {}", path.display());
    Ok(config)
}

//! Per-cell pixel-difference gate in front of the recognizer.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use image::{GrayImage, RgbaImage};
use serde::Serialize;

use crate::config::DetectionConfig;
use crate::grid::CellId;
use crate::ocr::preprocess::{rescale, to_grayscale};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ChangeStats {
    pub checks: u64,
    pub skips: u64,
    pub tracked: usize,
}

impl ChangeStats {
    pub fn skip_ratio(&self) -> f64 {
        if self.checks == 0 {
            0.0
        } else {
            self.skips as f64 / self.checks as f64
        }
    }
}

#[derive(Default)]
struct DetectorState {
    signatures: HashMap<CellId, GrayImage>,
    has_result: HashSet<CellId>,
    checks: u64,
    skips: u64,
}

pub struct ChangeDetector {
    config: DetectionConfig,
    state: Mutex<DetectorState>,
}

/// Downscaled grayscale used for comparison.
pub fn signature(capture: &RgbaImage, scale: f32) -> GrayImage {
    let gray = to_grayscale(capture);
    if scale >= 1.0 {
        gray
    } else {
        rescale(&gray, scale)
    }
}

/// Fraction of pixels whose luma differs by more than `noise`.
/// Images must have equal dimensions.
pub fn change_ratio(a: &GrayImage, b: &GrayImage, noise: u8) -> f64 {
    let total = a.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    let changed = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .filter(|(x, y)| x.abs_diff(**y) > noise)
        .count();
    changed as f64 / total as f64
}

impl ChangeDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            config: config.clone(),
            state: Mutex::new(DetectorState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decides whether `capture` is worth recognizing.
    ///
    /// True when there is no prior signature, the size changed, the cell has
    /// never produced a recognition result, or enough pixels changed. The
    /// stored signature is replaced whenever this returns true.
    pub fn should_scan(&self, cell: CellId, capture: &RgbaImage) -> bool {
        let current = signature(capture, self.config.signature_scale);
        let mut state = self.lock();
        state.checks += 1;

        if !self.config.enabled {
            state.signatures.insert(cell, current);
            return true;
        }

        let changed = match state.signatures.get(&cell) {
            None => true,
            Some(previous) if previous.dimensions() != current.dimensions() => true,
            Some(_) if !state.has_result.contains(&cell) => true,
            Some(previous) => {
                change_ratio(previous, &current, self.config.pixel_noise_threshold)
                    > self.config.change_threshold
            }
        };

        if changed {
            state.signatures.insert(cell, current);
        } else {
            state.skips += 1;
        }
        changed
    }

    /// Records that `cell` produced a recognition result.
    pub fn mark_result(&self, cell: CellId) {
        self.lock().has_result.insert(cell);
    }

    pub fn forget(&self, cell: CellId) {
        let mut state = self.lock();
        state.signatures.remove(&cell);
        state.has_result.remove(&cell);
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.signatures.clear();
        state.has_result.clear();
    }

    pub fn stats(&self) -> ChangeStats {
        let state = self.lock();
        ChangeStats {
            checks: state.checks,
            skips: state.skips,
            tracked: state.signatures.len(),
        }
    }
}

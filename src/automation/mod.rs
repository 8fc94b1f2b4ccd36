//! Automation boundary: what happens when a cell fires.
//!
//! This module provides:
//! - The [`TriggerEvent`] handed from the monitor to the dispatcher
//! - The [`Automation`] trait and the dry-run [`LogOnly`] implementation
//! - On Windows, the SendInput based `Responder`

#[cfg(windows)]
pub mod input;
#[cfg(windows)]
pub mod responder;

#[cfg(windows)]
pub use responder::Responder;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::ResponseConfig;
use crate::error::AutomationError;
use crate::grid::{CellId, Rect};

/// A detected trigger. Consumed exactly once by the automation boundary.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerEvent {
    pub cell_id: CellId,
    pub generation: u64,
    pub bounds: Rect,
    pub capture_area: Rect,
    /// Corrected text of the whole capture
    pub text: String,
    pub phrase: String,
    pub distance: usize,
    /// Screen position of the line containing the phrase, if it was located
    pub position: Option<(i32, i32)>,
    pub timestamp: DateTime<Local>,
}

pub trait Automation: Send + Sync {
    fn perform(&self, event: &TriggerEvent) -> Result<(), AutomationError>;
}

/// Where to click for a trigger: below the detected text, or a fixed
/// distance above the bottom of the capture strip.
pub fn input_position(event: &TriggerEvent, response: &ResponseConfig) -> (i32, i32) {
    match event.position {
        Some((x, y)) => (x, y + response.input_offset_y),
        None => {
            let (center_x, _) = event.capture_area.center();
            (center_x, event.capture_area.bottom() - response.fallback_offset)
        }
    }
}

/// Dry-run automation: logs what would be done.
#[derive(Debug, Clone)]
pub struct LogOnly {
    response: ResponseConfig,
}

impl LogOnly {
    pub fn new(response: &ResponseConfig) -> Self {
        Self {
            response: response.clone(),
        }
    }
}

impl Automation for LogOnly {
    fn perform(&self, event: &TriggerEvent) -> Result<(), AutomationError> {
        let (x, y) = input_position(event, &self.response);
        log::info!(
            "[dry-run] {}: would click ({}, {}) and send {:?} (phrase {:?}, distance {})",
            event.cell_id,
            x,
            y,
            self.response.message,
            event.phrase,
            event.distance
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_event(position: Option<(i32, i32)>) -> TriggerEvent {
    TriggerEvent {
        cell_id: CellId::new(0, 1, 2),
        generation: 1,
        bounds: Rect::new(768, 360, 384, 360),
        capture_area: Rect::new(768, 640, 384, 80),
        text: "홍길동님이들어왔습니다".to_string(),
        phrase: "들어왔습니다".to_string(),
        distance: 0,
        position,
        timestamp: Local::now(),
    }
}

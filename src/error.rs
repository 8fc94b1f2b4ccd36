//! Error types for the scan engine and its boundaries.
//!
//! Capture and recognition errors are recovered per cell per cycle,
//! correction configuration errors are fatal at startup, automation errors
//! are reported but never roll back a cell's cooldown.

use std::time::Duration;

use thiserror::Error;

use crate::grid::Rect;

/// Screen capture failed for a region.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The region lies outside the current display configuration.
    #[error("region {0} is not on screen")]
    RegionUnavailable(Rect),
    /// The capture backend reported a failure.
    #[error("capture backend failed: {0}")]
    Backend(String),
}

/// The external recognizer failed or did not answer in time.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognizer failed: {0}")]
    Engine(String),
    #[error("recognizer timed out after {0:?}")]
    Timeout(Duration),
    #[error("recognizer I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode image for recognizer: {0}")]
    Image(#[from] image::ImageError),
}

/// The correction rule table or trigger phrase list is unusable.
#[derive(Debug, Error)]
pub enum CorrectionConfigError {
    #[error("correction rule #{index} has an empty pattern")]
    EmptyPattern { index: usize },
    #[error("correction rule #{index} has an invalid regex `{pattern}`: {source}")]
    InvalidRegex {
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("correction rule #{index} replacement `{replacement}` is matched by rule #{matched_by}")]
    NonConvergent {
        index: usize,
        replacement: String,
        matched_by: usize,
    },
    #[error(
        "correction rule #{index} replacement `{replacement}` can join surrounding text into rule #{overlaps}'s pattern"
    )]
    OverlappingReplacement {
        index: usize,
        replacement: String,
        overlaps: usize,
    },
    #[error("no trigger phrases configured")]
    NoTriggerPhrases,
    #[error("trigger phrase #{index} is empty after normalization")]
    EmptyTriggerPhrase { index: usize },
    #[error("edit distance tolerance ratio {0} must be within [0, 1)")]
    InvalidTolerance(f32),
}

/// The side-effecting action for a trigger failed.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("input injection failed: {0}")]
    Input(String),
}

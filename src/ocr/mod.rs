//! Text recognition boundary.
//!
//! The monitor only sees the [`Recognizer`] trait; [`TesseractRecognizer`]
//! is the shipped implementation.

pub mod engine;
pub mod preprocess;

pub use engine::TesseractRecognizer;
pub use preprocess::prepare_for_recognition;

use image::GrayImage;

use crate::error::RecognitionError;

/// One recognized line with its bounding box in image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub text: String,
    pub confidence: f32,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl TextBox {
    pub fn center(&self) -> (u32, u32) {
        (self.left + self.width / 2, self.top + self.height / 2)
    }
}

/// Result of one recognizer call. Empty `text` means nothing was found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
    pub boxes: Vec<TextBox>,
}

pub trait Recognizer: Send + Sync {
    fn recognize(&self, image: &GrayImage) -> Result<Recognition, RecognitionError>;

    /// Whether several threads may call `recognize` at the same time.
    fn concurrent_safe(&self) -> bool {
        false
    }
}

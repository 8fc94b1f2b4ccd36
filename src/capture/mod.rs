//! Screen capture boundary.
//!
//! The monitor asks a [`ScreenCapture`] for one rectangle at a time. On
//! Windows `GdiCapture` copies it off the desktop with GDI.

#[cfg(windows)]
pub mod screen;

#[cfg(windows)]
pub use screen::GdiCapture;

use image::RgbaImage;

use crate::error::CaptureError;
use crate::grid::Rect;

pub trait ScreenCapture: Send + Sync {
    /// Copies `rect` (virtual-screen coordinates) into an RGBA image.
    fn capture(&self, rect: Rect) -> Result<RgbaImage, CaptureError>;
}

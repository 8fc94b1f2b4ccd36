//! Screen capture with GDI `BitBlt`.

use std::ffi::c_void;
use std::mem;

use image::RgbaImage;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{
    BITMAPINFO, BITMAPINFOHEADER, BI_RGB, BitBlt, CAPTUREBLT, CreateCompatibleBitmap,
    CreateCompatibleDC, DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDC, GetDIBits, ReleaseDC,
    SRCCOPY, SelectObject,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
    SM_YVIRTUALSCREEN,
};

use super::ScreenCapture;
use crate::error::CaptureError;
use crate::grid::Rect;

/// Captures rectangles of the virtual screen (all monitors).
#[derive(Debug, Default, Clone, Copy)]
pub struct GdiCapture;

impl GdiCapture {
    pub fn new() -> Self {
        Self
    }

    /// Bounding rectangle of every attached monitor.
    pub fn virtual_screen() -> Rect {
        unsafe {
            Rect::new(
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
                GetSystemMetrics(SM_CXVIRTUALSCREEN).max(0) as u32,
                GetSystemMetrics(SM_CYVIRTUALSCREEN).max(0) as u32,
            )
        }
    }
}

impl ScreenCapture for GdiCapture {
    fn capture(&self, rect: Rect) -> Result<RgbaImage, CaptureError> {
        let screen = Self::virtual_screen();
        if rect.is_empty()
            || rect.x < screen.x
            || rect.y < screen.y
            || rect.right() > screen.right()
            || rect.bottom() > screen.bottom()
        {
            return Err(CaptureError::RegionUnavailable(rect));
        }

        let width = rect.width as i32;
        let height = rect.height as i32;
        let mut bgra = vec![0u8; rect.width as usize * rect.height as usize * 4];

        unsafe {
            let screen_dc = GetDC(HWND::default());
            if screen_dc.is_invalid() {
                return Err(CaptureError::Backend("GetDC failed".to_string()));
            }
            let mem_dc = CreateCompatibleDC(screen_dc);
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let old = SelectObject(mem_dc, bitmap);

            let blit = BitBlt(
                mem_dc,
                0,
                0,
                width,
                height,
                screen_dc,
                rect.x,
                rect.y,
                SRCCOPY | CAPTUREBLT,
            );

            // Negative height asks for a top-down DIB
            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let lines = if blit.is_ok() {
                GetDIBits(
                    mem_dc,
                    bitmap,
                    0,
                    rect.height,
                    Some(bgra.as_mut_ptr() as *mut c_void),
                    &mut info,
                    DIB_RGB_COLORS,
                )
            } else {
                0
            };

            SelectObject(mem_dc, old);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(HWND::default(), screen_dc);

            if let Err(e) = blit {
                return Err(CaptureError::Backend(format!("BitBlt failed: {}", e)));
            }
            if lines != height {
                return Err(CaptureError::Backend(format!(
                    "GetDIBits copied {} of {} lines",
                    lines, height
                )));
            }
        }

        // BGRA → RGBA, GDI leaves alpha at zero
        for px in bgra.chunks_exact_mut(4) {
            px.swap(0, 2);
            px[3] = 255;
        }

        RgbaImage::from_raw(rect.width, rect.height, bgra)
            .ok_or_else(|| CaptureError::Backend("capture buffer size mismatch".to_string()))
    }
}

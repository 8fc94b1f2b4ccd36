use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbaImage};

/// Converts an RGBA capture to grayscale.
///
/// Uses the ITU-R BT.601 luma formula: Y = 0.299*R + 0.587*G + 0.114*B
pub fn to_grayscale(img: &RgbaImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = GrayImage::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let r = pixel[0] as f32;
        let g = pixel[1] as f32;
        let b = pixel[2] as f32;
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        output.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
    }

    output
}

/// Resizes by `scale`. Small text recognizes better after upscaling.
pub fn rescale(img: &GrayImage, scale: f32) -> GrayImage {
    if (scale - 1.0).abs() < f32::EPSILON || img.width() == 0 || img.height() == 0 {
        return img.clone();
    }
    let width = ((img.width() as f32 * scale).round() as u32).max(1);
    let height = ((img.height() as f32 * scale).round() as u32).max(1);
    let filter = if scale > 1.0 {
        FilterType::CatmullRom
    } else {
        FilterType::Triangle
    };
    imageops::resize(img, width, height, filter)
}

/// Grayscale then upscale: the image handed to the recognizer.
pub fn prepare_for_recognition(img: &RgbaImage, scale: f32) -> GrayImage {
    rescale(&to_grayscale(img), scale)
}

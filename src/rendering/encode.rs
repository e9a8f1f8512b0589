//! Encoder: serialize a composited surface into an image blob

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError, RgbaImage};

use crate::diagnostics::CaptureWarning;
use crate::rendering::{Blob, ImageFormat};
use crate::{Error, Result};

/// Flag an output surface larger than `threshold` pixels.
///
/// The capture still proceeds; the caller chose the scale.
pub fn check_output_size(width: u32, height: u32, threshold: u64) -> Option<CaptureWarning> {
    if width as u64 * height as u64 > threshold {
        Some(CaptureWarning::LargeOutput { width, height })
    } else {
        None
    }
}

/// Encode `image` as `format`. `quality` (0..=1) only affects lossy formats.
pub fn encode(image: &RgbaImage, format: ImageFormat, quality: f32) -> Result<Blob> {
    let (width, height) = image.dimensions();
    let mut data = Vec::new();

    match format {
        ImageFormat::Png => PngEncoder::new(&mut data)
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
            .map_err(|e| map_encode_error(format, e))?,
        ImageFormat::Jpeg => encode_jpeg(image, quality, &mut data)?,
        ImageFormat::Webp => encode_webp(image, quality, &mut data)?,
    }

    log::debug!("encoded {}x{} {} ({} bytes)", width, height, format, data.len());
    Ok(Blob::new(data, format, width, height))
}

/// WebP quality on the 0..=100 scale used by libwebp.
#[cfg_attr(not(feature = "webp"), allow(dead_code))]
pub(crate) fn webp_quality(quality: f32) -> f32 {
    (quality * 100.0).clamp(0.0, 100.0)
}

/// JPEG quality on the 1..=100 scale used by the codec.
#[cfg_attr(not(feature = "jpeg"), allow(dead_code))]
pub(crate) fn jpeg_quality(quality: f32) -> u8 {
    ((quality * 100.0).round() as i32).clamp(1, 100) as u8
}

#[cfg(feature = "jpeg")]
fn encode_jpeg(image: &RgbaImage, quality: f32, out: &mut Vec<u8>) -> Result<()> {
    use image::codecs::jpeg::JpegEncoder;

    let rgb = image::DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    JpegEncoder::new_with_quality(out, jpeg_quality(quality))
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| map_encode_error(ImageFormat::Jpeg, e))
}

#[cfg(not(feature = "jpeg"))]
fn encode_jpeg(_image: &RgbaImage, _quality: f32, _out: &mut Vec<u8>) -> Result<()> {
    Err(Error::EncodingUnsupported(ImageFormat::Jpeg))
}

#[cfg(feature = "webp")]
fn encode_webp(image: &RgbaImage, quality: f32, out: &mut Vec<u8>) -> Result<()> {
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let encoded = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
        .encode_simple(false, webp_quality(quality))
        .map_err(|e| Error::Encoding(format!("WebP encoder failed: {:?}", e)))?;
    out.extend_from_slice(&encoded);
    Ok(())
}

#[cfg(not(feature = "webp"))]
fn encode_webp(_image: &RgbaImage, _quality: f32, _out: &mut Vec<u8>) -> Result<()> {
    Err(Error::EncodingUnsupported(ImageFormat::Webp))
}

fn map_encode_error(format: ImageFormat, err: ImageError) -> Error {
    match err {
        ImageError::Unsupported(_) => Error::EncodingUnsupported(format),
        other => Error::Encoding(other.to_string()),
    }
}

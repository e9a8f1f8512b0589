//! Compositor: stretch the captured surface to the output size and paint
//! overlays on top. Pure and synchronous.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::capture::CaptureStage;
use crate::diagnostics::CaptureWarning;
use crate::rendering::ImageFormat;
use crate::{Error, Result};

/// Initial fill of the output surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    /// Fully transparent, alpha is kept
    Transparent,
    /// Opaque black, alpha is flattened away
    OpaqueBlack,
}

impl Background {
    pub fn for_format(format: ImageFormat) -> Self {
        if format.preserves_alpha() {
            Background::Transparent
        } else {
            Background::OpaqueBlack
        }
    }
}

/// The composited output surface plus any warnings raised while drawing it
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbaImage,
    pub warnings: Vec<CaptureWarning>,
}

/// Output size for a source of `width` x `height` at `scale`, truncated.
pub fn output_dimensions(width: u32, height: u32, scale: f64) -> Result<(u32, u32)> {
    let out_w = (width as f64 * scale).floor();
    let out_h = (height as f64 * scale).floor();

    if !(out_w >= 1.0 && out_h >= 1.0) {
        return Err(Error::Composition(format!(
            "Output surface for {}x{} at scale {} has no pixels",
            width, height, scale
        )));
    }
    if out_w > u32::MAX as f64 || out_h > u32::MAX as f64 {
        return Err(Error::Composition(format!(
            "Output surface for {}x{} at scale {} is too large",
            width, height, scale
        )));
    }

    let (out_w, out_h) = (out_w as u32, out_h as u32);
    let bytes = out_w as u128 * out_h as u128 * 4;
    if bytes > isize::MAX as u128 {
        return Err(Error::Composition(format!(
            "Output surface of {}x{} exceeds addressable memory",
            out_w, out_h
        )));
    }
    Ok((out_w, out_h))
}

/// Draw `stage` onto one freshly allocated output surface.
pub fn compose(stage: &CaptureStage<'_>, background: Background) -> Result<Composite> {
    let source = stage.source();
    if !source.is_origin_clean() {
        return Err(Error::Composition(
            "The render surface has been tainted by cross-origin data and cannot be exported".into(),
        ));
    }

    let (out_w, out_h) = output_dimensions(source.width(), source.height(), stage.scale())?;
    let mut warnings = Vec::new();

    let mut output = stretch(source.pixels(), out_w, out_h);
    if background == Background::OpaqueBlack {
        flatten_onto_black(&mut output);
    }

    for (index, overlay) in stage.overlays().iter().enumerate() {
        if overlay.width() == 0 || overlay.height() == 0 {
            continue;
        }
        if overlay.dimensions() != source.pixels().dimensions() {
            warnings.push(CaptureWarning::OverlayDimensionMismatch {
                index,
                overlay_width: overlay.width(),
                overlay_height: overlay.height(),
                surface_width: source.width(),
                surface_height: source.height(),
            });
        }
        let layer = stretch(overlay, out_w, out_h);
        blend_over(&mut output, &layer);
    }

    log::debug!(
        "composited {}x{} surface + {} overlay(s) into {}x{}",
        source.width(),
        source.height(),
        stage.overlays().len(),
        out_w,
        out_h
    );

    Ok(Composite { image: output, warnings })
}

// Catmull-Rom is the closest match to a browser's "high" smoothing quality.
// Resampling runs on premultiplied alpha so transparent neighbours do not
// bleed their colour into translucent edges.
fn stretch(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }

    let mut premultiplied = image.clone();
    for pixel in premultiplied.pixels_mut() {
        let a = pixel[3] as u32;
        for c in 0..3 {
            pixel[c] = ((pixel[c] as u32 * a + 127) / 255) as u8;
        }
    }

    let mut out = imageops::resize(&premultiplied, width, height, FilterType::CatmullRom);
    for pixel in out.pixels_mut() {
        let a = pixel[3] as u32;
        if a == 0 {
            *pixel = Rgba([0, 0, 0, 0]);
            continue;
        }
        for c in 0..3 {
            pixel[c] = ((pixel[c] as u32 * 255 + a / 2) / a).min(255) as u8;
        }
    }
    out
}

fn flatten_onto_black(image: &mut RgbaImage) {
    for pixel in image.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        let scale = |c: u8| ((c as u32 * a as u32 + 127) / 255) as u8;
        *pixel = Rgba([scale(r), scale(g), scale(b), 255]);
    }
}

/// Source-over blend of `top` onto `base`; both must share dimensions.
fn blend_over(base: &mut RgbaImage, top: &RgbaImage) {
    debug_assert_eq!(base.dimensions(), top.dimensions());

    for (dst, src) in base.pixels_mut().zip(top.pixels()) {
        let src_a = src[3] as f32 / 255.0;
        if src[3] == 255 {
            *dst = *src;
            continue;
        }
        if src[3] == 0 {
            continue;
        }

        let dst_a = dst[3] as f32 / 255.0;
        let out_a = src_a + dst_a * (1.0 - src_a);
        let mut out = [0u8; 4];
        for c in 0..3 {
            let s = src[c] as f32 / 255.0;
            let d = dst[c] as f32 / 255.0;
            let v = (s * src_a + d * dst_a * (1.0 - src_a)) / out_a;
            out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
        *dst = Rgba(out);
    }
}

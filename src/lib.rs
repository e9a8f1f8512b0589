//! Deep-zoom viewer capture
//!
//! Exports a composited snapshot of a deep-zoom viewer's render surface as an
//! encoded image. The pipeline waits for the viewer to settle, optionally
//! fits the whole source image into view (restoring the previous view
//! afterwards), stretches the surface to the requested scale, paints overlay
//! layers on top and encodes the result.
//!
//! # Features
//!
//! - **Viewer-agnostic**: any viewer implementing [`Viewer`] can be captured
//! - **Restorable**: temporary viewport changes are undone on every exit path
//! - **memory** (default): [`memory::MemoryViewer`], an in-process viewer
//!   used by the CLI and tests
//! - **jpeg** / **webp** (default): the matching output codecs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use deepzoom_capture::{CaptureOptions, ImageFormat, Rect};
//! use deepzoom_capture::memory::MemoryViewer;
//!
//! # async fn run() -> deepzoom_capture::Result<()> {
//! let source = image::RgbaImage::new(1024, 768);
//! let viewer = Arc::new(MemoryViewer::new(800, 600));
//! viewer.add_item(source, Rect::new(0.0, 0.0, 1.0, 0.75), true);
//! viewer.open();
//!
//! let screenshot = deepzoom_capture::create_screenshot(viewer);
//! let blob = screenshot
//!     .capture_as_binary(&CaptureOptions {
//!         format: ImageFormat::Jpeg,
//!         quality: 0.8,
//!         scale: 2.0,
//!         ..Default::default()
//!     })
//!     .await?;
//! assert_eq!(blob.mime_type(), "image/jpeg");
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

pub mod error;
pub use error::{Error, Result};

pub mod capture;
pub mod diagnostics;
pub mod download;
pub mod rendering;
pub mod screenshot;

// In-process reference viewer (decoded images, no tile streaming)
#[cfg(feature = "memory")]
pub mod memory;

pub use diagnostics::CaptureWarning;
pub use download::{DownloadManager, FsDownloadManager, StagedHandle};
pub use rendering::{Blob, ImageFormat};
pub use screenshot::Screenshot;

/// Smallest accepted `scale`.
pub const MIN_SCALE: f64 = 0.01;

/// Output surfaces above this many pixels raise a memory-pressure warning.
pub const LARGE_OUTPUT_PIXELS: u64 = 16_777_216;

/// A rectangle in viewer world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// A snapshot of the pixels a viewer is currently displaying.
///
/// `origin_clean` mirrors the browser notion of a canvas that has not been
/// tainted by cross-origin data. A tainted surface cannot be exported.
#[derive(Debug, Clone)]
pub struct Surface {
    pixels: RgbaImage,
    origin_clean: bool,
}

impl Surface {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels, origin_clean: true }
    }

    /// A surface whose pixels were drawn from a cross-origin source.
    pub fn tainted(pixels: RgbaImage) -> Self {
        Self { pixels, origin_clean: false }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn is_origin_clean(&self) -> bool {
        self.origin_clean
    }
}

/// Pipeline timing and hardening knobs.
///
/// The defaults reproduce the behaviour of a browser viewer plugin: a short
/// fallback for the render-settled signal, one frame of deferral, and an
/// unbounded wait for images to finish loading.
///
/// # Examples
///
/// ```
/// let cfg = deepzoom_capture::CaptureConfig::default();
/// assert_eq!(cfg.settle_timeout_ms, 100);
/// assert!(cfg.load_timeout_ms.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Fallback when the viewer never reports that rendering settled
    pub settle_timeout_ms: u64,
    /// Deferral after readiness so the surface buffer is flushed
    pub frame_delay_ms: u64,
    /// Delay before a staged download handle is released
    pub cleanup_delay_ms: u64,
    /// Upper bound on the image-load wait (`None` waits forever)
    pub load_timeout_ms: Option<u64>,
    /// Pixel count above which a memory-pressure warning is raised
    pub large_output_pixels: u64,
    /// Run captures sharing a `Screenshot` one at a time
    pub serialize_captures: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            settle_timeout_ms: 100,
            frame_delay_ms: 16,
            cleanup_delay_ms: 100,
            load_timeout_ms: None,
            large_output_pixels: LARGE_OUTPUT_PIXELS,
            serialize_captures: false,
        }
    }
}

impl CaptureConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidOptions(format!("cannot read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::InvalidOptions(format!("cannot parse config {}: {}", path.display(), e))
        })
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_ms.map(Duration::from_millis)
    }
}

/// Per-call capture options
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Output encoding
    pub format: ImageFormat,
    /// Quality in `0.0..=1.0`, used by lossy encodings only
    pub quality: f32,
    /// Output interpolation factor; does not fetch higher-resolution tiles
    pub scale: f64,
    /// Layers in viewer pixel space, painted in order over the surface
    pub overlays: Vec<RgbaImage>,
    /// Temporarily fit the selected image into view before capturing
    pub fit_image_to_viewport: bool,
    /// Index of the image item to fit
    pub image_index: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            quality: 0.9,
            scale: 1.0,
            overlays: Vec::new(),
            fit_image_to_viewport: true,
            image_index: 0,
        }
    }
}

impl CaptureOptions {
    /// Reject options no capture could honour.
    pub fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() || self.scale < MIN_SCALE {
            return Err(Error::InvalidOptions(format!(
                "scale must be a finite number >= {}, got {}",
                MIN_SCALE, self.scale
            )));
        }
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(Error::InvalidOptions(format!(
                "quality must be within 0..=1, got {}",
                self.quality
            )));
        }
        Ok(())
    }
}

/// A loadable image item inside a viewer (one tiled source).
pub trait TiledItem: Send + Sync {
    /// Bounds of the item in world coordinates
    fn bounds(&self) -> Rect;

    /// Whether every tile needed at the current view has been loaded
    fn is_fully_loaded(&self) -> bool;

    /// One-shot notification fired the next time the item becomes fully loaded
    fn once_fully_loaded(&self) -> oneshot::Receiver<()>;
}

/// The viewer surface consumed by the capture pipeline.
///
/// Methods take `&self`: a viewer is shared with whatever drives it (tile
/// loaders, input handling) and is expected to use interior mutability.
pub trait Viewer: Send + Sync {
    type Item: TiledItem;

    /// Whether the viewer has opened a source
    fn is_open(&self) -> bool;

    /// The current render surface, if one exists
    fn surface(&self) -> Option<Surface>;

    /// Currently visible region
    fn viewport_bounds(&self) -> Rect;

    /// Make `bounds` visible, skipping any animation when `immediately` is set
    fn fit_bounds(&self, bounds: Rect, immediately: bool);

    /// Request a redraw even if nothing changed
    fn force_redraw(&self);

    /// One-shot notification fired when the next render settles
    fn once_render_settled(&self) -> oneshot::Receiver<()>;

    /// Image item at `index`, if loaded
    fn item_at(&self, index: usize) -> Option<Self::Item>;

    /// Number of image items, reported when an index is out of range
    fn item_count(&self) -> usize;
}

/// Create a screenshot facade for a viewer with the default config.
pub fn create_screenshot<V: Viewer>(viewer: Arc<V>) -> Screenshot<V> {
    Screenshot::new(viewer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = CaptureOptions::default();
        assert_eq!(opts.format, ImageFormat::Png);
        assert_eq!(opts.quality, 0.9);
        assert_eq!(opts.scale, 1.0);
        assert!(opts.overlays.is_empty());
        assert!(opts.fit_image_to_viewport);
        assert_eq!(opts.image_index, 0);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_scale() {
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY, 0.001] {
            let opts = CaptureOptions { scale, ..Default::default() };
            assert!(matches!(opts.validate(), Err(Error::InvalidOptions(_))), "scale {}", scale);
        }
    }

    #[test]
    fn test_validate_rejects_bad_quality() {
        let opts = CaptureOptions { quality: 1.5, ..Default::default() };
        assert!(matches!(opts.validate(), Err(Error::InvalidOptions(_))));
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let cfg: CaptureConfig = serde_json::from_str(r#"{"settle_timeout_ms": 250}"#).unwrap();
        assert_eq!(cfg.settle_timeout_ms, 250);
        assert_eq!(cfg.frame_delay_ms, 16);
        assert_eq!(cfg.large_output_pixels, LARGE_OUTPUT_PIXELS);
    }

    #[test]
    fn test_config_from_missing_file() {
        let err = CaptureConfig::from_json_file("/nonexistent/deepzoom.json").unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[test]
    fn test_rect_edges() {
        let r = Rect::new(0.25, 0.5, 1.0, 2.0);
        assert_eq!(r.right(), 1.25);
        assert_eq!(r.bottom(), 2.5);
    }
}

//! Error types for the capture pipeline

use thiserror::Error;

use crate::rendering::ImageFormat;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Stable prefix carried by every error message so failures are easy to grep for.
pub const ERROR_PREFIX: &str = "[deepzoom-capture]";

/// Errors that can occur while capturing a viewer
#[derive(Error, Debug)]
pub enum Error {
    /// The viewer has not opened (or has been closed)
    #[error("[deepzoom-capture] Viewer is not open. Wait for the viewer to open before capturing.")]
    ViewerNotReady,

    /// The requested image item does not exist
    #[error("[deepzoom-capture] No image at index {index} (viewer has {count})")]
    NoSuchImage { index: usize, count: usize },

    /// The viewer exposes no render surface after the readiness wait
    #[error("[deepzoom-capture] Render surface not available. Ensure the viewer is fully initialized.")]
    SurfaceUnavailable,

    /// The requested format cannot be produced by this build
    #[error("[deepzoom-capture] Encoding to {0} is not supported by this build")]
    EncodingUnsupported(ImageFormat),

    /// Drawing the composite failed
    #[error("[deepzoom-capture] {0}. Check CORS policy if using remote images.")]
    Composition(String),

    /// The encoder failed for a supported format
    #[error("[deepzoom-capture] Failed to encode image: {0}")]
    Encoding(String),

    /// Capture options or arguments were rejected
    #[error("[deepzoom-capture] Invalid options: {0}")]
    InvalidOptions(String),

    /// Staging or saving a download failed
    #[error("[deepzoom-capture] Download failed: {0}")]
    Download(String),

    /// The optional bound on the image-load wait elapsed
    #[error("[deepzoom-capture] Image did not finish loading within {0}ms")]
    LoadTimeout(u64),
}

//! Non-fatal capture warnings

use std::fmt;
use std::sync::Arc;

/// A condition worth reporting that does not change the exported image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureWarning {
    /// An overlay's native size differs from the surface; it was stretched
    OverlayDimensionMismatch {
        index: usize,
        overlay_width: u32,
        overlay_height: u32,
        surface_width: u32,
        surface_height: u32,
    },
    /// The output surface is big enough to cause memory pressure
    LargeOutput { width: u32, height: u32 },
}

impl fmt::Display for CaptureWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureWarning::OverlayDimensionMismatch {
                index,
                overlay_width,
                overlay_height,
                surface_width,
                surface_height,
            } => write!(
                f,
                "[deepzoom-capture] Overlay {} dimensions ({}x{}) do not match viewer surface ({}x{}). Overlay will be stretched.",
                index, overlay_width, overlay_height, surface_width, surface_height
            ),
            CaptureWarning::LargeOutput { width, height } => write!(
                f,
                "[deepzoom-capture] Output surface is very large ({}x{}). This may cause memory issues.",
                width, height
            ),
        }
    }
}

pub(crate) type WarningHandler = Arc<dyn Fn(&CaptureWarning) + Send + Sync>;

/// Log `warning` and hand it to the registered handler, if any.
pub(crate) fn emit(handler: Option<&WarningHandler>, warning: &CaptureWarning) {
    log::warn!("{}", warning);
    if let Some(cb) = handler {
        cb(warning);
    }
}

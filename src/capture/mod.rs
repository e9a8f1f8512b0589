//! Surface capture: decide when the viewer's surface can be read and read it
//!
//! The sequence is always one readiness pass, then either a plain read of
//! the current view or, for full-image captures, a read taken inside a
//! [`ViewportGuard`] after the target item has loaded and re-rendered.

pub mod readiness;
pub mod viewport;

pub use readiness::{wait_for_draw, wait_for_full_load};
pub use viewport::{with_temporary_bounds, ViewportGuard};

use image::RgbaImage;

use crate::{CaptureConfig, CaptureOptions, Error, Result, Surface, TiledItem, Viewer};

/// The resolved input of one composition: the surface to export, the
/// overlays to paint over it and the output scale.
#[derive(Debug, Clone)]
pub struct CaptureStage<'a> {
    source: Surface,
    overlays: &'a [RgbaImage],
    scale: f64,
}

impl<'a> CaptureStage<'a> {
    pub fn new(source: Surface, overlays: &'a [RgbaImage], scale: f64) -> Self {
        Self { source, overlays, scale }
    }

    pub fn source(&self) -> &Surface {
        &self.source
    }

    pub fn overlays(&self) -> &'a [RgbaImage] {
        self.overlays
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

/// Produce the stage for `options`, waiting on the viewer as needed.
pub async fn prepare_capture<'o, V>(
    viewer: &V,
    options: &'o CaptureOptions,
    config: &CaptureConfig,
) -> Result<CaptureStage<'o>>
where
    V: Viewer + ?Sized,
{
    // Resolve the target first so a bad index fails before anything happens.
    let target = if options.fit_image_to_viewport {
        let index = options.image_index;
        let item = viewer
            .item_at(index)
            .ok_or_else(|| Error::NoSuchImage { index, count: viewer.item_count() })?;
        Some(item)
    } else {
        None
    };

    wait_for_draw(viewer, config).await;

    let source = match target {
        Some(item) => capture_full_image(viewer, &item, config).await?,
        None => read_surface(viewer)?,
    };

    Ok(CaptureStage::new(source, &options.overlays, options.scale))
}

async fn capture_full_image<V>(viewer: &V, item: &V::Item, config: &CaptureConfig) -> Result<Surface>
where
    V: Viewer + ?Sized,
{
    let bounds = item.bounds();
    with_temporary_bounds(viewer, bounds, move || async move {
        wait_for_full_load(viewer, item, config).await?;
        read_surface(viewer)
    })
    .await
}

fn read_surface<V: Viewer + ?Sized>(viewer: &V) -> Result<Surface> {
    let surface = viewer.surface().ok_or(Error::SurfaceUnavailable)?;
    log::debug!("read {}x{} surface", surface.width(), surface.height());
    Ok(surface)
}

//! Scoped viewport changes that always restore the previous view

use std::future::Future;

use crate::{Rect, Viewer};

/// Applies temporary viewport bounds and restores the originals on drop.
///
/// Both the change and the restore are immediate (not animated), so a
/// readiness wait inside the scope never races a pan/zoom animation.
/// Restoration runs on success, on error and when the owning future is
/// dropped mid-capture.
pub struct ViewportGuard<'a, V: Viewer + ?Sized> {
    viewer: &'a V,
    original: Rect,
}

impl<'a, V: Viewer + ?Sized> ViewportGuard<'a, V> {
    pub fn enter(viewer: &'a V, bounds: Rect) -> Self {
        let original = viewer.viewport_bounds();
        log::debug!("viewport {:?} -> {:?}", original, bounds);
        viewer.fit_bounds(bounds, true);
        Self { viewer, original }
    }

    /// Bounds that will be restored
    pub fn original(&self) -> Rect {
        self.original
    }
}

impl<V: Viewer + ?Sized> Drop for ViewportGuard<'_, V> {
    fn drop(&mut self) {
        log::debug!("viewport restored to {:?}", self.original);
        self.viewer.fit_bounds(self.original, true);
    }
}

/// Run `body` with the viewport temporarily set to `bounds`.
pub async fn with_temporary_bounds<V, F, Fut, T>(viewer: &V, bounds: Rect, body: F) -> T
where
    V: Viewer + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let _guard = ViewportGuard::enter(viewer, bounds);
    body().await
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::memory::MemoryViewer;
    use image::RgbaImage;

    fn viewer() -> MemoryViewer {
        let v = MemoryViewer::new(100, 100);
        v.add_item(RgbaImage::new(10, 10), Rect::new(0.0, 0.0, 1.0, 1.0), true);
        v.fit_bounds(Rect::new(0.25, 0.25, 0.5, 0.5), true);
        v.open();
        v
    }

    #[test]
    fn guard_restores_on_drop() {
        let v = viewer();
        let before = v.viewport_bounds();
        {
            let guard = ViewportGuard::enter(&v, Rect::new(0.0, 0.0, 1.0, 1.0));
            assert_eq!(guard.original(), before);
            assert_eq!(v.viewport_bounds(), Rect::new(0.0, 0.0, 1.0, 1.0));
        }
        assert_eq!(v.viewport_bounds(), before);
    }

    #[tokio::test]
    async fn restores_when_body_fails() {
        let v = viewer();
        let before = v.viewport_bounds();
        let res: Result<(), &str> =
            with_temporary_bounds(&v, Rect::new(0.0, 0.0, 1.0, 1.0), || async { Err("boom") }).await;
        assert!(res.is_err());
        assert_eq!(v.viewport_bounds(), before);
    }

    #[tokio::test]
    async fn restores_when_future_is_dropped() {
        let v = viewer();
        let before = v.viewport_bounds();
        let pending = with_temporary_bounds(&v, Rect::new(0.0, 0.0, 1.0, 1.0), || std::future::pending::<()>());
        let res = tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;
        assert!(res.is_err());
        assert_eq!(v.viewport_bounds(), before);
    }
}

//! Render readiness: single-fire signals that the surface is safe to read

use std::time::Duration;

use tokio::sync::oneshot;

use crate::{CaptureConfig, Error, Result, TiledItem, Viewer};

/// Force a redraw and wait until it has settled.
///
/// The viewer's render-settled signal is raced against
/// `config.settle_timeout_ms`, since a viewer with nothing to redraw may
/// never emit it. Either way one frame tick follows, because the signal can
/// fire before the surface buffer is flushed.
pub async fn wait_for_draw<V: Viewer + ?Sized>(viewer: &V, config: &CaptureConfig) {
    // Subscribe before redrawing so a synchronous render cannot be missed.
    let settled = viewer.once_render_settled();
    viewer.force_redraw();

    let fallback = tokio::time::sleep(config.settle_timeout());
    tokio::pin!(fallback);

    tokio::select! {
        res = settled => match res {
            Ok(()) => log::debug!("render settled"),
            Err(_) => {
                // Subscription dropped without firing; only the timer is left.
                (&mut fallback).await;
                log::debug!("render-settled subscription closed, used fallback timer");
            }
        },
        _ = &mut fallback => {
            log::debug!("no render-settled signal within {}ms, continuing", config.settle_timeout_ms);
        }
    }

    next_frame(config.frame_delay()).await;
}

/// Wait for `item` to finish loading, then for the resulting render.
///
/// Load and render compose in sequence: rendering before the load completes
/// would capture a partial image. The load wait is unbounded unless
/// `config.load_timeout_ms` is set.
pub async fn wait_for_full_load<V>(viewer: &V, item: &V::Item, config: &CaptureConfig) -> Result<()>
where
    V: Viewer + ?Sized,
{
    // Subscribe before checking the flag so a load finishing in between is seen.
    let loaded = item.once_fully_loaded();

    if !item.is_fully_loaded() {
        log::debug!("image not fully loaded, waiting");
        match config.load_timeout() {
            None => wait_loaded(loaded).await,
            Some(limit) => tokio::time::timeout(limit, wait_loaded(loaded))
                .await
                .map_err(|_| Error::LoadTimeout(limit.as_millis() as u64))?,
        }
    }

    wait_for_draw(viewer, config).await;
    Ok(())
}

async fn wait_loaded(loaded: oneshot::Receiver<()>) {
    if loaded.await.is_err() {
        log::warn!("[deepzoom-capture] Image dropped its load notification; capturing what is rendered");
    }
}

async fn next_frame(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::memory::MemoryViewer;
    use crate::Rect;
    use image::RgbaImage;
    use std::sync::Arc;
    use std::time::Instant;

    fn viewer() -> Arc<MemoryViewer> {
        let v = Arc::new(MemoryViewer::new(32, 32));
        v.add_item(RgbaImage::new(64, 64), Rect::new(0.0, 0.0, 1.0, 1.0), true);
        v.open();
        v
    }

    #[tokio::test]
    async fn settled_signal_short_circuits_the_fallback() {
        let v = viewer();
        let cfg = CaptureConfig { settle_timeout_ms: 5_000, frame_delay_ms: 0, ..Default::default() };

        let start = Instant::now();
        wait_for_draw(&*v, &cfg).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(v.redraw_count(), 1);
    }

    #[tokio::test]
    async fn silent_viewer_falls_back_to_timer() {
        let v = viewer();
        v.set_emits_render_settled(false);
        let cfg = CaptureConfig { settle_timeout_ms: 30, frame_delay_ms: 0, ..Default::default() };

        let start = Instant::now();
        wait_for_draw(&*v, &cfg).await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn full_load_waits_for_the_item() {
        let v = Arc::new(MemoryViewer::new(32, 32));
        v.add_item(RgbaImage::new(64, 64), Rect::new(0.0, 0.0, 1.0, 1.0), false);
        v.open();

        let loader = v.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            loader.mark_fully_loaded(0);
        });

        let item = v.item_at(0).unwrap();
        let cfg = CaptureConfig { frame_delay_ms: 0, ..Default::default() };
        wait_for_full_load(&*v, &item, &cfg).await.unwrap();
        assert!(item.is_fully_loaded());
    }

    #[tokio::test]
    async fn load_timeout_is_opt_in() {
        let v = Arc::new(MemoryViewer::new(32, 32));
        v.add_item(RgbaImage::new(64, 64), Rect::new(0.0, 0.0, 1.0, 1.0), false);
        v.open();

        let item = v.item_at(0).unwrap();
        let cfg = CaptureConfig { load_timeout_ms: Some(20), ..Default::default() };
        let err = wait_for_full_load(&*v, &item, &cfg).await.unwrap_err();
        assert!(matches!(err, Error::LoadTimeout(20)));
    }
}

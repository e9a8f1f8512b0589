//! MemoryViewer: an in-process viewer over decoded images.
//!
//! Items are placed in world coordinates and drawn onto a fixed-size
//! surface through the current viewport with nearest-neighbour sampling.
//! An item that is not fully loaded is drawn from a coarse preview, the way
//! a tiled viewer shows low-resolution levels while detail tiles stream in.
//! Settle and load notifications are delivered through one-shot channels.
//!
//! There is no tile pyramid and no network access; the viewer exists so
//! the capture pipeline can be exercised end to end.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tokio::sync::oneshot;

use crate::{Rect, Surface, TiledItem, Viewer};

/// Preview resolution divisor for items that are still loading.
const PREVIEW_DIVISOR: u32 = 8;

/// Relative aspect difference treated as an exact match, so re-fitting
/// bounds read back from the viewer leaves them untouched.
const ASPECT_EPSILON: f64 = 1e-9;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LoadState {
    fully_loaded: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

struct ItemInner {
    full: RgbaImage,
    preview: RgbaImage,
    bounds: Rect,
    load: Mutex<LoadState>,
}

/// Handle to one image placed in a [`MemoryViewer`]
#[derive(Clone)]
pub struct MemoryItem {
    inner: Arc<ItemInner>,
}

impl MemoryItem {
    fn new(image: RgbaImage, bounds: Rect, fully_loaded: bool) -> Self {
        let (w, h) = image.dimensions();
        let preview = if w == 0 || h == 0 {
            image.clone()
        } else {
            imageops::resize(
                &image,
                (w / PREVIEW_DIVISOR).max(1),
                (h / PREVIEW_DIVISOR).max(1),
                FilterType::Triangle,
            )
        };
        Self {
            inner: Arc::new(ItemInner {
                full: image,
                preview,
                bounds,
                load: Mutex::new(LoadState { fully_loaded, waiters: Vec::new() }),
            }),
        }
    }

    /// Load subscriptions still waiting to fire
    pub fn pending_load_waiters(&self) -> usize {
        lock(&self.inner.load).waiters.len()
    }

    /// Native pixel size of the full-resolution image
    pub fn dimensions(&self) -> (u32, u32) {
        self.inner.full.dimensions()
    }

    fn set_fully_loaded(&self, loaded: bool) {
        let waiters = {
            let mut state = lock(&self.inner.load);
            state.fully_loaded = loaded;
            if loaded {
                std::mem::take(&mut state.waiters)
            } else {
                Vec::new()
            }
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    /// Sample the item at normalized coordinates `(u, v)` in `0..1`.
    fn sample(&self, loaded: bool, u: f64, v: f64) -> Option<Rgba<u8>> {
        let source = if loaded { &self.inner.full } else { &self.inner.preview };
        let (w, h) = source.dimensions();
        if w == 0 || h == 0 {
            return None;
        }
        let x = ((u * w as f64) as u32).min(w - 1);
        let y = ((v * h as f64) as u32).min(h - 1);
        Some(*source.get_pixel(x, y))
    }
}

impl TiledItem for MemoryItem {
    fn bounds(&self) -> Rect {
        self.inner.bounds
    }

    fn is_fully_loaded(&self) -> bool {
        lock(&self.inner.load).fully_loaded
    }

    fn once_fully_loaded(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut state = lock(&self.inner.load);
        if state.fully_loaded {
            let _ = tx.send(());
        } else {
            state.waiters.retain(|w| !w.is_closed());
            state.waiters.push(tx);
        }
        rx
    }
}

struct ViewerState {
    open: bool,
    width: u32,
    height: u32,
    viewport: Rect,
    surface: Option<RgbaImage>,
    surface_torn_down: bool,
    tainted: bool,
    emits_render_settled: bool,
    settled_waiters: Vec<oneshot::Sender<()>>,
    items: Vec<MemoryItem>,
    redraws: usize,
    viewport_writes: Vec<Rect>,
}

/// A viewer holding its images in memory.
pub struct MemoryViewer {
    state: Mutex<ViewerState>,
}

impl MemoryViewer {
    /// Create a closed viewer with a `width` x `height` surface.
    ///
    /// The initial viewport spans world x `0..1` at the surface aspect ratio.
    pub fn new(width: u32, height: u32) -> Self {
        let aspect_h = if width == 0 { 1.0 } else { height as f64 / width as f64 };
        Self {
            state: Mutex::new(ViewerState {
                open: false,
                width,
                height,
                viewport: Rect::new(0.0, 0.0, 1.0, aspect_h),
                surface: None,
                surface_torn_down: false,
                tainted: false,
                emits_render_settled: true,
                settled_waiters: Vec::new(),
                items: Vec::new(),
                redraws: 0,
                viewport_writes: Vec::new(),
            }),
        }
    }

    /// Place an image at `bounds`; returns its index.
    pub fn add_item(&self, image: RgbaImage, bounds: Rect, fully_loaded: bool) -> usize {
        let mut state = lock(&self.state);
        state.items.push(MemoryItem::new(image, bounds, fully_loaded));
        let index = state.items.len() - 1;
        if state.open {
            Self::render(&mut state);
        }
        index
    }

    /// Open the viewer and draw the first frame.
    pub fn open(&self) {
        let mut state = lock(&self.state);
        state.open = true;
        Self::render(&mut state);
    }

    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.open = false;
        state.surface = None;
    }

    /// Drop the surface as if the drawer had been destroyed.
    pub fn tear_down_surface(&self) {
        let mut state = lock(&self.state);
        state.surface_torn_down = true;
        state.surface = None;
    }

    /// Mark the surface as drawn from cross-origin data.
    pub fn set_tainted(&self, tainted: bool) {
        lock(&self.state).tainted = tainted;
    }

    /// Whether renders notify render-settled subscribers
    pub fn set_emits_render_settled(&self, emits: bool) {
        lock(&self.state).emits_render_settled = emits;
    }

    /// Fit the union of all item bounds into view.
    pub fn go_home(&self) {
        let home = {
            let state = lock(&self.state);
            let mut items = state.items.iter().map(|item| item.inner.bounds);
            let Some(first) = items.next() else { return };
            items.fold(first, |acc, b| {
                let x = acc.x.min(b.x);
                let y = acc.y.min(b.y);
                Rect::new(x, y, acc.right().max(b.right()) - x, acc.bottom().max(b.bottom()) - y)
            })
        };
        self.fit_bounds(home, true);
    }

    /// Finish loading item `index`, notifying waiters and redrawing.
    pub fn mark_fully_loaded(&self, index: usize) {
        let item = lock(&self.state).items.get(index).cloned();
        if let Some(item) = item {
            item.set_fully_loaded(true);
            let mut state = lock(&self.state);
            if state.open {
                Self::render(&mut state);
            }
        }
    }

    /// Put item `index` back into the loading state.
    pub fn mark_loading(&self, index: usize) {
        let item = lock(&self.state).items.get(index).cloned();
        if let Some(item) = item {
            item.set_fully_loaded(false);
        }
    }

    /// Finish loading item `index` after `delay`, simulating tile latency.
    pub fn load_after(self: &Arc<Self>, index: usize, delay: Duration) -> tokio::task::JoinHandle<()> {
        let viewer = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            viewer.mark_fully_loaded(index);
        })
    }

    /// Number of forced redraws requested so far
    pub fn redraw_count(&self) -> usize {
        lock(&self.state).redraws
    }

    /// Every bounds value passed to `fit_bounds`, oldest first
    pub fn viewport_writes(&self) -> Vec<Rect> {
        lock(&self.state).viewport_writes.clone()
    }

    /// Render-settled subscriptions still held by the viewer
    pub fn pending_settle_waiters(&self) -> usize {
        lock(&self.state).settled_waiters.len()
    }

    pub fn surface_size(&self) -> (u32, u32) {
        let state = lock(&self.state);
        (state.width, state.height)
    }

    /// Expand `bounds` so it matches the surface aspect ratio, keeping its centre.
    fn fit_to_aspect(bounds: Rect, width: u32, height: u32) -> Rect {
        if width == 0 || height == 0 || bounds.width <= 0.0 || bounds.height <= 0.0 {
            return bounds;
        }
        let aspect = width as f64 / height as f64;
        let requested = bounds.width / bounds.height;
        if ((requested - aspect) / aspect).abs() < ASPECT_EPSILON {
            bounds
        } else if requested > aspect {
            let h = bounds.width / aspect;
            Rect::new(bounds.x, bounds.y - (h - bounds.height) / 2.0, bounds.width, h)
        } else {
            let w = bounds.height * aspect;
            Rect::new(bounds.x - (w - bounds.width) / 2.0, bounds.y, w, bounds.height)
        }
    }

    fn render(state: &mut ViewerState) {
        if state.surface_torn_down {
            return;
        }

        let (w, h) = (state.width, state.height);
        let vp = state.viewport;
        let mut surface = RgbaImage::new(w, h);

        if vp.width > 0.0 && vp.height > 0.0 {
            for item in &state.items {
                let b = item.inner.bounds;
                if b.width <= 0.0 || b.height <= 0.0 {
                    continue;
                }
                let loaded = item.is_fully_loaded();
                for (px, py, pixel) in surface.enumerate_pixels_mut() {
                    let wx = vp.x + (px as f64 + 0.5) / w as f64 * vp.width;
                    let wy = vp.y + (py as f64 + 0.5) / h as f64 * vp.height;
                    if wx < b.x || wx >= b.right() || wy < b.y || wy >= b.bottom() {
                        continue;
                    }
                    if let Some(sample) = item.sample(loaded, (wx - b.x) / b.width, (wy - b.y) / b.height) {
                        if sample[3] > 0 {
                            *pixel = sample;
                        }
                    }
                }
            }
        }

        state.surface = Some(surface);
        if state.emits_render_settled {
            for tx in state.settled_waiters.drain(..) {
                let _ = tx.send(());
            }
        }
    }
}

impl Viewer for MemoryViewer {
    type Item = MemoryItem;

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn surface(&self) -> Option<Surface> {
        let state = lock(&self.state);
        let pixels = state.surface.clone()?;
        Some(if state.tainted { Surface::tainted(pixels) } else { Surface::new(pixels) })
    }

    fn viewport_bounds(&self) -> Rect {
        lock(&self.state).viewport
    }

    // There is no animation, so `immediately` only matters to callers.
    fn fit_bounds(&self, bounds: Rect, _immediately: bool) {
        let mut state = lock(&self.state);
        state.viewport_writes.push(bounds);
        state.viewport = Self::fit_to_aspect(bounds, state.width, state.height);
        if state.open {
            Self::render(&mut state);
        }
    }

    fn force_redraw(&self) {
        let mut state = lock(&self.state);
        state.redraws += 1;
        if state.open {
            Self::render(&mut state);
        }
    }

    fn once_render_settled(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut state = lock(&self.state);
        state.settled_waiters.retain(|w| !w.is_closed());
        state.settled_waiters.push(tx);
        rx
    }

    fn item_at(&self, index: usize) -> Option<MemoryItem> {
        lock(&self.state).items.get(index).cloned()
    }

    fn item_count(&self) -> usize {
        lock(&self.state).items.len()
    }
}

//! The public capture facade
//!
//! [`Screenshot`] runs the whole pipeline for one viewer: precondition
//! checks, readiness waits, the optional fit-to-image, composition and
//! encoding. The three entry points differ only in what they do with the
//! encoded blob.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use crate::capture::prepare_capture;
use crate::diagnostics::{self, CaptureWarning, WarningHandler};
use crate::download::{validate_filename, DownloadManager, FsDownloadManager, TransientHandle};
use crate::rendering::{check_output_size, compose, encode, output_dimensions, Background, Blob};
use crate::{CaptureConfig, CaptureOptions, Error, Result, Viewer};

type CaptureLock = tokio::sync::Mutex<()>;

static CAPTURE_LOCKS: OnceLock<Mutex<HashMap<usize, Weak<CaptureLock>>>> = OnceLock::new();

/// The capture lock shared by every exporter of `viewer`.
///
/// Keyed by the viewer's address. An entry can only be upgraded while some
/// exporter still holds both the lock and the viewer, so a reused address
/// never inherits a stale lock.
fn capture_lock_for<V>(viewer: &Arc<V>) -> Arc<CaptureLock> {
    let key = Arc::as_ptr(viewer) as *const () as usize;
    let mut locks = CAPTURE_LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
        return lock;
    }
    locks.retain(|_, lock| lock.strong_count() > 0);
    let lock = Arc::new(CaptureLock::new(()));
    locks.insert(key, Arc::downgrade(&lock));
    lock
}

/// Screenshot exporter bound to one viewer.
///
/// Clones share the viewer and the download manager. With
/// `serialize_captures` set, captures of the same viewer run one at a time
/// across every exporter built for it.
pub struct Screenshot<V: Viewer> {
    viewer: Arc<V>,
    config: CaptureConfig,
    on_warning: Option<WarningHandler>,
    downloads: Arc<dyn DownloadManager>,
    capture_lock: Arc<CaptureLock>,
}

impl<V: Viewer> Clone for Screenshot<V> {
    fn clone(&self) -> Self {
        Self {
            viewer: Arc::clone(&self.viewer),
            config: self.config.clone(),
            on_warning: self.on_warning.clone(),
            downloads: Arc::clone(&self.downloads),
            capture_lock: Arc::clone(&self.capture_lock),
        }
    }
}

impl<V: Viewer> Screenshot<V> {
    /// Exporter with the default config, saving downloads to the working directory.
    pub fn new(viewer: Arc<V>) -> Self {
        Self::with_config(viewer, CaptureConfig::default())
    }

    pub fn with_config(viewer: Arc<V>, config: CaptureConfig) -> Self {
        let capture_lock = capture_lock_for(&viewer);
        Self {
            viewer,
            config,
            on_warning: None,
            downloads: Arc::new(FsDownloadManager::new(".")),
            capture_lock,
        }
    }

    /// Replace the download manager used by [`Screenshot::download_as`].
    pub fn with_download_manager(mut self, downloads: Arc<dyn DownloadManager>) -> Self {
        self.downloads = downloads;
        self
    }

    pub fn viewer(&self) -> &Arc<V> {
        &self.viewer
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Register a callback for non-fatal warnings. Warnings are logged either way.
    pub fn on_warning<F>(&mut self, cb: F)
    where
        F: Fn(&CaptureWarning) + Send + Sync + 'static,
    {
        self.on_warning = Some(Arc::new(cb));
    }

    pub fn clear_on_warning(&mut self) {
        self.on_warning = None;
    }

    /// Capture the viewer and return the encoded image.
    pub async fn capture_as_binary(&self, options: &CaptureOptions) -> Result<Blob> {
        // Nothing may happen to the viewer before these pass.
        if !self.viewer.is_open() {
            return Err(Error::ViewerNotReady);
        }
        options.validate()?;

        let _serialized = if self.config.serialize_captures {
            let guard = self.capture_lock.lock().await;
            // The viewer may have closed while an earlier capture held the lock.
            if !self.viewer.is_open() {
                return Err(Error::ViewerNotReady);
            }
            Some(guard)
        } else {
            None
        };

        let stage = prepare_capture(self.viewer.as_ref(), options, &self.config).await?;

        let source = stage.source();
        let (out_w, out_h) = output_dimensions(source.width(), source.height(), stage.scale())?;
        if let Some(warning) = check_output_size(out_w, out_h, self.config.large_output_pixels) {
            self.warn(&warning);
        }

        let composite = compose(&stage, Background::for_format(options.format))?;
        for warning in &composite.warnings {
            self.warn(warning);
        }

        encode(&composite.image, options.format, options.quality)
    }

    /// Capture the viewer as a `data:` URL.
    pub async fn capture_as_data_url(&self, options: &CaptureOptions) -> Result<String> {
        let blob = self.capture_as_binary(options).await?;
        Ok(blob.to_data_url())
    }

    /// Capture the viewer and save it as `filename` through the download manager.
    pub async fn download_as(&self, filename: &str, options: &CaptureOptions) -> Result<()> {
        if !self.viewer.is_open() {
            return Err(Error::ViewerNotReady);
        }
        validate_filename(filename)?;

        let blob = self.capture_as_binary(options).await?;
        let staged = TransientHandle::stage(Arc::clone(&self.downloads), &blob, self.config.cleanup_delay())?;
        self.downloads.save(staged.handle(), filename)
    }

    fn warn(&self, warning: &CaptureWarning) {
        diagnostics::emit(self.on_warning.as_ref(), warning);
    }
}

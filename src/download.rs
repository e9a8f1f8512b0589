//! Saving captures: staged handles with deferred, best-effort release
//!
//! A download stages the blob (the analogue of a browser object URL),
//! saves it under the caller's filename and then releases the staged
//! handle. Release is scheduled from a guard's `Drop`, a little after the
//! save, so it runs on every exit path and never fails the export.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::rendering::Blob;
use crate::{Error, Result};

/// Opaque reference to a staged blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagedHandle {
    id: String,
}

impl StagedHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Where downloads go.
///
/// Implementations must tolerate `release` being called from another task
/// or thread after `save` has returned.
pub trait DownloadManager: Send + Sync {
    /// Make `blob` addressable and return a handle to it
    fn stage(&self, blob: &Blob) -> Result<StagedHandle>;

    /// Save the staged blob as `filename`
    fn save(&self, handle: &StagedHandle, filename: &str) -> Result<()>;

    /// Free the staged blob
    fn release(&self, handle: &StagedHandle) -> Result<()>;
}

/// Check that `filename` is a plain file name with no directory parts.
pub fn validate_filename(filename: &str) -> Result<()> {
    let plain = Path::new(filename).file_name().and_then(|n| n.to_str()) == Some(filename);
    if filename.is_empty() || !plain {
        return Err(Error::InvalidOptions(format!(
            "download filename must be a plain file name, got {:?}",
            filename
        )));
    }
    Ok(())
}

/// Stages blobs as files in a staging directory and saves by copying them
/// into an output directory.
pub struct FsDownloadManager {
    staging_dir: PathBuf,
    output_dir: PathBuf,
    counter: AtomicU64,
}

impl FsDownloadManager {
    /// Save into `output_dir`, staging under the system temp directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_staging_dir(output_dir, std::env::temp_dir().join("deepzoom-capture"))
    }

    pub fn with_staging_dir(output_dir: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            output_dir: output_dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn staged_path(&self, handle: &StagedHandle) -> PathBuf {
        self.staging_dir.join(handle.id())
    }
}

impl DownloadManager for FsDownloadManager {
    fn stage(&self, blob: &Blob) -> Result<StagedHandle> {
        std::fs::create_dir_all(&self.staging_dir)
            .map_err(|e| Error::Download(format!("cannot create {}: {}", self.staging_dir.display(), e)))?;

        let digest = Sha256::digest(blob.as_bytes());
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let handle = StagedHandle::new(format!(
            "{}-{}-{}.{}",
            &hex::encode(digest)[..16],
            std::process::id(),
            seq,
            blob.format().extension()
        ));

        let path = self.staged_path(&handle);
        std::fs::write(&path, blob.as_bytes())
            .map_err(|e| Error::Download(format!("cannot stage {}: {}", path.display(), e)))?;
        log::debug!("staged {} bytes at {}", blob.len(), path.display());
        Ok(handle)
    }

    fn save(&self, handle: &StagedHandle, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| Error::Download(format!("cannot create {}: {}", self.output_dir.display(), e)))?;

        let target = self.output_dir.join(filename);
        std::fs::copy(self.staged_path(handle), &target)
            .map_err(|e| Error::Download(format!("cannot save {}: {}", target.display(), e)))?;
        log::info!("saved capture to {}", target.display());
        Ok(())
    }

    fn release(&self, handle: &StagedHandle) -> Result<()> {
        let path = self.staged_path(handle);
        std::fs::remove_file(&path)
            .map_err(|e| Error::Download(format!("cannot release {}: {}", path.display(), e)))
    }
}

/// A staged blob that is released shortly after the guard is dropped.
pub struct TransientHandle {
    manager: Arc<dyn DownloadManager>,
    handle: StagedHandle,
    release_delay: Duration,
}

impl TransientHandle {
    pub fn stage(manager: Arc<dyn DownloadManager>, blob: &Blob, release_delay: Duration) -> Result<Self> {
        let handle = manager.stage(blob)?;
        Ok(Self { manager, handle, release_delay })
    }

    pub fn handle(&self) -> &StagedHandle {
        &self.handle
    }
}

impl Drop for TransientHandle {
    fn drop(&mut self) {
        schedule_release(Arc::clone(&self.manager), self.handle.clone(), self.release_delay);
    }
}

/// Release `handle` after `delay`: on the async runtime when one is running,
/// otherwise on a short-lived thread.
fn schedule_release(manager: Arc<dyn DownloadManager>, handle: StagedHandle, delay: Duration) {
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn(async move {
                tokio::time::sleep(delay).await;
                release_now(manager.as_ref(), &handle);
            });
        }
        Err(_) => {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                release_now(manager.as_ref(), &handle);
            });
        }
    }
}

fn release_now(manager: &dyn DownloadManager, handle: &StagedHandle) {
    match manager.release(handle) {
        Ok(()) => log::debug!("released staged download {}", handle.id()),
        Err(e) => log::warn!("{} (ignored)", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::ImageFormat;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingManager {
        events: Mutex<Vec<String>>,
        fail_release: bool,
    }

    impl DownloadManager for RecordingManager {
        fn stage(&self, _blob: &Blob) -> Result<StagedHandle> {
            self.events.lock().unwrap().push("stage".into());
            Ok(StagedHandle::new("h1"))
        }

        fn save(&self, handle: &StagedHandle, filename: &str) -> Result<()> {
            self.events.lock().unwrap().push(format!("save {} {}", handle.id(), filename));
            Ok(())
        }

        fn release(&self, handle: &StagedHandle) -> Result<()> {
            self.events.lock().unwrap().push(format!("release {}", handle.id()));
            if self.fail_release {
                Err(Error::Download("already gone".into()))
            } else {
                Ok(())
            }
        }
    }

    fn blob() -> Blob {
        Blob::new(vec![1, 2, 3], ImageFormat::Png, 1, 1)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("deepzoom-capture-test-{}-{}", name, std::process::id()))
    }

    #[test]
    fn filename_validation() {
        assert!(validate_filename("capture.png").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("../capture.png").is_err());
        assert!(validate_filename("dir/capture.png").is_err());
        assert!(validate_filename("..").is_err());
    }

    #[tokio::test]
    async fn release_is_deferred_until_after_drop() {
        let manager = Arc::new(RecordingManager::default());
        {
            let transient = TransientHandle::stage(manager.clone(), &blob(), Duration::from_millis(20)).unwrap();
            manager.save(transient.handle(), "out.png").unwrap();
        }
        assert_eq!(*manager.events.lock().unwrap(), vec!["stage", "save h1 out.png"]);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(manager.events.lock().unwrap().last().unwrap(), "release h1");
    }

    #[test]
    fn release_without_runtime_uses_a_thread() {
        let manager = Arc::new(RecordingManager::default());
        drop(TransientHandle::stage(manager.clone(), &blob(), Duration::from_millis(5)).unwrap());
        std::thread::sleep(Duration::from_millis(100));
        assert!(manager.events.lock().unwrap().contains(&"release h1".to_string()));
    }

    #[tokio::test]
    async fn failed_release_is_swallowed() {
        let manager = Arc::new(RecordingManager { fail_release: true, ..Default::default() });
        drop(TransientHandle::stage(manager.clone(), &blob(), Duration::ZERO).unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.events.lock().unwrap().last().unwrap(), "release h1");
    }

    #[test]
    fn fs_manager_stages_saves_and_releases() {
        let out = scratch_dir("fs-out");
        let staging = scratch_dir("fs-staging");
        let manager = FsDownloadManager::with_staging_dir(&out, &staging);

        let handle = manager.stage(&blob()).unwrap();
        assert!(handle.id().ends_with(".png"));
        assert!(staging.join(handle.id()).exists());

        manager.save(&handle, "capture.png").unwrap();
        assert_eq!(std::fs::read(out.join("capture.png")).unwrap(), vec![1, 2, 3]);

        manager.release(&handle).unwrap();
        assert!(!staging.join(handle.id()).exists());
        assert!(manager.release(&handle).is_err());

        let _ = std::fs::remove_dir_all(&out);
        let _ = std::fs::remove_dir_all(&staging);
    }

    #[test]
    fn fs_manager_handles_are_unique() {
        let staging = scratch_dir("fs-unique");
        let manager = FsDownloadManager::with_staging_dir(scratch_dir("fs-unique-out"), &staging);
        let a = manager.stage(&blob()).unwrap();
        let b = manager.stage(&blob()).unwrap();
        assert_ne!(a, b);
        let _ = std::fs::remove_dir_all(&staging);
    }
}

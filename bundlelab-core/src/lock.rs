//! Advisory locks on a bundle's download cache.
//!
//! Every ingestion holds its bundle's cache lock shared for as long as it
//! runs. The cache is removed only under the exclusive lock, so it outlives
//! every ingestion still using it. Locks are `flock`-style (fs2), scoped to
//! the open file, and released on drop.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::BundleError;

/// A held cache lock.
#[derive(Debug)]
pub(crate) struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Block until the lock at `path` is held shared.
    pub(crate) fn shared(path: &Path) -> Result<Self, BundleError> {
        let file = open_lock_file(path)?;
        FileExt::lock_shared(&file).map_err(|e| BundleError::io(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock at `path` exclusively, or `None` while anyone else
    /// holds it.
    pub(crate) fn try_exclusive(path: &Path) -> Result<Option<Self>, BundleError> {
        let file = open_lock_file(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(BundleError::io(path, e)),
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        // Closing the file releases the lock as well.
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), "unlock failed: {e}");
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File, BundleError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BundleError::io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| BundleError::io(path, e))
}

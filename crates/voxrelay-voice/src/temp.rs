//! Temporary audio artifacts that delete themselves.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Owns a temporary file path and removes the file when dropped.
///
/// Drop runs on success, error and task cancellation alike, so every per-cycle artifact
/// is held by one of these until it is handed on or released.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop tracking the file and return its path; the caller becomes responsible for it.
    pub fn into_path(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(target: "voxrelay::engines", "removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                target: "voxrelay::engines",
                "could not remove temp file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

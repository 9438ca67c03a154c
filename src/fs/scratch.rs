//! Process-scoped scratch area for staging files.
//!
//! The directory is created lazily under the system temp dir on first use and
//! removed when the process exits through [`crate::cleanup`].

use rand::Rng;
use rand::distr::Alphanumeric;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::TempDir;

/// Scratch area shared by every session in this process.
pub static PROCESS_SCRATCH: ScratchArea = ScratchArea::new();

/// A lazily created private directory that is deleted on [`ScratchArea::cleanup`].
#[derive(Debug)]
pub struct ScratchArea {
    dir: Mutex<Option<TempDir>>,
}

impl ScratchArea {
    pub const fn new() -> Self {
        Self {
            dir: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<TempDir>> {
        self.dir.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Path of the scratch directory, creating it on first call.
    pub fn path(&self) -> io::Result<PathBuf> {
        let mut guard = self.lock();
        if let Some(dir) = guard.as_ref() {
            return Ok(dir.path().to_path_buf());
        }

        let dir = tempfile::Builder::new().prefix("sidelock-").tempdir()?;
        let path = dir.path().to_path_buf();
        tracing::debug!(scratch = %path.display(), "created scratch area");
        *guard = Some(dir);
        Ok(path)
    }

    /// Remove the directory and everything still in it.
    pub fn cleanup(&self) {
        if let Some(dir) = self.lock().take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(scratch = %path.display(), error = %e, "failed to remove scratch area");
            }
        }
    }
}

impl Default for ScratchArea {
    fn default() -> Self {
        Self::new()
    }
}

/// Random alphanumeric token of `len` characters.
pub fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A fresh, unique path inside `dir` named after `target`'s file name.
pub fn unique_path_for(dir: &Path, target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    dir.join(format!("{}{}", name, random_token(12)))
}

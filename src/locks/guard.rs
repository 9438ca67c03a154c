//! RAII guard for an acquired lock record.

use super::acquire::{Ownership, peek_ownership};
use super::record::LockRecord;
use crate::error::{Result, SidelockError};
use crate::fs::{Storage, remove_if_exists};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A lock record this process wrote and verified.
///
/// When dropped, the lock file is deleted if it still holds our record.
/// If deletion fails, a warning is logged but no panic occurs.
#[derive(Debug)]
pub struct LockGuard {
    storage: Arc<dyn Storage>,

    /// Path to the lock file.
    path: PathBuf,

    /// The record written at acquisition.
    record: LockRecord,

    /// Whether the lock has been released manually.
    released: bool,
}

impl LockGuard {
    pub(super) fn new(storage: Arc<dyn Storage>, path: PathBuf, record: LockRecord) -> Self {
        Self {
            storage,
            path,
            record,
            released: false,
        }
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Re-read the lock file and compare it with our record.
    pub fn ownership(&self) -> Ownership {
        peek_ownership(self.storage.as_ref(), &self.path, &self.record)
    }

    /// Delete the lock file if it still holds our record.
    ///
    /// Someone else's record is left alone. Calling this again after a
    /// successful release does nothing. Returns whether a file was removed.
    pub fn release(&mut self) -> Result<bool> {
        if self.released {
            return Ok(false);
        }

        let removed = match self.ownership() {
            Ownership::Ours => remove_if_exists(self.storage.as_ref(), &self.path)
                .map_err(|e| SidelockError::io(&self.path, e))?,
            other => {
                tracing::debug!(lock = %self.path.display(), state = ?other, "lock not ours at release, leaving it");
                false
            }
        };

        self.released = true;
        if removed {
            tracing::debug!(lock = %self.path.display(), "lock released");
        }
        Ok(removed)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

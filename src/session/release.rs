//! Releasable session state shared with the process cleanup registry.

use super::staging::Staging;
use crate::error::{Result, SidelockError};
use crate::fs::{Storage, remove_if_exists};
use crate::locks::LockGuard;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Files a session owns until it is released.
#[derive(Debug, Default)]
pub struct SessionState {
    pub(super) lock: Option<LockGuard>,
    pub(super) staging: Option<Staging>,
    /// Temporary backup to delete on release.
    pub(super) backup: Option<PathBuf>,
}

/// Release handle for one open session.
///
/// Held both by the session and by the process-wide registry, so that exit
/// and signal paths can release sessions the owning code never finished.
/// Release takes the files out of the state, which makes it idempotent.
#[derive(Debug)]
pub struct SessionCleanup {
    target: PathBuf,
    storage: Arc<dyn Storage>,
    state: Mutex<SessionState>,
}

impl SessionCleanup {
    pub fn new(target: &Path, storage: Arc<dyn Storage>, lock: LockGuard) -> Self {
        Self {
            target: target.to_path_buf(),
            storage,
            state: Mutex::new(SessionState {
                lock: Some(lock),
                ..SessionState::default()
            }),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub(super) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Lock the state for the duration of an exit sequence.
    pub(super) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Whether everything has already been released.
    pub fn is_released(&self) -> bool {
        let state = self.state();
        state.lock.is_none() && state.staging.is_none() && state.backup.is_none()
    }

    /// Discard staging and temporary backup, then drop the lock if it is
    /// still ours. Safe to call any number of times.
    pub fn release(&self) -> Result<()> {
        let mut state = self.state();
        self.release_locked(&mut state)
    }

    pub(super) fn release_locked(&self, state: &mut SessionState) -> Result<()> {
        let mut first_error = None;

        if let Some(staging) = state.staging.take()
            && let Err(e) = staging.discard()
        {
            tracing::warn!(staging = %staging.path().display(), error = %e, "failed to remove staging file");
            first_error.get_or_insert(SidelockError::io(staging.path(), e));
        }

        if let Some(backup) = state.backup.take()
            && let Err(e) = remove_if_exists(self.storage(), &backup)
        {
            tracing::warn!(backup = %backup.display(), error = %e, "failed to remove backup");
            first_error.get_or_insert(SidelockError::io(&backup, e));
        }

        if let Some(mut lock) = state.lock.take()
            && let Err(e) = lock.release()
        {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

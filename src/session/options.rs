//! Session options.

use crate::fs::{LocalStorage, Storage};
use crate::integrity::DEFAULT_CHUNK_SIZE;
use crate::locks::{AcquireOptions, Lease};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// When to keep a copy of the target next to it as `<target>.backup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupPolicy {
    /// No backup.
    #[default]
    None,
    /// Back up after acquisition, delete on release.
    DuringLock,
    /// Back up after acquisition and leave it in place.
    Keep,
}

/// Everything that shapes a protected session besides path and mode.
#[derive(Debug, Clone)]
pub struct ProtectOptions {
    /// Base retry interval while the lock is held elsewhere.
    pub wait: Duration,

    /// Optional lease for crash recovery.
    pub lease: Option<Lease>,

    /// Optional ceiling on the time spent waiting for the lock.
    pub max_wait: Option<Duration>,

    /// Override for the post-write settle delay.
    pub settle: Option<Duration>,

    /// Fingerprint the target at open and compare at commit, and verify
    /// the commit copy afterwards.
    pub verify_integrity: bool,

    /// Work on a private copy for writable modes.
    pub use_staging: bool,

    pub backup: BackupPolicy,

    /// Read size for fingerprinting.
    pub hash_chunk: usize,

    pub empty_lock_polls: u32,

    /// Directory for staging files; the process scratch area when `None`.
    pub scratch_dir: Option<PathBuf>,

    pub storage: Arc<dyn Storage>,
}

impl Default for ProtectOptions {
    fn default() -> Self {
        let acquire = AcquireOptions::default();
        Self {
            wait: acquire.wait,
            lease: None,
            max_wait: None,
            settle: None,
            verify_integrity: true,
            use_staging: true,
            backup: BackupPolicy::None,
            hash_chunk: DEFAULT_CHUNK_SIZE,
            empty_lock_polls: acquire.empty_lock_polls,
            scratch_dir: None,
            storage: Arc::new(LocalStorage),
        }
    }
}

impl ProtectOptions {
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = Some(Lease::new(lease));
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = Some(settle);
        self
    }

    pub fn with_verify_integrity(mut self, verify: bool) -> Self {
        self.verify_integrity = verify;
        self
    }

    pub fn with_staging(mut self, use_staging: bool) -> Self {
        self.use_staging = use_staging;
        self
    }

    pub fn with_backup(mut self, backup: BackupPolicy) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// The subset used by the acquisition loop.
    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            wait: self.wait,
            lease: self.lease,
            max_wait: self.max_wait,
            settle: self.settle,
            empty_lock_polls: self.empty_lock_polls,
        }
    }
}

//! Config struct definition and default implementation.

use crate::integrity::DEFAULT_CHUNK_SIZE;
use crate::session::BackupPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for protected sessions.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Lock settings
    // =========================================================================
    /// Base interval between lock attempts, in seconds (jittered 60-140%).
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: f64,

    /// Lease written into lock records, in seconds. No lease when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<f64>,

    /// Give up waiting for the lock after this many seconds. Unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_seconds: Option<f64>,

    /// Delay between writing a lock record and reading it back, in
    /// milliseconds. Derived from `wait_seconds` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_ms: Option<u64>,

    /// Polls of an empty lock file before it is treated as abandoned.
    #[serde(default = "default_empty_lock_polls")]
    pub empty_lock_polls: u32,

    // =========================================================================
    // Session settings
    // =========================================================================
    /// Fingerprint targets and verify commits.
    #[serde(default = "default_true")]
    pub verify_integrity: bool,

    /// Work on a private copy for writable modes.
    #[serde(default = "default_true")]
    pub use_staging: bool,

    /// Whether to keep `<target>.backup` during or after a write session.
    #[serde(default)]
    pub backup: BackupPolicy,

    /// Read size for fingerprinting, in KiB.
    #[serde(default = "default_hash_chunk_kib")]
    pub hash_chunk_kib: usize,

    /// Directory for staging files (default: a private temp dir per process).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,

    // =========================================================================
    // Storage settings
    // =========================================================================
    /// Copy command for storage that denies direct writes, with `{src}` and
    /// `{dst}` placeholders, e.g. `xrdcp -f {src} {dst}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_command: Option<String>,

    /// Remove command with a `{path}` placeholder, used alongside `copy_command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wait_seconds: default_wait_seconds(),
            lease_seconds: None,
            max_wait_seconds: None,
            settle_ms: None,
            empty_lock_polls: default_empty_lock_polls(),
            verify_integrity: default_true(),
            use_staging: default_true(),
            backup: BackupPolicy::default(),
            hash_chunk_kib: default_hash_chunk_kib(),
            scratch_dir: None,
            copy_command: None,
            remove_command: None,
        }
    }
}

fn default_wait_seconds() -> f64 {
    1.0
}

fn default_empty_lock_polls() -> u32 {
    15
}

fn default_hash_chunk_kib() -> usize {
    DEFAULT_CHUNK_SIZE / 1024
}

fn default_true() -> bool {
    true
}

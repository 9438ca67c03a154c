//! Error types for sidelock.
//!
//! Uses thiserror for derive macros. Every terminal error names the affected
//! path and, when the session's output was preserved, the side file holding it.

use crate::exit_codes;
use crate::integrity::Fingerprint;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main error type for sidelock operations.
#[derive(Error, Debug)]
pub enum SidelockError {
    /// Invalid arguments or an invalid request.
    #[error("{0}")]
    UserError(String),

    /// The target must exist for the requested mode but does not.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The target must not exist for the requested mode but does.
    #[error("file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The target is a directory, a symlink, or otherwise not a regular file.
    #[error("unsupported target '{}': {reason}", .path.display())]
    UnsupportedTarget { path: PathBuf, reason: String },

    /// The lock file cannot be created, and the privileged fallback failed too.
    #[error("cannot access '{}': permission denied", .0.display())]
    PermissionDenied(PathBuf),

    /// The lock record no longer belongs to this session, or its lease elapsed.
    #[error("lock on '{}' was lost: {reason}{}", .path.display(), saved_note(.saved))]
    LockLost {
        path: PathBuf,
        reason: String,
        saved: Option<PathBuf>,
    },

    /// The target was modified outside the protocol while the session held it.
    #[error(
        "'{}' changed during lock (before: {expected}, after: {found}){}",
        .path.display(),
        saved_note(.saved)
    )]
    CorruptionDetected {
        path: PathBuf,
        expected: Fingerprint,
        found: Fingerprint,
        saved: Option<PathBuf>,
    },

    /// Copying the staged result onto the target did not reproduce it.
    #[error("commit to '{}' failed: {reason}{}", .path.display(), saved_note(.saved))]
    CommitFailed {
        path: PathBuf,
        reason: String,
        saved: Option<PathBuf>,
    },

    /// The optional wait ceiling elapsed before the lock was acquired.
    #[error("gave up waiting for lock '{}' after {:.1}s", .path.display(), .waited.as_secs_f64())]
    Timeout { path: PathBuf, waited: Duration },

    /// Any other I/O failure on a protocol path.
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A command run under the lock exited unsuccessfully.
    #[error("command '{command}' failed with exit code {code}; changes were discarded")]
    CommandFailed { command: String, code: i32 },
}

fn saved_note(saved: &Option<PathBuf>) -> String {
    match saved {
        Some(path) => format!(". Saved calculation results in {}", path.display()),
        None => String::new(),
    }
}

impl SidelockError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        SidelockError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// The side file holding unsaved work, if the failure preserved any.
    pub fn saved_result(&self) -> Option<&Path> {
        match self {
            SidelockError::LockLost { saved, .. }
            | SidelockError::CorruptionDetected { saved, .. }
            | SidelockError::CommitFailed { saved, .. } => saved.as_deref(),
            _ => None,
        }
    }

    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SidelockError::UserError(_)
            | SidelockError::NotFound(_)
            | SidelockError::AlreadyExists(_)
            | SidelockError::UnsupportedTarget { .. }
            | SidelockError::Io { .. }
            | SidelockError::Config(_) => exit_codes::USER_ERROR,
            SidelockError::LockLost { .. } => exit_codes::LOCK_LOST,
            SidelockError::CorruptionDetected { .. } | SidelockError::CommitFailed { .. } => {
                exit_codes::CORRUPTION
            }
            SidelockError::Timeout { .. } => exit_codes::LOCK_TIMEOUT,
            SidelockError::PermissionDenied(_) => exit_codes::PERMISSION_DENIED,
            SidelockError::CommandFailed { code, .. } => (*code).clamp(1, 255),
        }
    }
}

/// Result type alias for sidelock operations.
pub type Result<T> = std::result::Result<T, SidelockError>;

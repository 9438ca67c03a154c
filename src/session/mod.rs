//! Protected file sessions.
//!
//! A session binds a target path, the lock record guarding it, an optional
//! staging copy, and the I/O handle the caller works with. Writable modes
//! work on the staging copy; the target is only touched at commit.
//!
//! # Exit sequence
//!
//! [`ProtectedFile::finish`] runs, in order:
//!
//! 1. Re-read the lock file: a record that is not ours means the lock was
//!    lost (`LockLost`), and the other holder's record is left in place.
//! 2. Check our own lease: an elapsed lease also counts as lost.
//! 3. Compare the target with the fingerprint taken at open: any change
//!    means something wrote to it outside the protocol (`CorruptionDetected`),
//!    and the target is not overwritten.
//! 4. Copy the staging file onto the target and verify the copy
//!    (`CommitFailed`, restoring from backup if one exists).
//! 5. Remove staging, temporary backup, and the lock file.
//!
//! Failures in steps 1-4 move the staging file to a `.result` side file
//! named in the error, so computed output is never silently dropped.
//!
//! [`ProtectedFile::abandon`] (and `Drop`) skip straight to step 5.

mod mode;
mod options;
mod release;
mod staging;

#[cfg(test)]
mod tests;

pub use mode::Mode;
pub use options::{BackupPolicy, ProtectOptions};
pub use release::SessionCleanup;
pub use staging::{Staging, backup_path, side_file_path};

use crate::cleanup;
use crate::error::{Result, SidelockError};
use crate::fs::scratch::PROCESS_SCRATCH;
use crate::integrity::Fingerprint;
use crate::locks::{self, Ownership, now_epoch, warn_if_writable};
use release::SessionState;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Run `body` on `path` under the lock and finish the session.
///
/// On `Ok` the session commits. On `Err` it is released without commit and
/// the body's error is returned unchanged.
pub fn protect<T, E, F>(
    path: impl AsRef<Path>,
    mode: Mode,
    options: &ProtectOptions,
    body: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(&mut ProtectedFile) -> std::result::Result<T, E>,
    E: From<SidelockError>,
{
    let mut file = ProtectedFile::open(path, mode, options)?;

    match body(&mut file) {
        Ok(value) => {
            file.finish()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(release_err) = file.abandon() {
                tracing::warn!(error = %release_err, "failed to release session after error");
            }
            Err(e)
        }
    }
}

/// An open, locked file.
///
/// Reads and writes go to the working copy. Call [`finish`](Self::finish) to
/// commit; dropping the value discards all changes.
#[derive(Debug)]
pub struct ProtectedFile {
    file: File,
    session: Session,
}

#[derive(Debug)]
struct Session {
    id: u64,
    target: PathBuf,
    mode: Mode,
    working: PathBuf,
    fingerprint: Option<Fingerprint>,
    verify_integrity: bool,
    hash_chunk: usize,
    /// Backup to restore from if the commit copy is bad.
    backup: Option<PathBuf>,
    cleanup: Arc<SessionCleanup>,
    done: bool,
}

impl ProtectedFile {
    /// Acquire the lock on `path` and open it in `mode`.
    ///
    /// # Errors
    ///
    /// * `NotFound` - `r`/`r+` on a missing target, or its directory is missing
    /// * `AlreadyExists` - `x` on an existing target
    /// * `UnsupportedTarget` - the target is a directory, symlink, or special file
    /// * `PermissionDenied` - the lock file cannot be written
    /// * `Timeout` - `max_wait` elapsed before the lock was acquired
    pub fn open(path: impl AsRef<Path>, mode: Mode, options: &ProtectOptions) -> Result<Self> {
        let target = path.as_ref().to_path_buf();
        check_target(&target, mode)?;
        warn_if_writable(options.lease, mode.writable(), &target);

        let guard = locks::lock(Arc::clone(&options.storage), &target, &options.acquire_options())?;

        // The target may have changed while we waited
        let exists = check_target(&target, mode)?;

        let handle = Arc::new(SessionCleanup::new(&target, Arc::clone(&options.storage), guard));
        let id = cleanup::register(Arc::clone(&handle));

        match Self::prepare(id, target, mode, exists, options, &handle) {
            Ok(file) => Ok(file),
            Err(e) => {
                if let Err(release_err) = handle.release() {
                    tracing::warn!(error = %release_err, "failed to release session after open error");
                }
                cleanup::deregister(id);
                Err(e)
            }
        }
    }

    fn prepare(
        id: u64,
        target: PathBuf,
        mode: Mode,
        exists: bool,
        options: &ProtectOptions,
        handle: &Arc<SessionCleanup>,
    ) -> Result<Self> {
        let staged = mode.writable() && options.use_staging;

        let fingerprint = if staged && options.verify_integrity && exists {
            Some(
                Fingerprint::capture(&target, options.hash_chunk)
                    .map_err(|e| SidelockError::io(&target, e))?,
            )
        } else {
            None
        };

        let mut state = handle.state();

        let backup = if mode.writable() && exists && options.backup != BackupPolicy::None {
            let backup = backup_path(&target);
            options
                .storage
                .copy(&target, &backup)
                .map_err(|e| SidelockError::io(&backup, e))?;
            if options.backup == BackupPolicy::DuringLock {
                state.backup = Some(backup.clone());
            }
            Some(backup)
        } else {
            None
        };

        let working = if staged {
            let dir = match &options.scratch_dir {
                Some(dir) => dir.clone(),
                None => PROCESS_SCRATCH
                    .path()
                    .map_err(|e| SidelockError::io("scratch area", e))?,
            };
            let seed = exists && mode.keeps_content();
            let staging = Staging::prepare(options.storage.as_ref(), &dir, &target, seed)
                .map_err(|e| SidelockError::io(&target, e))?;
            let path = staging.path().to_path_buf();
            state.staging = Some(staging);
            path
        } else {
            target.clone()
        };
        drop(state);

        let file = mode
            .open_options(staged)
            .open(&working)
            .map_err(|e| SidelockError::io(&working, e))?;

        tracing::debug!(
            session = id,
            file = %target.display(),
            %mode,
            working = %working.display(),
            "session opened"
        );

        Ok(Self {
            file,
            session: Session {
                id,
                target,
                mode,
                working,
                fingerprint,
                verify_integrity: options.verify_integrity,
                hash_chunk: options.hash_chunk,
                backup,
                cleanup: Arc::clone(handle),
                done: false,
            },
        })
    }

    /// The file the session protects.
    pub fn target(&self) -> &Path {
        &self.session.target
    }

    /// The path reads and writes actually go to (staging copy or target).
    pub fn path(&self) -> &Path {
        &self.session.working
    }

    pub fn mode(&self) -> Mode {
        self.session.mode
    }

    /// Whether writes go to a private copy.
    pub fn is_staged(&self) -> bool {
        self.session.working != self.session.target
    }

    /// Shared release handle, the same one the process registry holds.
    pub fn cleanup_handle(&self) -> Arc<SessionCleanup> {
        Arc::clone(&self.session.cleanup)
    }

    /// Read the whole working copy from the start.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_end(&mut buf))
            .map_err(|e| SidelockError::io(&self.session.working, e))?;
        Ok(buf)
    }

    /// Replace the working copy's contents with `content`.
    pub fn replace_contents(&mut self, content: &[u8]) -> Result<()> {
        let working = &self.session.working;
        if self.session.mode == Mode::Append {
            return Err(SidelockError::UserError(format!(
                "cannot replace contents of '{}' opened for append",
                working.display()
            )));
        }
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(content))
            .map_err(|e| SidelockError::io(working, e))
    }

    /// Commit the session and release the lock.
    pub fn finish(self) -> Result<()> {
        let ProtectedFile { file, mut session } = self;
        if session.mode.writable()
            && let Err(e) = file.sync_all()
        {
            tracing::debug!(working = %session.working.display(), error = %e, "sync before commit failed");
        }
        drop(file);
        session.finish()
    }

    /// Release the session without committing anything.
    pub fn abandon(self) -> Result<()> {
        let ProtectedFile { file, mut session } = self;
        drop(file);
        session.abandon()
    }
}

impl Session {
    fn finish(&mut self) -> Result<()> {
        self.done = true;
        let handle = Arc::clone(&self.cleanup);
        let mut state = handle.state();

        let outcome = self.exit_sequence(&handle, &state);
        let released = handle.release_locked(&mut state);
        drop(state);
        cleanup::deregister(self.id);

        match &outcome {
            Ok(()) => tracing::debug!(session = self.id, file = %self.target.display(), "session finished"),
            Err(e) => tracing::debug!(session = self.id, error = %e, "session aborted"),
        }
        outcome.and(released)
    }

    fn abandon(&mut self) -> Result<()> {
        self.done = true;
        let released = self.cleanup.release();
        cleanup::deregister(self.id);
        tracing::debug!(session = self.id, file = %self.target.display(), "session released without commit");
        released
    }

    fn exit_sequence(&self, handle: &SessionCleanup, state: &SessionState) -> Result<()> {
        let Some(lock) = state.lock.as_ref() else {
            return Err(SidelockError::LockLost {
                path: self.target.clone(),
                reason: "session was already released".to_string(),
                saved: None,
            });
        };

        let lost = match lock.ownership() {
            Ownership::Ours if lock.record().is_expired_at(now_epoch()) => Some(format!(
                "lease expired at epoch {}",
                lock.record().lease_deadline.unwrap_or_default()
            )),
            Ownership::Ours => None,
            Ownership::Foreign(other) => Some(format!(
                "lock is now held by {} (id {})",
                other.host(),
                other.identity
            )),
            Ownership::Missing | Ownership::Abandoned => Some("lock file was removed".to_string()),
            Ownership::Unreadable => Some("lock file no longer holds our record".to_string()),
        };

        // Reads surface this too: the data they saw may have been changing underneath
        if let Some(reason) = lost {
            return Err(SidelockError::LockLost {
                path: self.target.clone(),
                reason,
                saved: self.save_aside(state.staging.as_ref()),
            });
        }

        // Read-only and unstaged sessions have nothing to commit
        let Some(staging) = state.staging.as_ref() else {
            return Ok(());
        };

        if let Some(expected) = &self.fingerprint {
            let found = match expected.still_matches(&self.target, self.hash_chunk) {
                Ok(found) => found,
                Err(e) if e.kind() == io::ErrorKind::NotFound => Some(Fingerprint::missing()),
                Err(e) => {
                    return Err(SidelockError::CommitFailed {
                        path: self.target.clone(),
                        reason: format!("cannot verify target before commit: {}", e),
                        saved: self.save_aside(Some(staging)),
                    });
                }
            };
            if let Some(found) = found {
                return Err(SidelockError::CorruptionDetected {
                    path: self.target.clone(),
                    expected: expected.clone(),
                    found,
                    saved: self.save_aside(Some(staging)),
                });
            }
        }

        if let Err(e) = staging.commit(handle.storage(), &self.target) {
            return Err(SidelockError::CommitFailed {
                path: self.target.clone(),
                reason: e.to_string(),
                saved: self.save_aside(Some(staging)),
            });
        }

        if self.verify_integrity
            && let Some(reason) = self.commit_mismatch(staging)
        {
            self.restore_backup(handle);
            return Err(SidelockError::CommitFailed {
                path: self.target.clone(),
                reason,
                saved: self.save_aside(Some(staging)),
            });
        }

        Ok(())
    }

    /// Compare the committed target with the staging file.
    fn commit_mismatch(&self, staging: &Staging) -> Option<String> {
        let staged = match Fingerprint::capture(staging.path(), self.hash_chunk) {
            Ok(fp) => fp,
            Err(e) => return Some(format!("cannot read staging file after commit: {}", e)),
        };
        match staged.still_matches(&self.target, self.hash_chunk) {
            Ok(None) => None,
            Ok(Some(found)) => Some(format!(
                "target does not match staged output after copy (staged: {}, target: {})",
                staged, found
            )),
            Err(e) => Some(format!("cannot read target after commit: {}", e)),
        }
    }

    fn restore_backup(&self, handle: &SessionCleanup) {
        let Some(backup) = &self.backup else {
            return;
        };
        match handle.storage().copy(backup, &self.target) {
            Ok(()) => tracing::warn!(file = %self.target.display(), backup = %backup.display(), "restored target from backup"),
            Err(e) => tracing::warn!(file = %self.target.display(), error = %e, "failed to restore target from backup"),
        }
    }

    fn save_aside(&self, staging: Option<&Staging>) -> Option<PathBuf> {
        let staging = staging?;
        match staging.save_aside(&self.target) {
            Ok(side) => Some(side),
            Err(e) => {
                tracing::warn!(
                    staging = %staging.path().display(),
                    error = %e,
                    "failed to save session output aside"
                );
                None
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!(file = %self.target.display(), "session dropped without finish, discarding changes");
            if let Err(e) = self.abandon() {
                tracing::warn!(file = %self.target.display(), error = %e, "failed to release session");
            }
        }
    }
}

impl Read for ProtectedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for ProtectedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for ProtectedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Check the target's type and the mode's existence requirement.
///
/// Returns whether the target exists.
fn check_target(target: &Path, mode: Mode) -> Result<bool> {
    let unsupported = |reason: &str| SidelockError::UnsupportedTarget {
        path: target.to_path_buf(),
        reason: reason.to_string(),
    };

    let exists = match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => {
            return Err(unsupported("symbolic links are not supported"));
        }
        Ok(meta) if meta.is_dir() => return Err(unsupported("is a directory")),
        Ok(meta) if !meta.is_file() => return Err(unsupported("not a regular file")),
        Ok(_) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(SidelockError::io(target, e)),
    };

    if mode.must_exist() && !exists {
        return Err(SidelockError::NotFound(target.to_path_buf()));
    }
    if mode.must_not_exist() && exists {
        return Err(SidelockError::AlreadyExists(target.to_path_buf()));
    }
    Ok(exists)
}

//! The acquisition loop.
//!
//! Exclusive creation alone is not trusted: on networked filesystems two
//! writers can both be told they created the same file. After a successful
//! create the record is flushed, left to settle briefly, and read back; only
//! a byte-identical identity and origin counts as ownership. Everything else
//! (existing record, transient I/O failure, lost race) is retried after a
//! jittered sleep, reclaiming records whose lease has passed along the way.
//!
//! The settle delay is a heuristic for storage that propagates writes late,
//! not a proof of exclusion; it is tunable through [`AcquireOptions::settle`].

use super::lease::{Lease, now_epoch};
use super::record::{DecodeError, LockRecord};
use crate::error::{Result, SidelockError};
use crate::fs::scratch::PROCESS_SCRATCH;
use crate::fs::{Storage, remove_if_exists};
use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Interval between polls of an empty lock file.
const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Tunables for [`acquire`].
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Base interval between attempts; each sleep is jittered to 60-140%.
    pub wait: Duration,

    /// Lease written into the record, if any.
    pub lease: Option<Lease>,

    /// Give up with [`SidelockError::Timeout`] after this long. Unbounded if `None`.
    pub max_wait: Option<Duration>,

    /// Delay between writing a record and reading it back.
    /// Defaults to 1 ms plus a jittered thousandth of `wait`.
    pub settle: Option<Duration>,

    /// How many times an empty lock file is re-polled before it is deleted
    /// as abandoned.
    pub empty_lock_polls: u32,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(1),
            lease: None,
            max_wait: None,
            settle: None,
            empty_lock_polls: 15,
        }
    }
}

/// Result of reading a lock file back and comparing it with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// The file holds exactly the expected identity and origin.
    Ours,
    /// There is no lock file.
    Missing,
    /// The file stayed empty through every poll and was deleted.
    Abandoned,
    /// The file could not be read or parsed (likely mid-write).
    Unreadable,
    /// Someone else's record.
    Foreign(LockRecord),
}

/// Scale `base` by a uniform factor in `[0.6, 1.4)`.
pub fn jittered(base: Duration) -> Duration {
    base.mul_f64(rand::rng().random_range(0.6..1.4))
}

/// Block until this process owns a verified lock record at `lock_path`.
///
/// Returns the record that was written. Only `PermissionDenied` that the
/// storage cannot work around and the optional `max_wait` ceiling end the
/// loop with an error; all other contention is retried.
pub fn acquire(
    storage: &dyn Storage,
    lock_path: &Path,
    options: &AcquireOptions,
) -> Result<LockRecord> {
    Acquirer {
        storage,
        lock_path,
        options,
        started: Instant::now(),
    }
    .run()
}

/// Read the lock file and classify it relative to `expected`.
///
/// An empty file is polled up to `empty_polls` times before being deleted as
/// abandoned by a holder that crashed between creating and writing it.
pub fn check_ownership(
    storage: &dyn Storage,
    lock_path: &Path,
    expected: &LockRecord,
    empty_polls: u32,
) -> Ownership {
    let mut polls = 0;
    loop {
        match probe(storage, lock_path, expected) {
            Probe::Settled(ownership) => return ownership,
            Probe::Empty if polls < empty_polls => {
                polls += 1;
                thread::sleep(jittered(EMPTY_POLL_INTERVAL));
            }
            Probe::Empty => {
                tracing::debug!(lock = %lock_path.display(), "lock file stayed empty, removing it");
                if let Err(e) = remove_if_exists(storage, lock_path) {
                    tracing::debug!(lock = %lock_path.display(), error = %e, "failed to remove empty lock");
                }
                return Ownership::Abandoned;
            }
        }
    }
}

/// Single read without polling or deleting; an empty file is `Unreadable`.
pub fn peek_ownership(storage: &dyn Storage, lock_path: &Path, expected: &LockRecord) -> Ownership {
    match probe(storage, lock_path, expected) {
        Probe::Settled(ownership) => ownership,
        Probe::Empty => Ownership::Unreadable,
    }
}

enum Probe {
    Settled(Ownership),
    Empty,
}

fn probe(storage: &dyn Storage, lock_path: &Path, expected: &LockRecord) -> Probe {
    let bytes = match storage.read(lock_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Probe::Settled(Ownership::Missing),
        Err(e) => {
            tracing::debug!(lock = %lock_path.display(), error = %e, "cannot read lock file");
            return Probe::Settled(Ownership::Unreadable);
        }
    };

    match LockRecord::decode(&bytes) {
        Ok(found) if found.same_owner(expected) => Probe::Settled(Ownership::Ours),
        Ok(found) => {
            tracing::debug!(
                lock = %lock_path.display(),
                found = %found.identity,
                expected = %expected.identity,
                "lock record belongs to someone else"
            );
            Probe::Settled(Ownership::Foreign(found))
        }
        Err(DecodeError::Empty) => Probe::Empty,
        Err(DecodeError::Malformed(reason)) => {
            tracing::debug!(lock = %lock_path.display(), %reason, "cannot parse lock file");
            Probe::Settled(Ownership::Unreadable)
        }
    }
}

struct Acquirer<'a> {
    storage: &'a dyn Storage,
    lock_path: &'a Path,
    options: &'a AcquireOptions,
    started: Instant,
}

impl Acquirer<'_> {
    fn run(&self) -> Result<LockRecord> {
        loop {
            self.check_deadline()?;

            let record = LockRecord::generate(self.options.lease.map(|l| l.deadline_from_now()));
            let bytes = record
                .encode()
                .map_err(|e| SidelockError::UserError(format!("failed to encode lock record: {}", e)))?;

            tracing::debug!(
                lock = %self.lock_path.display(),
                identity = %record.identity,
                lease_deadline = ?record.lease_deadline,
                "trying to create lock file"
            );

            match self.storage.create_new(self.lock_path, &bytes) {
                Ok(()) => {
                    if self.settle_and_verify(&record) {
                        tracing::debug!(lock = %self.lock_path.display(), "lock acquired");
                        return Ok(record);
                    }
                    self.backoff();
                }
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    if !self.storage.has_privileged_copy() {
                        return Err(SidelockError::PermissionDenied(self.lock_path.to_path_buf()));
                    }
                    if self.storage.exists(self.lock_path) {
                        self.backoff();
                        continue;
                    }
                    if self.privileged_attempt(&record, &bytes)? {
                        tracing::debug!(lock = %self.lock_path.display(), "lock acquired via privileged copy");
                        return Ok(record);
                    }
                    self.backoff();
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(lock = %self.lock_path.display(), error = %e, "lock file not creatable yet");
                    self.backoff();
                }
                Err(e) => {
                    tracing::debug!(lock = %self.lock_path.display(), error = %e, "lock busy");
                    self.backoff();
                    self.reclaim_if_expired();
                }
            }
        }
    }

    fn check_deadline(&self) -> Result<()> {
        if let Some(max_wait) = self.options.max_wait
            && self.started.elapsed() >= max_wait
        {
            return Err(SidelockError::Timeout {
                path: self.lock_path.to_path_buf(),
                waited: self.started.elapsed(),
            });
        }
        Ok(())
    }

    /// Sleep a jittered `wait`, never past the `max_wait` ceiling.
    fn backoff(&self) {
        let mut pause = jittered(self.options.wait);
        if let Some(max_wait) = self.options.max_wait {
            pause = pause.min(max_wait.saturating_sub(self.started.elapsed()));
        }
        tracing::debug!(lock = %self.lock_path.display(), pause_secs = pause.as_secs_f64(), "waiting");
        thread::sleep(pause);
    }

    fn settle_delay(&self) -> Duration {
        self.options
            .settle
            .unwrap_or_else(|| Duration::from_millis(1) + jittered(self.options.wait / 1000))
    }

    fn settle_and_verify(&self, record: &LockRecord) -> bool {
        self.flush_and_settle(self.lock_path);
        check_ownership(self.storage, self.lock_path, record, self.options.empty_lock_polls)
            == Ownership::Ours
    }

    fn flush_and_settle(&self, path: &Path) {
        if let Err(e) = self.storage.sync(path) {
            tracing::debug!(lock = %path.display(), error = %e, "flush failed");
        }
        thread::sleep(self.settle_delay());
    }

    /// Delete the current record if its lease has passed.
    ///
    /// Deleting does not hand the lock to this process: whoever recreates the
    /// file first wins.
    fn reclaim_if_expired(&self) {
        let Some(record) = self.read_record() else {
            return;
        };

        let now = now_epoch();
        if !record.is_expired_at(now) {
            return;
        }

        // Another contender may have reclaimed and recreated the file since the first read
        if !self
            .read_record()
            .is_some_and(|current| current.same_owner(&record))
        {
            tracing::debug!(lock = %self.lock_path.display(), "expired record already replaced");
            return;
        }

        let overdue = now - record.lease_deadline.unwrap_or(now);
        match remove_if_exists(self.storage, self.lock_path) {
            Ok(_) => tracing::info!(
                lock = %self.lock_path.display(),
                holder = record.host(),
                overdue_secs = overdue,
                "reclaimed lock with expired lease"
            ),
            Err(e) => tracing::debug!(
                lock = %self.lock_path.display(),
                error = %e,
                "failed to reclaim expired lock"
            ),
        }
    }

    fn read_record(&self) -> Option<LockRecord> {
        let bytes = self.storage.read(self.lock_path).ok()?;
        LockRecord::decode(&bytes).ok()
    }

    /// Write the record through the storage's privileged copy.
    ///
    /// The record is staged in the scratch area, copied into place, left to
    /// settle, copied back, and compared. Returns `Ok(false)` when the round
    /// trip shows another writer won.
    fn privileged_attempt(&self, record: &LockRecord, bytes: &[u8]) -> Result<bool> {
        let scratch = PROCESS_SCRATCH
            .path()
            .map_err(|e| SidelockError::io("scratch area", e))?;
        let local = local_lock_path(&scratch, self.lock_path);

        let _ = fs::remove_file(&local);
        fs::write(&local, bytes).map_err(|e| SidelockError::io(&local, e))?;

        let pushed = self.storage.privileged_copy(&local, self.lock_path);
        let _ = fs::remove_file(&local);
        if let Err(e) = pushed {
            return self.privileged_failure(e);
        }

        self.flush_and_settle(self.lock_path);

        if let Err(e) = self.storage.privileged_copy(self.lock_path, &local) {
            return self.privileged_failure(e);
        }
        let verified = fs::read(&local)
            .ok()
            .and_then(|bytes| LockRecord::decode(&bytes).ok())
            .is_some_and(|found| found.same_owner(record));
        let _ = fs::remove_file(&local);

        Ok(verified)
    }

    fn privileged_failure(&self, e: io::Error) -> Result<bool> {
        if e.kind() == io::ErrorKind::PermissionDenied {
            tracing::debug!(lock = %self.lock_path.display(), error = %e, "privileged copy denied");
            Err(SidelockError::PermissionDenied(self.lock_path.to_path_buf()))
        } else {
            tracing::debug!(lock = %self.lock_path.display(), error = %e, "privileged copy failed");
            Ok(false)
        }
    }
}

fn local_lock_path(scratch: &Path, lock_path: &Path) -> PathBuf {
    let name = lock_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "record.lock".to_string());
    scratch.join(name)
}

//! Lock acquisition, inspection, and clearing operations.

use super::acquire::{AcquireOptions, acquire};
use super::guard::LockGuard;
use super::lease::now_epoch;
use super::record::LockRecord;
use super::types::LockInfo;
use crate::error::{Result, SidelockError};
use crate::fs::{Storage, remove_if_exists};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Path of the sidecar lock file for `target`: the target path plus `.lock`.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

/// Block until this process holds the lock on `target`.
///
/// # Returns
///
/// * `Ok(LockGuard)` - Verified ownership of `<target>.lock`
/// * `Err(SidelockError::NotFound)` - The directory holding the target is missing
/// * `Err(SidelockError::PermissionDenied)` - The lock file cannot be written at all
/// * `Err(SidelockError::Timeout)` - `max_wait` elapsed first
pub fn lock(
    storage: Arc<dyn Storage>,
    target: &Path,
    options: &AcquireOptions,
) -> Result<LockGuard> {
    // A missing directory would otherwise be retried forever as NotFound
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return Err(SidelockError::NotFound(parent.to_path_buf()));
    }

    let lock_path = lock_path_for(target);
    let record = acquire(storage.as_ref(), &lock_path, options)?;
    Ok(LockGuard::new(storage, lock_path, record))
}

/// Describe the lock currently held on `target`, if any.
pub fn inspect_lock(storage: &dyn Storage, target: &Path) -> Result<Option<LockInfo>> {
    let lock_path = lock_path_for(target);

    let bytes = match storage.read(&lock_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SidelockError::io(&lock_path, e)),
    };

    let record = LockRecord::decode(&bytes).ok();
    let expired = record
        .as_ref()
        .is_some_and(|r| r.is_expired_at(now_epoch()));

    Ok(Some(LockInfo {
        lock_path,
        target: target.to_path_buf(),
        record,
        expired,
    }))
}

/// Remove the lock on `target`.
///
/// A record that is readable and not expired belongs to a holder that may
/// still be working; removing it requires `force`.
///
/// # Returns
///
/// * `Ok(LockInfo)` - Information about the cleared lock
/// * `Err(SidelockError::UserError)` - No lock exists, or it is live and `force` is false
pub fn clear_lock(storage: &dyn Storage, target: &Path, force: bool) -> Result<LockInfo> {
    let info = inspect_lock(storage, target)?.ok_or_else(|| {
        SidelockError::UserError(format!("no lock held on '{}'", target.display()))
    })?;

    if info.is_live() && !force {
        return Err(SidelockError::UserError(format!(
            "lock is held: {}\nUse --force to remove it anyway.",
            info
        )));
    }

    remove_if_exists(storage, &info.lock_path)
        .map_err(|e| SidelockError::io(&info.lock_path, e))?;
    tracing::info!(lock = %info.lock_path.display(), forced = force, "lock cleared");

    Ok(info)
}

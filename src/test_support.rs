use crate::locks::{LockRecord, format_origin, lock_path_for};
use crate::session::ProtectOptions;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

static ENV_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Sets an environment variable for the guard's lifetime.
pub(crate) struct EnvGuard {
    key: &'static str,
    original: Option<OsString>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    pub(crate) fn set(key: &'static str, value: Option<&Path>) -> Self {
        // The process environment is global and not thread-safe.
        // Lock it so tests don't race even if a #[serial] annotation is missed.
        let lock = ENV_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
        let original = std::env::var_os(key);
        // SAFETY: access to the environment is serialized by ENV_LOCK.
        unsafe {
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
        Self {
            key,
            original,
            _lock: lock,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: still holding ENV_LOCK.
        unsafe {
            match &self.original {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }
}

/// Options with short waits so contended tests finish quickly.
pub(crate) fn fast_options() -> ProtectOptions {
    ProtectOptions::default()
        .with_wait(Duration::from_millis(20))
        .with_settle(Duration::from_millis(1))
}

/// A temp dir holding `data.txt`, written with `contents` unless `None`.
pub(crate) fn create_target(contents: Option<&[u8]>) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("data.txt");
    if let Some(contents) = contents {
        std::fs::write(&target, contents).unwrap();
    }
    (temp_dir, target)
}

/// Overwrite `target`'s lock file with a record owned by another host.
pub(crate) fn plant_foreign_lock(target: &Path, lease_deadline: Option<i64>) -> LockRecord {
    let record = LockRecord {
        identity: "00000000000000000001".to_string(),
        origin: format_origin("elsewhere"),
        lease_deadline,
    };
    std::fs::write(lock_path_for(target), record.encode().unwrap()).unwrap();
    record
}

/// Files in `dir` whose names end with `.result`.
pub(crate) fn side_files(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.to_string_lossy().ends_with(".result"))
        .collect();
    found.sort();
    found
}

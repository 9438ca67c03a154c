//! Private working copies for write sessions.

use crate::fs::scratch::unique_path_for;
use crate::fs::{Storage, move_file};
use chrono::Local;
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// A staging file in the scratch area.
#[derive(Debug)]
pub struct Staging {
    path: PathBuf,
}

impl Staging {
    /// Create a fresh staging file in `dir` for `target`.
    ///
    /// With `seed`, the target's current bytes are copied in; otherwise the
    /// staging file starts empty.
    pub fn prepare(
        storage: &dyn Storage,
        dir: &Path,
        target: &Path,
        seed: bool,
    ) -> io::Result<Self> {
        let path = unique_path_for(dir, target);

        if seed {
            storage.copy(target, &path)?;
        } else {
            File::create(&path)?;
        }

        tracing::debug!(
            staging = %path.display(),
            file = %target.display(),
            seeded = seed,
            "staging file ready"
        );
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite `target` with the staging bytes.
    pub fn commit(&self, storage: &dyn Storage, target: &Path) -> io::Result<()> {
        tracing::debug!(staging = %self.path.display(), file = %target.display(), "committing");
        storage.copy(&self.path, target)
    }

    /// Move the staging file next to `target` as a timestamped `.result`
    /// file and return its path.
    pub fn save_aside(&self, target: &Path) -> io::Result<PathBuf> {
        let side = side_file_path(target);
        move_file(&self.path, &side)?;
        tracing::warn!(saved = %side.display(), file = %target.display(), "saved session output aside");
        Ok(side)
    }

    /// Delete the staging file. Returns whether it still existed.
    pub fn discard(&self) -> io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// `<target>__<local timestamp>.result`, with a counter if that name is taken.
pub fn side_file_path(target: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S%.6f").to_string();
    let base = with_suffix(target, &format!("__{}", stamp));

    let first = with_suffix(&base, ".result");
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| with_suffix(&base, &format!("-{}.result", n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// `<target>.backup`
pub fn backup_path(target: &Path) -> PathBuf {
    with_suffix(target, ".backup")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalStorage;
    use tempfile::TempDir;

    #[test]
    fn prepare_seeds_from_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("data.txt");
        std::fs::write(&target, b"original").unwrap();

        let seeded = Staging::prepare(&LocalStorage, temp.path(), &target, true).unwrap();
        assert_eq!(std::fs::read(seeded.path()).unwrap(), b"original");

        let empty = Staging::prepare(&LocalStorage, temp.path(), &target, false).unwrap();
        assert_eq!(std::fs::read(empty.path()).unwrap(), b"");
        assert_ne!(seeded.path(), empty.path());
    }

    #[test]
    fn commit_overwrites_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("data.txt");
        std::fs::write(&target, b"old").unwrap();

        let staging = Staging::prepare(&LocalStorage, temp.path(), &target, false).unwrap();
        std::fs::write(staging.path(), b"new contents").unwrap();
        staging.commit(&LocalStorage, &target).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new contents");
    }

    #[test]
    fn save_aside_moves_to_result_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("data.txt");
        let staging = Staging::prepare(&LocalStorage, temp.path(), &target, false).unwrap();
        std::fs::write(staging.path(), b"work").unwrap();

        let side = staging.save_aside(&target).unwrap();

        let name = side.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("data.txt__"));
        assert!(name.ends_with(".result"));
        assert_eq!(std::fs::read(&side).unwrap(), b"work");
        assert!(!staging.path().exists());
    }

    #[test]
    fn discard_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("data.txt");
        let staging = Staging::prepare(&LocalStorage, temp.path(), &target, false).unwrap();

        assert!(staging.discard().unwrap());
        assert!(!staging.discard().unwrap());
    }

    #[test]
    fn side_file_names_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("data.txt");
        let first = side_file_path(&target);
        std::fs::write(&first, b"").unwrap();
        assert_ne!(side_file_path(&target), first);
    }

    #[test]
    fn backup_sits_next_to_target() {
        assert_eq!(
            backup_path(Path::new("/d/x.json")),
            PathBuf::from("/d/x.json.backup")
        );
    }
}

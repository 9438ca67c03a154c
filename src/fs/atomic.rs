//! Atomic replacement of file contents.
//!
//! Every replacement follows this pattern:
//! 1. Copy the new content to a uniquely named temporary file in the target's directory
//! 2. Sync the file to disk (fsync)
//! 3. Rename it over the target
//!
//! Rename is atomic only when source and destination share a filesystem, which
//! is why the temporary file lives next to the target. On crash a temporary
//! file named `.{filename}.{random}.tmp` may remain.

use super::scratch::random_token;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Atomically replace `target` with a byte-for-byte copy of `source`.
///
/// Readers of `target` see either the old or the new contents, never a mix.
pub fn atomic_copy<P: AsRef<Path>, Q: AsRef<Path>>(source: P, target: Q) -> io::Result<()> {
    let source = source.as_ref();
    let target = target.as_ref();
    let temp_path = generate_temp_path(target)?;

    if let Err(e) = fs::copy(source, &temp_path).and_then(|_| File::open(&temp_path)?.sync_all()) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    atomic_replace(&temp_path, target)
}

/// Generate a temporary file path in the same directory as the target.
fn generate_temp_path(target: &Path) -> io::Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid file path"))?;

    Ok(parent.join(format!(".{}.{}.tmp", filename, random_token(8))))
}

/// Rename `source` over `target`, then sync the directory entry.
fn atomic_replace(source: &Path, target: &Path) -> io::Result<()> {
    if let Err(e) = fs::rename(source, target) {
        let _ = fs::remove_file(source);
        return Err(e);
    }

    // Persist the directory entry; not supported everywhere, so best-effort.
    if let Some(parent) = target.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn test_atomic_copy_overwrites_target() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("staged.bin");
        let target = temp_dir.path().join("target.bin");
        let binary_content: Vec<u8> = (0..=255).collect();
        fs::write(&source, &binary_content).unwrap();
        fs::write(&target, b"a much longer original content that must disappear").unwrap();

        atomic_copy(&source, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), binary_content);
        assert_eq!(fs::read(&source).unwrap(), binary_content);
        assert!(leftover_temp_files(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_atomic_copy_missing_source_leaves_target_alone() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target.txt");
        fs::write(&target, b"keep me").unwrap();

        let err = atomic_copy(temp_dir.path().join("missing"), &target).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(fs::read(&target).unwrap(), b"keep me");
        assert!(leftover_temp_files(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_generate_temp_path_is_unique_and_hidden() {
        let target = Path::new("/some/path/file.txt");
        let a = generate_temp_path(target).unwrap();
        let b = generate_temp_path(target).unwrap();

        assert_eq!(a.parent().unwrap(), Path::new("/some/path"));
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".file.txt."));
        assert!(name.ends_with(".tmp"));
        assert_ne!(a, b);
    }
}

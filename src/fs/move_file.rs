//! File move helpers.
//!
//! Staging files live in a scratch area that is frequently on a different
//! device than the protected target, so a plain `rename(2)` surfaces `EXDEV`
//! ("Invalid cross-device link"). For those cases we fall back to an atomic
//! copy into place followed by deleting the source.

use super::atomic::atomic_copy;
use std::fs;
use std::io;
use std::path::Path;

/// Move a single file from `source` to `destination`.
///
/// - Tries `rename()` first (atomic when possible).
/// - Falls back to an atomic copy to `destination` + delete of `source` on EXDEV.
pub fn move_file<P: AsRef<Path>, Q: AsRef<Path>>(source: P, destination: Q) -> io::Result<()> {
    let source = source.as_ref();
    let destination = destination.as_ref();

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_rename(&e) => {
            atomic_copy(source, destination)?;
            fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}

fn is_cross_device_rename(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::CrossesDevices || err.raw_os_error() == Some(18)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn move_file_moves_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("file.txt");
        std::fs::write(&source, b"hello").unwrap();

        let destination = temp.path().join("moved.txt");
        move_file(&source, &destination).unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read(&destination).unwrap(), b"hello");
    }

    #[test]
    fn move_file_replaces_existing_destination_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source.txt");
        let destination = temp.path().join("destination.txt");

        std::fs::write(&source, b"new").unwrap();
        std::fs::write(&destination, b"old").unwrap();

        move_file(&source, &destination).unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read(&destination).unwrap(), b"new");
    }

    #[test]
    fn move_file_missing_source_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = move_file(temp.path().join("nope"), temp.path().join("dest")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}

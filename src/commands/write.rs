//! Implementation of the `sidelock write` command.
//!
//! Reads stdin into a private copy of the file and commits it once the input
//! is complete. If the file was touched by anything else in the meantime the
//! commit is refused and the new contents are saved next to it.

use super::load_config;
use crate::cli::{GlobalArgs, WriteArgs};
use crate::error::{Result, SidelockError};
use crate::session::{Mode, ProtectOptions, protect};
use std::io::{self, Read};
use std::path::Path;

/// Execute the `sidelock write` command.
pub fn cmd_write(global: &GlobalArgs, args: WriteArgs) -> Result<()> {
    let options = load_config(global)?.to_options()?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let written = copy_in(&args.path, args.mode, &options, &mut input)?;

    tracing::info!(path = %args.path.display(), bytes = written, "write committed");
    Ok(())
}

/// Copy `input` into `path` under a write lock. Returns the number of bytes copied.
pub(crate) fn copy_in<R: Read>(
    path: &Path,
    mode: Mode,
    options: &ProtectOptions,
    input: &mut R,
) -> Result<u64> {
    protect(path, mode, options, |file| {
        io::copy(input, file).map_err(|e| SidelockError::io(path, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::lock_path_for;
    use crate::test_support::{create_target, fast_options};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_write_replaces_contents() {
        let (_temp, target) = create_target(Some(b"old contents"));

        let written = copy_in(&target, Mode::Write, &fast_options(), &mut &b"new"[..]).unwrap();

        assert_eq!(written, 3);
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!lock_path_for(&target).exists());
    }

    #[test]
    #[serial]
    fn test_write_appends() {
        let (_temp, target) = create_target(Some(b"a\n"));

        copy_in(&target, Mode::Append, &fast_options(), &mut &b"b\n"[..]).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"a\nb\n");
    }

    #[test]
    #[serial]
    fn test_write_create_new_refuses_existing_file() {
        let (_temp, target) = create_target(Some(b"keep"));

        let err = copy_in(&target, Mode::CreateNew, &fast_options(), &mut &b"x"[..]).unwrap_err();

        assert!(matches!(err, SidelockError::AlreadyExists(_)));
        assert_eq!(std::fs::read(&target).unwrap(), b"keep");
    }

    #[test]
    #[serial]
    fn test_failed_input_discards_changes() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("pipe closed"))
            }
        }

        let (_temp, target) = create_target(Some(b"original"));

        let err = copy_in(&target, Mode::Write, &fast_options(), &mut Broken).unwrap_err();

        assert!(matches!(err, SidelockError::Io { .. }));
        assert_eq!(std::fs::read(&target).unwrap(), b"original");
        assert!(!lock_path_for(&target).exists());
    }
}

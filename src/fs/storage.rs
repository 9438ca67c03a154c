//! Storage backends.
//!
//! [`LocalStorage`] covers local disks and well-behaved network mounts.
//! [`CommandStorage`] adds a privileged copy (and optionally remove) command
//! for mounts where the kernel view denies writes that a vendor tool still
//! allows, e.g. `xrdcp -f {src} {dst}`.

use super::atomic::atomic_copy;
use crate::error::{Result, SidelockError};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::process::Command;

/// The filesystem operations the locking protocol relies on.
///
/// Errors keep their `io::ErrorKind` so that callers can tell contention
/// (`AlreadyExists`, transient failures) from fatal conditions
/// (`PermissionDenied`).
pub trait Storage: fmt::Debug + Send + Sync {
    /// Create `path` exclusively and write `contents`. Fails with
    /// `AlreadyExists` if anything is already at `path`.
    fn create_new(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Read the whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Byte size of the file.
    fn size(&self, path: &Path) -> io::Result<u64>;

    /// Whether a regular file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Delete the file.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Push the file's contents to stable storage.
    fn sync(&self, path: &Path) -> io::Result<()>;

    /// Overwrite `to` with the contents of `from`.
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy through a channel that bypasses ordinary permission checks.
    fn privileged_copy(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "storage has no privileged copy",
        ))
    }

    /// Whether [`Storage::privileged_copy`] is available.
    fn has_privileged_copy(&self) -> bool {
        false
    }
}

/// Remove `path`, treating "already gone" as success.
///
/// Returns whether a file was actually removed.
pub fn remove_if_exists(storage: &dyn Storage, path: &Path) -> io::Result<bool> {
    match storage.remove(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Plain `std::fs` storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn create_new(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;

        if let Err(e) = file.write_all(contents) {
            // Clean up the half-written file so it does not look like a record
            let _ = fs::remove_file(path);
            return Err(e);
        }
        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn sync(&self, path: &Path) -> io::Result<()> {
        File::open(path)?.sync_all()
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        atomic_copy(from, to)
    }
}

/// Local storage with external commands as a fallback for denied operations.
#[derive(Debug, Clone)]
pub struct CommandStorage {
    local: LocalStorage,
    copy_command: Vec<String>,
    remove_command: Option<Vec<String>>,
}

impl CommandStorage {
    /// Build from command templates.
    ///
    /// The copy template must contain `{src}` and `{dst}`; the remove template
    /// must contain `{path}`. Templates are split with shell quoting rules but
    /// never run through a shell.
    pub fn from_templates(copy: &str, remove: Option<&str>) -> Result<Self> {
        let copy_command = parse_template(copy, &["{src}", "{dst}"])?;
        let remove_command = remove
            .map(|template| parse_template(template, &["{path}"]))
            .transpose()?;

        Ok(Self {
            local: LocalStorage,
            copy_command,
            remove_command,
        })
    }

    fn run(&self, template: &[String], substitutions: &[(&str, &Path)]) -> io::Result<()> {
        let argv: Vec<String> = template
            .iter()
            .map(|arg| {
                substitutions
                    .iter()
                    .fold(arg.clone(), |acc, (key, path)| {
                        acc.replace(key, &path.to_string_lossy())
                    })
            })
            .collect();

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        tracing::debug!(command = %argv.join(" "), "running storage command");
        let output = Command::new(program).args(args).output()?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!(
                    "'{}' failed ({}): {}",
                    program,
                    output.status,
                    stderr.trim()
                ),
            ))
        }
    }
}

fn parse_template(template: &str, placeholders: &[&str]) -> Result<Vec<String>> {
    let argv = shell_words::split(template)
        .map_err(|e| SidelockError::Config(format!("invalid command '{}': {}", template, e)))?;

    if argv.is_empty() {
        return Err(SidelockError::Config("command must not be empty".to_string()));
    }
    for placeholder in placeholders {
        if !argv.iter().any(|arg| arg.contains(placeholder)) {
            return Err(SidelockError::Config(format!(
                "command '{}' is missing the {} placeholder",
                template, placeholder
            )));
        }
    }
    Ok(argv)
}

impl Storage for CommandStorage {
    fn create_new(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.local.create_new(path, contents)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.local.read(path)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        self.local.size(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.local.exists(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match (self.local.remove(path), &self.remove_command) {
            (Err(e), Some(command)) if e.kind() == io::ErrorKind::PermissionDenied => {
                self.run(command, &[("{path}", path)])
            }
            (result, _) => result,
        }
    }

    fn sync(&self, path: &Path) -> io::Result<()> {
        match self.local.sync(path) {
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok(()),
            result => result,
        }
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        match self.local.copy(from, to) {
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => self.privileged_copy(from, to),
            result => result,
        }
    }

    fn privileged_copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.run(&self.copy_command, &[("{src}", from), ("{dst}", to)])
    }

    fn has_privileged_copy(&self) -> bool {
        true
    }
}

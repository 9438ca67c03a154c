//! Session open modes.

use crate::error::SidelockError;
use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;

/// How a protected file is opened.
///
/// Parsed from the familiar `r`, `r+`, `w`, `x`, `a` strings; a `b` anywhere
/// in the string is accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `r`: read only; the target must exist. Never staged.
    Read,
    /// `r+`: read and write; the target must exist.
    ReadWrite,
    /// `w`: create or truncate.
    Write,
    /// `x`: create; the target must not exist.
    CreateNew,
    /// `a`: create if missing; writes go to the end.
    Append,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Read => "r",
            Mode::ReadWrite => "r+",
            Mode::Write => "w",
            Mode::CreateNew => "x",
            Mode::Append => "a",
        }
    }

    /// Whether the session can change the target.
    pub fn writable(&self) -> bool {
        !matches!(self, Mode::Read)
    }

    pub fn must_exist(&self) -> bool {
        matches!(self, Mode::Read | Mode::ReadWrite)
    }

    pub fn must_not_exist(&self) -> bool {
        matches!(self, Mode::CreateNew)
    }

    /// Whether the working copy starts from the target's current bytes.
    pub fn keeps_content(&self) -> bool {
        matches!(self, Mode::Read | Mode::ReadWrite | Mode::Append)
    }

    /// Options for opening the working handle.
    ///
    /// `staged` handles point at a scratch file that already exists, so
    /// exclusive creation only applies when writing the target directly.
    pub fn open_options(&self, staged: bool) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Mode::Read => {
                options.read(true);
            }
            Mode::ReadWrite => {
                options.read(true).write(true);
            }
            Mode::Write => {
                options.read(true).write(true).create(true).truncate(true);
            }
            Mode::CreateNew if staged => {
                options.read(true).write(true).create(true).truncate(true);
            }
            Mode::CreateNew => {
                options.read(true).write(true).create_new(true);
            }
            Mode::Append => {
                options.read(true).append(true).create(true);
            }
        }
        options
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = SidelockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != 'b').collect();
        match cleaned.as_str() {
            "r" => Ok(Mode::Read),
            "r+" => Ok(Mode::ReadWrite),
            "w" | "w+" => Ok(Mode::Write),
            "x" | "x+" => Ok(Mode::CreateNew),
            "a" | "a+" => Ok(Mode::Append),
            _ => Err(SidelockError::UserError(format!(
                "invalid mode '{}' (expected one of r, r+, w, x, a)",
                s
            ))),
        }
    }
}

//! Sidelock: cross-process advisory file protection built from sidecar lock files.
//!
//! A file `F` is protected by `F.lock`, created exclusively by whoever holds
//! it. Writers work on a private copy of `F` that is committed only if `F`
//! is unchanged when they finish. The protocol relies on nothing but file
//! creation and reads, so it works on shared filesystems where `flock` is
//! unreliable.
//!
//! ```no_run
//! use sidelock::session::{Mode, ProtectOptions, protect};
//!
//! let options = ProtectOptions::default();
//! protect("counter.txt", Mode::ReadWrite, &options, |file| {
//!     let n: u64 = String::from_utf8_lossy(&file.read_all()?).trim().parse().unwrap_or(0);
//!     file.replace_contents((n + 1).to_string().as_bytes())
//! })?;
//! # Ok::<(), sidelock::error::SidelockError>(())
//! ```

pub mod cleanup;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exit_codes;
pub mod fs;
pub mod integrity;
pub mod locks;
pub mod session;

#[cfg(test)]
mod test_support;

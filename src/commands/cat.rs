//! Implementation of the `sidelock cat` command.
//!
//! Streams a file to stdout while holding its lock, so the output is never a
//! half-written state produced by another writer.

use super::load_config;
use crate::cli::{CatArgs, GlobalArgs};
use crate::error::{Result, SidelockError};
use crate::session::{Mode, ProtectOptions, protect};
use std::io::{self, Write};
use std::path::Path;

/// Execute the `sidelock cat` command.
pub fn cmd_cat(global: &GlobalArgs, args: CatArgs) -> Result<()> {
    let options = load_config(global)?.to_options()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    copy_out(&args.path, &options, &mut out)?;
    Ok(())
}

/// Copy `path` into `out` under a read lock. Returns the number of bytes copied.
pub(crate) fn copy_out<W: Write>(path: &Path, options: &ProtectOptions, out: &mut W) -> Result<u64> {
    protect(path, Mode::Read, options, |file| {
        let copied = io::copy(file, out)
            .and_then(|copied| out.flush().map(|_| copied))
            .map_err(|e| SidelockError::io(path, e))?;
        Ok(copied)
    })
}

//! Implementation of the `sidelock lock` subcommands.

use super::load_config;
use crate::cli::{GlobalArgs, LockClearArgs, LockStatusArgs};
use crate::error::Result;
use crate::locks::{LockInfo, clear_lock, inspect_lock};
use std::path::Path;

/// Execute the `sidelock lock status` command.
pub fn cmd_lock_status(global: &GlobalArgs, args: LockStatusArgs) -> Result<()> {
    let storage = load_config(global)?.storage()?;
    let info = inspect_lock(storage.as_ref(), &args.path)?;
    println!("{}", status_line(&args.path, info.as_ref()));
    Ok(())
}

/// Execute the `sidelock lock clear` command.
///
/// Removes the lock on a file. A readable, unexpired lock is refused unless
/// `--force` is given, since its holder may still be working.
pub fn cmd_lock_clear(global: &GlobalArgs, args: LockClearArgs) -> Result<()> {
    let storage = load_config(global)?.storage()?;
    let cleared = clear_lock(storage.as_ref(), &args.path, args.force)?;

    if args.force && cleared.is_live() {
        eprintln!("Warning: forcibly cleared a lock whose holder may still be running.");
    }
    println!("Cleared lock: {}", cleared);
    Ok(())
}

fn status_line(path: &Path, info: Option<&LockInfo>) -> String {
    match info {
        Some(info) => format!("Locked: {}", info),
        None => format!("Not locked: {}", path.display()),
    }
}

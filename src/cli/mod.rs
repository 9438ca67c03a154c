//! CLI argument parsing for sidelock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use crate::session::Mode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Sidelock: safe read-modify-write of shared files across processes and hosts.
///
/// A file `F` is protected by a sidecar lock file `F.lock`. Writers work on a
/// private copy that is committed to `F` only if nothing else touched it.
#[derive(Parser, Debug)]
#[command(name = "sidelock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command. They override the config file.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Config file (default: $SIDELOCK_CONFIG, then built-in defaults).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Base retry interval in seconds while the lock is held elsewhere.
    #[arg(long, global = true, value_name = "SECS")]
    pub wait: Option<f64>,

    /// Lease in seconds; expired locks may be reclaimed by other processes.
    #[arg(long, global = true, value_name = "SECS")]
    pub lease: Option<f64>,

    /// Give up waiting for the lock after this many seconds.
    #[arg(long, global = true, value_name = "SECS")]
    pub max_wait: Option<f64>,

    /// Delay in milliseconds between writing the lock record and checking it.
    #[arg(long, global = true, value_name = "MS")]
    pub settle_ms: Option<u64>,

    /// Write to the target directly instead of a private copy.
    #[arg(long, global = true)]
    pub no_staging: bool,

    /// Skip fingerprint checks before and after commit.
    #[arg(long, global = true)]
    pub no_verify: bool,

    /// Log every protocol step to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands for sidelock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a file under a read lock.
    Cat(CatArgs),

    /// Write stdin to a file under a write lock.
    ///
    /// The data is committed only if the file was not modified by anything
    /// else while the lock was held.
    Write(WriteArgs),

    /// Run a command while holding the lock.
    ///
    /// The command finds the path to work on in $SIDELOCK_FILE. Changes are
    /// committed when it exits successfully and discarded otherwise.
    Exec(ExecArgs),

    /// Lock management commands.
    ///
    /// Inspect or clear the lock on a file.
    Lock(LockCommand),
}

/// Arguments for the `cat` command.
#[derive(Parser, Debug)]
pub struct CatArgs {
    /// File to read.
    pub path: PathBuf,
}

/// Arguments for the `write` command.
#[derive(Parser, Debug)]
pub struct WriteArgs {
    /// File to write.
    pub path: PathBuf,

    /// Open mode: w (replace), x (must not exist), a (append).
    #[arg(long, default_value = "w", value_parser = parse_write_mode)]
    pub mode: Mode,
}

/// Arguments for the `exec` command.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// File to protect.
    pub path: PathBuf,

    /// Open mode: r, r+, w, x, or a.
    #[arg(long, default_value = "r+", value_parser = parse_mode)]
    pub mode: Mode,

    /// Command and arguments to run.
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Show who holds the lock on a file.
    Status(LockStatusArgs),

    /// Remove the lock on a file.
    ///
    /// Locks that are readable and unexpired need --force.
    Clear(LockClearArgs),
}

/// Arguments for the `lock status` command.
#[derive(Parser, Debug)]
pub struct LockStatusArgs {
    /// Protected file (not the .lock file).
    pub path: PathBuf,
}

/// Arguments for the `lock clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Protected file (not the .lock file).
    pub path: PathBuf,

    /// Clear even if the holder may still be alive.
    #[arg(long)]
    pub force: bool,
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    s.parse::<Mode>().map_err(|e| e.to_string())
}

fn parse_write_mode(s: &str) -> Result<Mode, String> {
    match parse_mode(s)? {
        Mode::Read | Mode::ReadWrite => Err(format!("mode '{}' is not supported by write", s)),
        mode => Ok(mode),
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

//! Implementation of the `sidelock exec` command.
//!
//! Runs an external command while the lock is held. The command works on the
//! path in `$SIDELOCK_FILE`, which is the private copy when staging is on and
//! the target itself otherwise.

use super::load_config;
use crate::cleanup;
use crate::cli::{ExecArgs, GlobalArgs};
use crate::error::{Result, SidelockError};
use crate::session::{Mode, ProtectOptions, ProtectedFile};
use std::path::Path;
use std::process::{Command, ExitStatus};

/// Path the command should read and write.
pub const FILE_ENV: &str = "SIDELOCK_FILE";

/// The protected file itself, for display.
pub const TARGET_ENV: &str = "SIDELOCK_TARGET";

/// Execute the `sidelock exec` command.
pub fn cmd_exec(global: &GlobalArgs, args: ExecArgs) -> Result<()> {
    let options = load_config(global)?.to_options()?;
    run_locked(&args.path, args.mode, &options, &args.command)
}

/// Run `command` with `path` locked. Commits when it exits with status 0.
pub(crate) fn run_locked(
    path: &Path,
    mode: Mode,
    options: &ProtectOptions,
    command: &[String],
) -> Result<()> {
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| SidelockError::UserError("no command given to exec".to_string()))?;

    let file = ProtectedFile::open(path, mode, options)?;
    tracing::debug!(
        file = %file.target().display(),
        working = %file.path().display(),
        command = %shell_words::join(command),
        "running command under lock"
    );

    let mut child = Command::new(program);
    child
        .args(rest)
        .env(FILE_ENV, file.path())
        .env(TARGET_ENV, file.target());
    cleanup::unblock_signals_in_child(&mut child);
    let status = child.status();

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            discard(file);
            return Err(SidelockError::UserError(format!(
                "failed to run '{}': {}",
                program, e
            )));
        }
    };

    if status.success() {
        return file.finish();
    }

    discard(file);
    Err(SidelockError::CommandFailed {
        command: shell_words::join(command),
        code: exit_code_of(status),
    })
}

fn discard(file: ProtectedFile) {
    if let Err(e) = file.abandon() {
        tracing::warn!(error = %e, "failed to release lock after command failure");
    }
}

/// The code a shell would report for `status`.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return crate::exit_codes::SIGNAL_BASE + signal;
        }
    }

    1
}

//! Command implementations for sidelock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations, and the shared step that turns the config file plus
//! command-line overrides into session options.

mod cat;
mod exec;
mod lock;
mod write;

use crate::cli::{Cli, Command, GlobalArgs, LockAction, LockCommand};
use crate::config::Config;
use crate::error::Result;

pub use exec::{FILE_ENV, TARGET_ENV};

/// Dispatch a command to its implementation.
///
/// This is the main entry point for command execution. Each command
/// is routed to its handler function.
pub fn dispatch(cli: Cli) -> Result<()> {
    let Cli { global, command } = cli;

    match command {
        Command::Cat(args) => cat::cmd_cat(&global, args),
        Command::Write(args) => write::cmd_write(&global, args),
        Command::Exec(args) => exec::cmd_exec(&global, args),
        Command::Lock(lock_cmd) => dispatch_lock(&global, lock_cmd),
    }
}

/// Dispatch lock subcommands.
fn dispatch_lock(global: &GlobalArgs, lock_cmd: LockCommand) -> Result<()> {
    match lock_cmd.action {
        LockAction::Status(args) => lock::cmd_lock_status(global, args),
        LockAction::Clear(args) => lock::cmd_lock_clear(global, args),
    }
}

/// Load the config and apply command-line overrides on top of it.
pub(crate) fn load_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = Config::discover(global.config.as_deref())?;

    if let Some(wait) = global.wait {
        config.wait_seconds = wait;
    }
    if let Some(lease) = global.lease {
        config.lease_seconds = Some(lease);
    }
    if let Some(max_wait) = global.max_wait {
        config.max_wait_seconds = Some(max_wait);
    }
    if let Some(settle_ms) = global.settle_ms {
        config.settle_ms = Some(settle_ms);
    }
    if global.no_staging {
        config.use_staging = false;
    }
    if global.no_verify {
        config.verify_integrity = false;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_ENV;
    use crate::test_support::EnvGuard;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_overrides_apply_on_top_of_config_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sidelock.yaml");
        std::fs::write(&path, "wait_seconds: 4\nlease_seconds: 100\n").unwrap();

        let global = GlobalArgs {
            config: Some(path),
            lease: Some(20.0),
            no_verify: true,
            ..GlobalArgs::default()
        };
        let config = load_config(&global).unwrap();

        assert_eq!(config.wait_seconds, 4.0);
        assert_eq!(config.lease_seconds, Some(20.0));
        assert!(!config.verify_integrity);
        assert!(config.use_staging);
    }

    #[test]
    #[serial]
    fn test_invalid_override_is_rejected() {
        let _env = EnvGuard::set(CONFIG_ENV, None);
        let global = GlobalArgs {
            wait: Some(-1.0),
            ..GlobalArgs::default()
        };
        assert!(load_config(&global).is_err());
    }
}

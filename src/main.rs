//! Sidelock CLI entry point.
//!
//! Installs process cleanup, parses arguments, sets up logging, dispatches to
//! the command handler, and maps errors to exit codes.

use sidelock::cli::Cli;
use sidelock::{cleanup, commands, exit_codes};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a log filter, e.g. `sidelock=debug`.
const LOG_ENV: &str = "SIDELOCK_LOG";

fn main() -> ExitCode {
    // Must run before any other thread exists so they all inherit the signal mask
    if let Err(e) = cleanup::install() {
        eprintln!("Warning: signal cleanup unavailable: {}", e);
    }

    let cli = Cli::parse_args();
    init_tracing(cli.global.verbose);

    match commands::dispatch(cli) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            // Return appropriate exit code
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

//! Exit code constants for the sidelock CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, missing/existing target, unsupported target)
//! - 2: Lock lost (record replaced or lease elapsed before commit)
//! - 3: Corruption detected or commit verification failed
//! - 4: Gave up waiting for the lock
//! - 5: Permission denied on the lock file
//!
//! `exec` exits with the wrapped command's own code when it fails, and a
//! caught terminating signal exits with `128 + signal`.

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid target state, or configuration problems.
pub const USER_ERROR: i32 = 1;

/// The session no longer owned its lock record at commit time.
pub const LOCK_LOST: i32 = 2;

/// The target changed underneath the session, or the commit did not stick.
pub const CORRUPTION: i32 = 3;

/// The optional wait ceiling was reached before the lock was acquired.
pub const LOCK_TIMEOUT: i32 = 4;

/// The lock file could not be created, even through the privileged fallback.
pub const PERMISSION_DENIED: i32 = 5;

/// Offset added to a signal number when a caught signal terminates the process.
pub const SIGNAL_BASE: i32 = 128;

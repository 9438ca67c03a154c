//! Locking subsystem for sidelock.
//!
//! A target `T` is protected by a sidecar file `T.lock` whose existence is
//! the lock and whose content says who holds it.
//!
//! # Lock Files
//!
//! Lock files are created with **create_new** semantics and then verified by
//! reading them back, because exclusive creation is not reliable on every
//! network filesystem. See [`acquire`] for the full retry loop.
//!
//! # Lock Records
//!
//! Each lock file contains a fixed-width JSON record (see [`LockRecord`]):
//! - `ran`: random identity of the acquisition attempt
//! - `machine`: host of the writer
//! - `free_after`: optional lease deadline in epoch seconds
//!
//! # RAII Guards
//!
//! Locks are managed through [`LockGuard`], which deletes the lock file when
//! dropped if it still holds our record.

mod acquire;
mod guard;
mod lease;
mod operations;
mod record;
mod types;


// Re-export public API
pub use acquire::{
    AcquireOptions, Ownership, acquire, check_ownership, jittered, peek_ownership,
};
pub use guard::LockGuard;
pub use lease::{Lease, MIN_LEASE, now_epoch, warn_if_writable};
pub use operations::{clear_lock, inspect_lock, lock, lock_path_for};
pub use record::{DecodeError, LockRecord, format_origin};
pub use types::LockInfo;

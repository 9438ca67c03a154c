//! Filesystem primitives the locking protocol is built on.
//!
//! The protocol only needs a handful of operations with precise error
//! semantics (exclusive create, read, remove, size, flush, overwrite copy).
//! They are collected behind the [`Storage`] trait so that local disks and
//! remote mounts that need a privileged copy command can be swapped freely.

pub mod atomic;
mod move_file;
pub mod scratch;
pub mod storage;

pub use atomic::atomic_copy;
pub use move_file::move_file;
pub use storage::{CommandStorage, LocalStorage, Storage, remove_if_exists};

//! The lock record codec.
//!
//! A lock file holds one small JSON object with three fixed-width string
//! fields:
//!
//! ```text
//! {"ran": "<20-digit identity>", "machine": "<35-char host>", "free_after": "<15-char deadline>"}
//! ```
//!
//! - `ran`: random identity, zero-padded to 20 digits
//! - `machine`: hostname, right-aligned in 35 characters and truncated
//! - `free_after`: lease deadline in epoch seconds right-aligned in 15
//!   characters, or `-1` when the record carries no lease
//!
//! Fixed widths keep the file length identical for every record, so a
//! partially rewritten file never parses as a shorter, different record.
//! The separators (`": "`, `", "`) are part of the format and must be
//! reproduced byte for byte to interoperate with other writers.

use serde::{Deserialize, Serialize};
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Width of the identity field.
pub const IDENTITY_WIDTH: usize = 20;

/// Width of the origin field.
pub const ORIGIN_WIDTH: usize = 35;

/// Width of the lease deadline field.
pub const DEADLINE_WIDTH: usize = 15;

/// Deadline value meaning "no lease".
pub const NO_LEASE: i64 = -1;

/// Why a lock file's bytes could not be turned into a record.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The file has no content yet (still being written, or abandoned).
    #[error("lock record is empty")]
    Empty,

    /// The content is not a complete record.
    #[error("malformed lock record: {0}")]
    Malformed(String),
}

/// Ownership token written into a lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Fixed-width decimal identity, unique per acquisition attempt.
    pub identity: String,

    /// Fixed-width host label of the writer.
    pub origin: String,

    /// Lease deadline in epoch seconds; `None` when no lease was requested.
    pub lease_deadline: Option<i64>,
}

#[derive(Serialize, Deserialize)]
struct WireRecord {
    ran: String,
    machine: String,
    #[serde(default)]
    free_after: Option<String>,
}

/// JSON formatter producing `{"a": "x", "b": "y"}` spacing.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

impl LockRecord {
    /// Generate a fresh record for this process and host.
    pub fn generate(lease_deadline: Option<i64>) -> Self {
        Self {
            identity: fresh_identity(),
            origin: format_origin(&local_hostname()),
            lease_deadline,
        }
    }

    /// Serialize to the on-disk byte layout.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let wire = WireRecord {
            ran: self.identity.clone(),
            machine: self.origin.clone(),
            free_after: Some(format_deadline(self.lease_deadline)),
        };

        let mut out = Vec::with_capacity(128);
        let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
        wire.serialize(&mut ser)?;
        Ok(out)
    }

    /// Parse a record from lock file bytes.
    ///
    /// A missing or non-positive `free_after` means the record has no lease.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DecodeError::Empty);
        }

        let wire: WireRecord =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let lease_deadline = match wire.free_after.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| DecodeError::Malformed(format!("bad free_after '{}'", raw)))?;
                (value > 0).then_some(value)
            }
        };

        Ok(Self {
            identity: wire.ran,
            origin: wire.machine,
            lease_deadline,
        })
    }

    /// Whether `other` was written by the same acquisition attempt.
    pub fn same_owner(&self, other: &LockRecord) -> bool {
        self.identity == other.identity && self.origin == other.origin
    }

    /// Whether the lease deadline has passed at epoch second `now`.
    ///
    /// Records without a lease never expire.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.lease_deadline
            .is_some_and(|deadline| deadline > 0 && deadline < now)
    }

    /// The host label with its alignment padding removed.
    pub fn host(&self) -> &str {
        self.origin.trim()
    }
}

/// Random 63-bit value mixed with the process id and the sub-second clock,
/// zero-padded to [`IDENTITY_WIDTH`] digits.
fn fresh_identity() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    let value = (rand::random::<u64>() >> 1)
        .wrapping_add(u64::from(std::process::id()))
        .wrapping_add(nanos);

    let formatted = format!("{:0>width$}", value, width = IDENTITY_WIDTH);
    truncate_chars(&formatted, IDENTITY_WIDTH)
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Right-align `host` in [`ORIGIN_WIDTH`] characters, truncating long names.
pub fn format_origin(host: &str) -> String {
    let padded = format!("{:>width$}", host, width = ORIGIN_WIDTH);
    truncate_chars(&padded, ORIGIN_WIDTH)
}

fn format_deadline(deadline: Option<i64>) -> String {
    let value = deadline.unwrap_or(NO_LEASE);
    let padded = format!("{:>width$}", value, width = DEADLINE_WIDTH);
    truncate_chars(&padded, DEADLINE_WIDTH)
}

fn truncate_chars(s: &str, width: usize) -> String {
    s.chars().take(width).collect()
}

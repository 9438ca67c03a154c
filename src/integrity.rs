//! Content fingerprints for detecting third-party writes during a lock window.
//!
//! A fingerprint is the byte size plus a SHA-256 digest computed by streaming
//! the file in fixed-size chunks, so large files never have to fit in memory.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Default read chunk for hashing (128 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Size and content hash of a file at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Size in bytes.
    pub size: u64,

    /// Lowercase hex SHA-256 of the full contents.
    pub hash: String,
}

impl Fingerprint {
    /// Capture the fingerprint of `path`, reading `chunk_size` bytes at a time.
    pub fn capture<P: AsRef<Path>>(path: P, chunk_size: usize) -> io::Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut size = 0u64;

        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        Ok(Self {
            size,
            hash: format!("{:x}", hasher.finalize()),
        })
    }

    /// Stand-in for a file that no longer exists.
    pub fn missing() -> Self {
        Self {
            size: 0,
            hash: "(missing)".to_string(),
        }
    }

    /// Recompute the fingerprint of `path`; `Some(current)` if it changed.
    pub fn still_matches<P: AsRef<Path>>(&self, path: P, chunk_size: usize) -> io::Result<Option<Self>> {
        let current = Self::capture(path, chunk_size)?;
        if current == *self {
            Ok(None)
        } else {
            Ok(Some(current))
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.hash.get(..16).unwrap_or(&self.hash);
        write!(f, "{} bytes, sha256 {}", self.size, short)
    }
}

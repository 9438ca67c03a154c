//! Lock inspection types.

use super::record::LockRecord;
use chrono::DateTime;
use std::path::PathBuf;

/// Information about a lock file found next to a target.
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// The lock file path.
    pub lock_path: PathBuf,

    /// The file the lock protects.
    pub target: PathBuf,

    /// The parsed record, or `None` if the file is empty or unparseable.
    pub record: Option<LockRecord>,

    /// Whether the record's lease has passed.
    pub expired: bool,
}

impl LockInfo {
    /// Whether clearing this lock could interrupt a live holder.
    pub fn is_live(&self) -> bool {
        self.record.is_some() && !self.expired
    }

    fn lease_string(&self) -> String {
        match self.record.as_ref().and_then(|r| r.lease_deadline) {
            Some(deadline) => match DateTime::from_timestamp(deadline, 0) {
                Some(at) => format!("until {}", at.to_rfc3339()),
                None => format!("until epoch {}", deadline),
            },
            None => "none".to_string(),
        }
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.record {
            Some(record) => write!(
                f,
                "{} (holder: {}, id: {}, lease: {}{})",
                self.target.display(),
                record.host(),
                record.identity,
                self.lease_string(),
                if self.expired { ", EXPIRED" } else { "" }
            ),
            None => write!(
                f,
                "{} (unreadable record in {})",
                self.target.display(),
                self.lock_path.display()
            ),
        }
    }
}

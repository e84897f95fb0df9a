//! Audit log model for backup, rollback and wipe actions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Number of audit entries retained.
pub const AUDIT_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Backup,
    Restore,
    Rollback,
    ClearLocal,
    ClearRemote,
    ClearQueue,
}

impl AuditAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Rollback => "rollback",
            Self::ClearLocal => "clear-local",
            Self::ClearRemote => "clear-remote",
            Self::ClearQueue => "clear-queue",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backup" => Ok(Self::Backup),
            "restore" => Ok(Self::Restore),
            "rollback" => Ok(Self::Rollback),
            "clear-local" => Ok(Self::ClearLocal),
            "clear-remote" => Ok(Self::ClearRemote),
            "clear-queue" => Ok(Self::ClearQueue),
            other => Err(Error::validation(format!("unknown audit action: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub action: AuditAction,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

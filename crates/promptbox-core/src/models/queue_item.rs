//! Outbound mutation queue records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::{Prompt, PromptId};

/// Attempts after which an item is parked.
pub const MAX_ATTEMPTS: u32 = 5;

/// Kind of mutation recorded in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOp {
    Create,
    Update,
    Delete,
}

impl QueueOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::validation(format!("unknown queue op: {other}"))),
        }
    }
}

/// A buffered mutation intent awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Auto-assigned key
    pub id: i64,
    pub op: QueueOp,
    pub prompt_id: PromptId,
    /// Snapshot of the prompt needed to replay the operation
    pub payload: Prompt,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    /// Earliest time the item may be retried
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Whether the item exhausted `max_attempts` and awaits manual retry.
    #[must_use]
    pub const fn is_parked(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }

    /// Whether the item is eligible for a flush at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        !self.is_parked(max_attempts) && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

/// Snapshot of queue health for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Items still eligible for automatic retry
    pub pending: usize,
    /// Items that exhausted their attempts
    pub parked: usize,
    /// Items evicted by overflow since the store was created
    pub dropped_total: u64,
    pub oldest_created_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

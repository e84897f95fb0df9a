//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::{Prompt, PromptId};

/// A manual conflict between the local copy and the canonical remote copy.
///
/// Persisted until resolved; the local side also survives server-side as a
/// revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub prompt_id: PromptId,
    pub local: Prompt,
    pub remote: Prompt,
    /// Absolute difference between the two update times
    pub delta_ms: i64,
    /// Server revision holding the local (losing) side
    pub revision_id: Option<String>,
    pub detected_at: DateTime<Utc>,
}

impl ConflictRecord {
    #[must_use]
    pub fn new(local: Prompt, remote: Prompt, revision_id: Option<String>) -> Self {
        let delta_ms = (local.updated_at - remote.updated_at).num_milliseconds().abs();
        Self {
            prompt_id: remote.id,
            local,
            remote,
            delta_ms,
            revision_id,
            detected_at: crate::util::now(),
        }
    }
}

/// User choice for a manual conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Local content becomes canonical
    KeepLocal,
    /// Remote content stays canonical
    KeepRemote,
    /// Remote stays; local is cloned into a new `(copy)` prompt
    KeepBoth,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep-local",
            Self::KeepRemote => "keep-remote",
            Self::KeepBoth => "keep-both",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-local" => Ok(Self::KeepLocal),
            "keep-remote" => Ok(Self::KeepRemote),
            "keep-both" => Ok(Self::KeepBoth),
            other => Err(Error::validation(format!("unknown resolution: {other}"))),
        }
    }
}

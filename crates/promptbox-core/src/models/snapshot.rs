//! Protected pre-migration snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Prompt;

/// The local-only dataset captured before first sign-in.
///
/// Stays in place until the first merge finishes uploading, so an interrupted
/// merge restarts from this copy instead of the live store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSnapshot {
    pub owner_id: String,
    pub captured_at: DateTime<Utc>,
    pub prompts: Vec<Prompt>,
}

//! Wire types and the remote store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::checksum;
use crate::error::{Error, Result};
use crate::models::{normalize_tags, DeviceType, Prompt, PromptId};

/// A prompt as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntity {
    pub id: String,
    pub title: String,
    pub content: String,
    pub checksum: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub order: i64,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl WireEntity {
    /// Wire form of a local prompt with a freshly computed checksum.
    pub fn from_prompt(prompt: &Prompt) -> Self {
        Self {
            id: prompt.id.as_str(),
            title: prompt.title.clone(),
            content: prompt.content.clone(),
            checksum: checksum(&prompt.title, &prompt.content),
            tags: prompt.tags.iter().cloned().collect(),
            pinned: prompt.pinned,
            order: prompt.sort_order,
            updated_at: prompt.updated_at,
            created_at: Some(prompt.created_at),
            archived_at: prompt.archived_at,
            version: Some(prompt.version),
            device_id: prompt.device_id.clone(),
        }
    }

    /// Local prompt owned by `owner_id`.
    ///
    /// The id must be a UUID and the checksum is recomputed locally, so a
    /// remote that reports a different digest is rejected.
    pub fn into_prompt(self, owner_id: &str) -> Result<Prompt> {
        let id = PromptId::parse(&self.id)?;
        let local_checksum = checksum(&self.title, &self.content);
        if !crate::checksum::checksums_match(&local_checksum, &self.checksum) {
            return Err(Error::validation(format!(
                "remote checksum for {id} does not match its content"
            )));
        }
        let prompt = Prompt {
            id,
            owner_id: owner_id.to_string(),
            device_id: self.device_id,
            title: self.title,
            content: self.content,
            checksum: local_checksum,
            tags: normalize_tags(self.tags),
            pinned: self.pinned,
            sort_order: self.order,
            version: self.version.unwrap_or(1).max(1),
            created_at: self.created_at.unwrap_or(self.updated_at),
            updated_at: self.updated_at,
            archived_at: self.archived_at,
        };
        prompt.validate()?;
        Ok(prompt)
    }
}

/// One push/pull round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub device_id: String,
    /// Time of the last fully successful round
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Cursor returned by the last fully successful round
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    pub entities: Vec<WireEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedEntity {
    pub client_id: String,
    pub server_id: String,
    pub checksum: String,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConflict {
    pub entity_id: String,
    pub server_version: WireEntity,
    pub client_version: WireEntity,
    pub revision_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    #[serde(default)]
    pub synced: Vec<SyncedEntity>,
    #[serde(default)]
    pub conflicts: Vec<WireConflict>,
    /// Every entity changed since the request's cursor
    #[serde(default)]
    pub server_entities: Vec<WireEntity>,
    pub sync_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub device_name: String,
    pub device_type: DeviceType,
    /// Previously issued id, so registration can be repeated safely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceResponse {
    pub device_id: String,
    pub last_seen_at: DateTime<Utc>,
}

/// Server-side resolution strategy for a stored revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveStrategy {
    KeepCurrent,
    UseRevision,
    ManualMerge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    pub entity_id: String,
    pub revision_id: String,
    pub strategy: ResolveStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_data: Option<WireEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictResponse {
    pub success: bool,
    pub updated_entity: Option<WireEntity>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The shared remote store, seen only through its wire contract.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Push a batch and pull everything changed since the cursor.
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse>;

    async fn register_device(&self, request: &RegisterDeviceRequest)
        -> Result<RegisterDeviceResponse>;

    async fn resolve_conflict(
        &self,
        request: &ResolveConflictRequest,
    ) -> Result<ResolveConflictResponse>;

    /// Every entity of the signed-in account, archived ones included.
    async fn fetch_all(&self) -> Result<Vec<WireEntity>>;

    /// Delete every entity of the signed-in account.
    async fn clear_all(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LOCAL_OWNER;
    use pretty_assertions::assert_eq;

    #[test]
    fn wire_entity_uses_camel_case_contract() {
        let mut prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");
        prompt.sort_order = 4;
        let value = serde_json::to_value(WireEntity::from_prompt(&prompt)).unwrap();

        assert_eq!(value["order"], 4);
        assert!(value.get("updatedAt").is_some());
        assert!(value.get("archivedAt").is_none());
        assert_eq!(value["checksum"], prompt.checksum);
    }

    #[test]
    fn into_prompt_restores_local_record() {
        let mut prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");
        prompt.tags = normalize_tags(["Rust", "sync"]);
        let restored = WireEntity::from_prompt(&prompt)
            .into_prompt(LOCAL_OWNER)
            .unwrap();
        assert_eq!(restored, prompt);
    }

    #[test]
    fn into_prompt_rejects_bad_id_and_checksum() {
        let prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");

        let mut bad_id = WireEntity::from_prompt(&prompt);
        bad_id.id = "42".to_string();
        assert!(matches!(
            bad_id.into_prompt(LOCAL_OWNER),
            Err(Error::Validation(_))
        ));

        let mut bad_checksum = WireEntity::from_prompt(&prompt);
        bad_checksum.checksum = "0".repeat(64);
        assert!(matches!(
            bad_checksum.into_prompt(LOCAL_OWNER),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn sync_response_tolerates_missing_lists() {
        let response: SyncResponse = serde_json::from_str(r#"{"syncToken":"7"}"#).unwrap();
        assert!(response.synced.is_empty());
        assert_eq!(response.sync_token, "7");
    }

    #[test]
    fn resolve_strategy_is_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ResolveStrategy::UseRevision).unwrap(),
            "\"use-revision\""
        );
    }
}

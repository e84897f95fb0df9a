//! Self-describing backups of the local dataset, restore and rollback.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::{checksum, checksums_match};
use crate::error::{Error, Result};
use crate::models::{AuditAction, AuditEntry, Prompt, PromptId, QueueOp};
use crate::services::LocalStore;
use crate::sync::{RemoteStore, SyncQueue};
use crate::util::now;

/// Backup document format version.
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// Value that must be typed to allow a destructive restore.
pub const DESTRUCTIVE_CONFIRMATION: &str = "DELETE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub total_entities: usize,
    pub total_tags: usize,
    /// Prompt id to checksum
    pub checksums: BTreeMap<String, String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub manifest: BackupManifest,
    pub entities: Vec<Prompt>,
}

impl BackupDocument {
    /// Build a document over `prompts`.
    pub fn new(prompts: Vec<Prompt>, source: impl Into<String>) -> Self {
        let tags: BTreeSet<&str> = prompts
            .iter()
            .flat_map(|prompt| prompt.tags.iter().map(String::as_str))
            .collect();
        let manifest = BackupManifest {
            version: BACKUP_FORMAT_VERSION,
            exported_at: now(),
            total_entities: prompts.len(),
            total_tags: tags.len(),
            checksums: prompts
                .iter()
                .map(|prompt| (prompt.id.as_str(), prompt.checksum.clone()))
                .collect(),
            source: source.into(),
        };
        Self {
            manifest,
            entities: prompts,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Check the manifest against the entities, recomputing every checksum.
    pub fn verify(&self) -> Result<()> {
        if self.manifest.version > BACKUP_FORMAT_VERSION {
            return Err(Error::validation(format!(
                "backup format {} is newer than supported {BACKUP_FORMAT_VERSION}",
                self.manifest.version
            )));
        }
        if self.manifest.total_entities != self.entities.len() {
            return Err(Error::validation(format!(
                "manifest lists {} entities, document has {}",
                self.manifest.total_entities,
                self.entities.len()
            )));
        }
        for prompt in &self.entities {
            let id = prompt.id.as_str();
            let recorded = self
                .manifest
                .checksums
                .get(&id)
                .ok_or_else(|| Error::validation(format!("entity {id} missing from manifest")))?;
            let actual = checksum(&prompt.title, &prompt.content);
            if !checksums_match(recorded, &actual)
                || !checksums_match(&prompt.checksum, &actual)
            {
                return Err(Error::validation(format!("checksum mismatch for entity {id}")));
            }
        }
        Ok(())
    }
}

/// Default file name for a backup taken at `timestamp_ms`.
pub fn suggested_backup_file_name(timestamp_ms: i64) -> String {
    format!("promptbox-backup-{timestamp_ms}.json")
}

/// Independent toggles for a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    pub restore_local: bool,
    pub clear_local_first: bool,
    pub clear_remote_first: bool,
    /// Must equal [`DESTRUCTIVE_CONFIRMATION`] when a clear toggle is set
    pub confirmation: Option<String>,
}

impl RestoreOptions {
    pub const fn is_destructive(&self) -> bool {
        self.clear_local_first || self.clear_remote_first
    }

    fn check_confirmation(&self) -> Result<()> {
        if !self.is_destructive() {
            return Ok(());
        }
        match self.confirmation.as_deref().map(str::trim) {
            Some(DESTRUCTIVE_CONFIRMATION) => Ok(()),
            _ => Err(Error::ConfirmationRequired(format!(
                "type {DESTRUCTIVE_CONFIRMATION} to clear data before restoring"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub imported: usize,
    /// Entities whose checksum already exists locally or remotely
    pub skipped: usize,
    pub cleared_local: usize,
    pub cleared_remote: usize,
}

/// Export, restore and rollback of the local dataset.
#[derive(Clone)]
pub struct BackupService {
    store: LocalStore,
    queue: SyncQueue,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl BackupService {
    pub fn new(store: LocalStore, queue: SyncQueue, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            store,
            queue,
            remote,
        }
    }

    /// Export every prompt, archived ones included.
    pub async fn export(&self, source: &str) -> Result<BackupDocument> {
        let document = BackupDocument::new(self.store.all_prompts().await?, source);
        self.store
            .append_audit(
                AuditAction::Backup,
                &format!("exported {} prompts", document.manifest.total_entities),
            )
            .await?;
        tracing::info!(
            "Exported backup with {} prompts",
            document.manifest.total_entities
        );
        Ok(document)
    }

    pub async fn restore(
        &self,
        document: &BackupDocument,
        options: &RestoreOptions,
    ) -> Result<RestoreReport> {
        self.apply(document, options, AuditAction::Restore).await
    }

    /// Replace the local dataset with the backup's.
    pub async fn rollback(
        &self,
        document: &BackupDocument,
        confirmation: Option<String>,
    ) -> Result<RestoreReport> {
        let options = RestoreOptions {
            restore_local: true,
            clear_local_first: true,
            clear_remote_first: false,
            confirmation,
        };
        self.apply(document, &options, AuditAction::Rollback).await
    }

    pub async fn audit_log(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        self.store.list_audit(limit).await
    }

    async fn apply(
        &self,
        document: &BackupDocument,
        options: &RestoreOptions,
        action: AuditAction,
    ) -> Result<RestoreReport> {
        document.verify()?;
        options.check_confirmation()?;
        let mut report = RestoreReport::default();

        if options.clear_remote_first {
            let remote = self.remote.as_ref().ok_or_else(|| {
                Error::InvalidConfig("clearing the remote store needs a configured remote".into())
            })?;
            report.cleared_remote = remote.clear_all().await?;
            self.store
                .append_audit(
                    AuditAction::ClearRemote,
                    &format!("{} remote prompts deleted", report.cleared_remote),
                )
                .await?;
            tracing::info!("Cleared {} remote prompts", report.cleared_remote);
        }

        if options.clear_local_first {
            report.cleared_local = self.store.clear_local().await?;
            self.store
                .append_audit(
                    AuditAction::ClearLocal,
                    &format!("{} local prompts deleted", report.cleared_local),
                )
                .await?;
        }

        if options.restore_local {
            let mut known = self.known_checksums(options.clear_remote_first).await?;
            let owner_id = self.store.owner_id().await?;
            for entity in &document.entities {
                let digest = entity.checksum.to_ascii_lowercase();
                if known.contains(&digest) {
                    report.skipped += 1;
                    continue;
                }
                let mut prompt = entity.clone();
                prompt.id = PromptId::new();
                prompt.owner_id.clone_from(&owner_id);
                prompt.version = 1;
                prompt.device_id = None;
                prompt.refresh_checksum();
                self.queue.enqueue(&prompt, QueueOp::Create).await?;
                known.insert(digest);
                report.imported += 1;
            }
        }

        self.store
            .append_audit(
                action,
                &format!(
                    "imported {}, skipped {}, cleared {} local and {} remote",
                    report.imported, report.skipped, report.cleared_local, report.cleared_remote
                ),
            )
            .await?;
        tracing::info!(
            "{action} finished: imported {}, skipped {}",
            report.imported,
            report.skipped
        );
        Ok(report)
    }

    /// Checksums already present locally and, unless just cleared, remotely.
    async fn known_checksums(&self, remote_cleared: bool) -> Result<HashSet<String>> {
        let mut known: HashSet<String> = self
            .store
            .all_prompts()
            .await?
            .into_iter()
            .map(|prompt| prompt.checksum.to_ascii_lowercase())
            .collect();
        if let (Some(remote), false) = (&self.remote, remote_cleared) {
            known.extend(
                remote
                    .fetch_all()
                    .await?
                    .into_iter()
                    .map(|entity| entity.checksum.to_ascii_lowercase()),
            );
        }
        Ok(known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceType, LOCAL_OWNER};
    use crate::sync::{run_round, MemoryRemote, RetryPolicy, WireEntity};
    use pretty_assertions::assert_eq;

    fn service(remote: Option<Arc<MemoryRemote>>) -> (BackupService, LocalStore) {
        let store = LocalStore::open_in_memory().unwrap();
        let queue = SyncQueue::new(store.clone(), RetryPolicy::default());
        let remote = remote.map(|remote| remote as Arc<dyn RemoteStore>);
        (BackupService::new(store.clone(), queue, remote), store)
    }

    fn prompt(title: &str) -> Prompt {
        let mut prompt = Prompt::new(LOCAL_OWNER, title, format!("{title} body"));
        prompt.tags.insert("work".to_string());
        prompt
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn export_builds_manifest_and_audits() {
        let (service, store) = service(None);
        let first = prompt("one");
        store.save_prompt(&first).await.unwrap();
        store.save_prompt(&prompt("two")).await.unwrap();

        let document = service.export("cli").await.unwrap();

        assert_eq!(document.manifest.total_entities, 2);
        assert_eq!(document.manifest.total_tags, 1);
        assert_eq!(
            document.manifest.checksums.get(&first.id.as_str()),
            Some(&first.checksum)
        );
        document.verify().unwrap();
        let audit = service.audit_log(10).await.unwrap();
        assert_eq!(audit[0].action, AuditAction::Backup);
    }

    #[test]
    fn verify_detects_tampering() {
        let mut document = BackupDocument::new(vec![prompt("one")], "test");
        document.entities[0].content = "edited".to_string();
        assert!(matches!(document.verify(), Err(Error::Validation(_))));

        let document = BackupDocument::new(vec![prompt("one")], "test");
        let parsed = BackupDocument::from_json(&document.to_json().unwrap()).unwrap();
        assert_eq!(parsed, document);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_skips_remote_duplicates_and_uses_fresh_ids() {
        let remote = Arc::new(MemoryRemote::default());
        let existing = prompt("existing");
        remote.seed(WireEntity::from_prompt(&existing));
        let (service, store) = service(Some(remote));
        let fresh = prompt("fresh");
        let document = BackupDocument::new(vec![existing, fresh.clone()], "test");

        let report = service
            .restore(
                &document,
                &RestoreOptions {
                    restore_local: true,
                    ..RestoreOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.imported, 1);
        let local = store.all_prompts().await.unwrap();
        assert_eq!(local.len(), 1);
        assert_ne!(local[0].id, fresh.id);
        assert_eq!(local[0].title, "fresh");
        assert_eq!(local[0].version, 1);
        let queued = store.queue_items().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].op, QueueOp::Create);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn destructive_restore_needs_confirmation() {
        let (service, store) = service(None);
        store.save_prompt(&prompt("keep me")).await.unwrap();
        let document = BackupDocument::new(vec![prompt("one")], "test");

        let options = RestoreOptions {
            restore_local: true,
            clear_local_first: true,
            confirmation: Some("delete".to_string()),
            ..RestoreOptions::default()
        };
        let error = service.restore(&document, &options).await.unwrap_err();
        assert!(matches!(error, Error::ConfirmationRequired(_)));
        assert_eq!(store.all_prompts().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rollback_replaces_local_dataset() {
        let (service, store) = service(None);
        store.save_prompt(&prompt("current")).await.unwrap();
        let document = BackupDocument::new(vec![prompt("older")], "test");

        let report = service
            .rollback(&document, Some(DESTRUCTIVE_CONFIRMATION.to_string()))
            .await
            .unwrap();

        assert_eq!(report.cleared_local, 1);
        assert_eq!(report.imported, 1);
        let titles: Vec<String> = store
            .all_prompts()
            .await
            .unwrap()
            .into_iter()
            .map(|prompt| prompt.title)
            .collect();
        assert_eq!(titles, vec!["older".to_string()]);
        let actions: Vec<AuditAction> = service
            .audit_log(10)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::Rollback, AuditAction::ClearLocal]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rollback_pulls_synced_prompts_back_on_next_round() {
        let remote = Arc::new(MemoryRemote::default());
        let (service, store) = service(Some(remote.clone()));
        let identity = store
            .ensure_device("laptop", DeviceType::Desktop)
            .await
            .unwrap();
        let synced = prompt("synced");
        store
            .save_local_mutation(&synced, QueueOp::Create, 100)
            .await
            .unwrap();
        let batch = store.queue_items().await.unwrap();
        run_round(&store, remote.as_ref(), &identity, &batch)
            .await
            .unwrap();
        let document = service.export("test").await.unwrap();

        let report = service
            .rollback(&document, Some(DESTRUCTIVE_CONFIRMATION.to_string()))
            .await
            .unwrap();
        assert_eq!(report.cleared_local, 1);
        assert_eq!(report.skipped, 1);

        let identity = store.device_identity().await.unwrap().unwrap();
        assert_eq!(identity.sync_token, None);
        let round = run_round(&store, remote.as_ref(), &identity, &[])
            .await
            .unwrap();

        assert_eq!(round.pulled, 1);
        let local = store.all_prompts().await.unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, synced.id);
        assert_eq!(remote.entity_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clearing_remote_requires_a_remote() {
        let (service, _store) = service(None);
        let document = BackupDocument::new(Vec::new(), "test");
        let options = RestoreOptions {
            clear_remote_first: true,
            confirmation: Some(DESTRUCTIVE_CONFIRMATION.to_string()),
            ..RestoreOptions::default()
        };
        assert!(matches!(
            service.restore(&document, &options).await,
            Err(Error::InvalidConfig(_))
        ));
    }
}

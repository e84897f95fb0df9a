//! Shared local store handle used by the engine and every client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::db::{
    Database, DeviceRepository, DeviceScope, FullScope, ListQuery, MetaRepository, MetaScope,
    MutationScope, PromptRepository, PromptScope, QueueRepository, QueueScope, Scope,
    SqliteDeviceRepository, SqliteMetaRepository, SqlitePromptRepository, SqliteQueueRepository,
    UnitOfWork, KEY_DROPPED_TOTAL, KEY_LAST_FLUSH_ERROR, KEY_OWNER_ID,
};
use crate::error::Result;
use crate::models::{
    AuditAction, AuditEntry, ConflictRecord, DeviceIdentity, DeviceType, Prompt, PromptId, QueueItem, QueueOp,
    QueueStatus, TagCount, AUDIT_LOG_CAPACITY, LOCAL_OWNER,
};

/// Result of persisting one optimistic local edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationReceipt {
    pub queue_id: i64,
    /// Oldest queue items evicted to stay within capacity
    pub dropped: usize,
    pub dropped_total: u64,
}

/// Result of recording a failed delivery for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureSummary {
    pub updated: usize,
    /// Items that reached the attempt limit with this failure
    pub newly_parked: usize,
}

/// Thread-safe handle to the local `SQLite` store.
///
/// Cheap to clone. The application root opens it once and passes it down.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LocalStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Open the store at the given filesystem path, creating parent directories.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path)?;
        tracing::debug!("Opened local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Arc::new(Mutex::new(Database::open_in_memory()?)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `work` in one transaction scoped to the stores `S` grants.
    pub async fn unit_of_work<S, T, F>(&self, work: F) -> Result<T>
    where
        S: Scope,
        F: FnOnce(&UnitOfWork<'_, S>) -> Result<T> + Send,
        T: Send,
    {
        let mut db = self.db.lock().await;
        db.unit_of_work::<S, T, F>(work)
    }

    /// Owner id new prompts are written under.
    pub async fn owner_id(&self) -> Result<String> {
        let db = self.db.lock().await;
        let repo = SqliteMetaRepository::new(db.connection());
        Ok(repo
            .get_value(KEY_OWNER_ID)?
            .unwrap_or_else(|| LOCAL_OWNER.to_string()))
    }

    pub async fn set_owner_id(&self, owner_id: &str) -> Result<()> {
        let owner_id = owner_id.to_string();
        self.unit_of_work::<MetaScope, _, _>(move |uow| uow.meta().set_value(KEY_OWNER_ID, &owner_id))
            .await
    }

    pub async fn get_prompt(&self, id: &PromptId) -> Result<Option<Prompt>> {
        let db = self.db.lock().await;
        SqlitePromptRepository::new(db.connection()).get(id)
    }

    pub async fn list_prompts(&self, query: &ListQuery) -> Result<Vec<Prompt>> {
        let db = self.db.lock().await;
        SqlitePromptRepository::new(db.connection()).list(query)
    }

    /// Every prompt, archived ones included.
    pub async fn all_prompts(&self) -> Result<Vec<Prompt>> {
        self.list_prompts(&ListQuery {
            include_archived: true,
            ..ListQuery::default()
        })
        .await
    }

    pub async fn find_by_checksum(&self, checksum: &str) -> Result<Vec<Prompt>> {
        let db = self.db.lock().await;
        SqlitePromptRepository::new(db.connection()).find_by_checksum(checksum)
    }

    pub async fn list_tags(&self) -> Result<Vec<TagCount>> {
        let db = self.db.lock().await;
        SqlitePromptRepository::new(db.connection()).list_tags()
    }

    /// Persist an optimistic local edit and its queue item together.
    ///
    /// When the queue grows past `capacity` the oldest items are evicted; the
    /// running total is kept in sync metadata.
    pub async fn save_local_mutation(
        &self,
        prompt: &Prompt,
        op: QueueOp,
        capacity: usize,
    ) -> Result<MutationReceipt> {
        prompt.validate()?;
        let prompt = prompt.clone();
        let receipt = self
            .unit_of_work::<MutationScope, _, _>(move |uow| {
                uow.prompts().upsert(&prompt)?;
                let queue = uow.queue();
                let queue_id = queue.push(op, &prompt)?;
                let overflow = queue.len()?.saturating_sub(capacity);
                let dropped = queue.evict_oldest(overflow)?;
                let dropped_total = if dropped > 0 {
                    uow.meta()
                        .increment_counter(KEY_DROPPED_TOTAL, dropped as u64)?
                } else {
                    uow.meta().counter(KEY_DROPPED_TOTAL)?
                };
                Ok(MutationReceipt {
                    queue_id,
                    dropped,
                    dropped_total,
                })
            })
            .await?;

        if receipt.dropped > 0 {
            tracing::warn!(
                "Sync queue over capacity {capacity}: dropped {} oldest items ({} total)",
                receipt.dropped,
                receipt.dropped_total
            );
        }
        Ok(receipt)
    }

    /// Write a prompt without queueing it (remote-confirmed state).
    pub async fn save_prompt(&self, prompt: &Prompt) -> Result<()> {
        let prompt = prompt.clone();
        self.unit_of_work::<PromptScope, _, _>(move |uow| uow.prompts().upsert(&prompt))
            .await
    }

    /// Physically delete prompts archived before `cutoff`.
    pub async fn purge_archived(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let purged = self
            .unit_of_work::<PromptScope, _, _>(move |uow| {
                uow.prompts().purge_archived_before(cutoff)
            })
            .await?;
        tracing::info!("Purged {purged} prompts archived before {cutoff}");
        Ok(purged)
    }

    pub async fn due_queue_items(
        &self,
        max_attempts: u32,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).due(max_attempts, now, limit)
    }

    pub async fn queue_items(&self) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).list()
    }

    pub async fn queue_status(&self, max_attempts: u32) -> Result<QueueStatus> {
        let db = self.db.lock().await;
        let queue = SqliteQueueRepository::new(db.connection());
        let meta = SqliteMetaRepository::new(db.connection());
        let items = queue.list()?;
        Ok(QueueStatus {
            pending: queue.count_active(max_attempts)?,
            parked: queue.count_parked(max_attempts)?,
            dropped_total: meta.counter(KEY_DROPPED_TOTAL)?,
            oldest_created_at: items.first().map(|item| item.created_at),
            last_error: meta.get_value(KEY_LAST_FLUSH_ERROR)?,
        })
    }

    /// Record one failed delivery for every listed item.
    ///
    /// Each pair is a queue key and the time of its next allowed attempt.
    pub async fn record_flush_failure(
        &self,
        schedule: Vec<(i64, DateTime<Utc>)>,
        error: &str,
        max_attempts: u32,
    ) -> Result<FailureSummary> {
        let error = error.to_string();
        self.unit_of_work::<QueueScope, _, _>(move |uow| {
            let queue = uow.queue();
            let mut summary = FailureSummary::default();
            for (id, next_attempt_at) in schedule {
                if let Some(attempts) = queue.record_failure(id, next_attempt_at, &error)? {
                    summary.updated += 1;
                    if attempts == max_attempts {
                        summary.newly_parked += 1;
                    }
                }
            }
            uow.meta().set_value(KEY_LAST_FLUSH_ERROR, &error)?;
            Ok(summary)
        })
        .await
    }

    pub async fn clear_last_flush_error(&self) -> Result<()> {
        self.unit_of_work::<MetaScope, _, _>(|uow| uow.meta().remove_value(KEY_LAST_FLUSH_ERROR))
            .await
    }

    /// Reset parked items to zero attempts.
    pub async fn reset_parked(&self, max_attempts: u32) -> Result<usize> {
        self.unit_of_work::<QueueScope, _, _>(move |uow| uow.queue().reset_parked(max_attempts))
            .await
    }

    /// Discard the whole queue.
    pub async fn clear_queue(&self) -> Result<usize> {
        self.unit_of_work::<QueueScope, _, _>(|uow| {
            let removed = uow.queue().clear()?;
            uow.meta().remove_value(KEY_LAST_FLUSH_ERROR)?;
            uow.meta()
                .append_audit(
                    AuditAction::ClearQueue,
                    &format!("{removed} queue items discarded"),
                    AUDIT_LOG_CAPACITY,
                )?;
            Ok(removed)
        })
        .await
    }

    pub async fn device_identity(&self) -> Result<Option<DeviceIdentity>> {
        let db = self.db.lock().await;
        SqliteDeviceRepository::new(db.connection()).load()
    }

    /// Load the device identity, creating an unregistered one on first use.
    pub async fn ensure_device(&self, name: &str, device_type: DeviceType) -> Result<DeviceIdentity> {
        let name = name.to_string();
        self.unit_of_work::<DeviceScope, _, _>(move |uow| {
            let repo = uow.device();
            if let Some(identity) = repo.load()? {
                return Ok(identity);
            }
            let identity = DeviceIdentity::new_local(&name, device_type)?;
            repo.save(&identity)?;
            tracing::info!("Created local device identity {}", identity.device_id);
            Ok(identity)
        })
        .await
    }

    pub async fn save_device(&self, identity: &DeviceIdentity) -> Result<()> {
        let identity = identity.clone();
        self.unit_of_work::<DeviceScope, _, _>(move |uow| uow.device().save(&identity))
            .await
    }

    pub async fn append_audit(&self, action: AuditAction, detail: &str) -> Result<AuditEntry> {
        let detail = detail.to_string();
        self.unit_of_work::<MetaScope, _, _>(move |uow| {
            uow.meta().append_audit(action, &detail, AUDIT_LOG_CAPACITY)
        })
        .await
    }

    pub async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock().await;
        SqliteMetaRepository::new(db.connection()).list_audit(limit)
    }

    /// Persist open conflicts, replacing older records for the same prompts.
    pub async fn save_conflicts(&self, records: Vec<ConflictRecord>) -> Result<()> {
        self.unit_of_work::<MetaScope, _, _>(move |uow| {
            let meta = uow.meta();
            for record in &records {
                meta.save_conflict(record)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn open_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        SqliteMetaRepository::new(db.connection()).list_conflicts()
    }

    pub async fn delete_conflict(&self, prompt_id: &PromptId) -> Result<bool> {
        let prompt_id = *prompt_id;
        self.unit_of_work::<MetaScope, _, _>(move |uow| uow.meta().delete_conflict(&prompt_id))
            .await
    }

    /// Delete every prompt, tag, queue item and open conflict.
    ///
    /// The sync cursor is reset too, so the next round pulls the whole
    /// remote dataset back.
    pub async fn clear_local(&self) -> Result<usize> {
        let removed = self
            .unit_of_work::<FullScope, _, _>(|uow| {
                let removed = uow.prompts().delete_all()?;
                uow.queue().clear()?;
                uow.meta().clear_conflicts()?;
                uow.device().reset_sync()?;
                Ok(removed)
            })
            .await?;
        tracing::info!("Cleared {removed} prompts from the local store");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MAX_ATTEMPTS;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("promptbox.db");
        let store = LocalStore::open_path(&path).unwrap();
        assert_eq!(store.db_path(), Some(path.as_path()));
        assert!(path.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_mutation_writes_prompt_and_queue_item() {
        let store = LocalStore::open_in_memory().unwrap();
        let prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");

        let receipt = store
            .save_local_mutation(&prompt, QueueOp::Create, 10)
            .await
            .unwrap();

        assert_eq!(receipt.dropped, 0);
        assert_eq!(store.get_prompt(&prompt.id).await.unwrap(), Some(prompt));
        let items = store.queue_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, receipt.queue_id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_mutation_is_rejected_before_any_write() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");
        prompt.checksum = "nope".to_string();

        assert!(store
            .save_local_mutation(&prompt, QueueOp::Create, 10)
            .await
            .is_err());
        assert!(store.queue_items().await.unwrap().is_empty());
        assert!(store.get_prompt(&prompt.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overflow_drops_oldest_and_counts() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut first_id = None;
        for index in 0..5 {
            let prompt = Prompt::new(LOCAL_OWNER, format!("p{index}"), "body");
            first_id.get_or_insert(prompt.id);
            store
                .save_local_mutation(&prompt, QueueOp::Create, 3)
                .await
                .unwrap();
        }

        let items = store.queue_items().await.unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| Some(item.prompt_id) != first_id));

        let status = store.queue_status(MAX_ATTEMPTS).await.unwrap();
        assert_eq!(status.pending, 3);
        assert_eq!(status.dropped_total, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flush_failure_parks_at_limit() {
        let store = LocalStore::open_in_memory().unwrap();
        let prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");
        let receipt = store
            .save_local_mutation(&prompt, QueueOp::Create, 10)
            .await
            .unwrap();

        let mut parked = 0;
        for _ in 0..MAX_ATTEMPTS {
            let summary = store
                .record_flush_failure(
                    vec![(receipt.queue_id, crate::util::now())],
                    "offline",
                    MAX_ATTEMPTS,
                )
                .await
                .unwrap();
            parked += summary.newly_parked;
        }

        assert_eq!(parked, 1);
        let status = store.queue_status(MAX_ATTEMPTS).await.unwrap();
        assert_eq!(status.parked, 1);
        assert_eq!(status.pending, 0);
        assert_eq!(status.last_error.as_deref(), Some("offline"));

        assert_eq!(store.reset_parked(MAX_ATTEMPTS).await.unwrap(), 1);
        assert_eq!(store.queue_status(MAX_ATTEMPTS).await.unwrap().pending, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ensure_device_is_created_once() {
        let store = LocalStore::open_in_memory().unwrap();
        let first = store
            .ensure_device("laptop", DeviceType::Desktop)
            .await
            .unwrap();
        let second = store
            .ensure_device("other", DeviceType::Mobile)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_queue_is_audited() {
        let store = LocalStore::open_in_memory().unwrap();
        let prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");
        store
            .save_local_mutation(&prompt, QueueOp::Create, 10)
            .await
            .unwrap();

        assert_eq!(store.clear_queue().await.unwrap(), 1);
        let audit = store.list_audit(10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::ClearQueue);
        assert_eq!(store.get_prompt(&prompt.id).await.unwrap(), Some(prompt));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn owner_defaults_to_local() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.owner_id().await.unwrap(), LOCAL_OWNER);
        store.set_owner_id("user-1").await.unwrap();
        assert_eq!(store.owner_id().await.unwrap(), "user-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_local_resets_sync_cursor_and_conflicts() {
        let store = LocalStore::open_in_memory().unwrap();
        let identity = store
            .ensure_device("laptop", DeviceType::Desktop)
            .await
            .unwrap();
        let prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");
        store
            .save_local_mutation(&prompt, QueueOp::Create, 10)
            .await
            .unwrap();
        store
            .unit_of_work::<DeviceScope, _, _>(|uow| uow.device().record_sync("7", crate::util::now()))
            .await
            .unwrap();
        store
            .save_conflicts(vec![ConflictRecord::new(prompt.clone(), prompt, None)])
            .await
            .unwrap();

        assert_eq!(store.clear_local().await.unwrap(), 1);

        let cleared = store.device_identity().await.unwrap().unwrap();
        assert_eq!(cleared.device_id, identity.device_id);
        assert_eq!(cleared.sync_token, None);
        assert_eq!(cleared.last_sync_at, None);
        assert!(store.queue_items().await.unwrap().is_empty());
        assert!(store.open_conflicts().await.unwrap().is_empty());
    }
}

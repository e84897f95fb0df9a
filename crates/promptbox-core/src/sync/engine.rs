//! Application-facing sync engine: optimistic mutations, flushing and the
//! background loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::protocol::RemoteStore;
use super::queue::{RetryPolicy, SyncQueue};
use super::session::{register_device, run_round};
use crate::config::SyncSettings;
use crate::conflict::{ConflictResolver, ResolutionOutcome};
use crate::error::{Error, Result, RetryClass};
use crate::events::{EventBus, Subscription, SyncEvent, SyncState};
use crate::identity::IdentityHandle;
use crate::merge::{MergeOrchestrator, MigrationReport};
use crate::models::{
    normalize_tags, ConflictRecord, DeviceIdentity, DeviceType, NewPrompt, Prompt, PromptId,
    PromptPatch, QueueItem, Resolution,
};
use crate::services::{LocalStore, MutationReceipt, PromptService};
use crate::util::now;

/// Name used for the device identity when the application never set one.
pub const DEFAULT_DEVICE_NAME: &str = "promptbox";

/// Why a flush did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Skipped(SkipReason),
    Completed {
        sent: usize,
        confirmed: usize,
        pulled: usize,
        conflicts: usize,
    },
    /// The round failed; the batch was rescheduled with backoff
    Failed {
        error: String,
        retry_class: RetryClass,
        newly_parked: usize,
    },
}

/// Snapshot of everything a client shows about sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub online: bool,
    pub pending: usize,
    pub parked: usize,
    pub dropped_total: u64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub open_conflicts: usize,
}

struct EngineInner {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    settings: SyncSettings,
    queue: SyncQueue,
    prompts: PromptService,
    resolver: ConflictResolver,
    orchestrator: MergeOrchestrator,
    events: EventBus,
    /// Held for the duration of a round; a flush that cannot take it skips
    round: Mutex<()>,
    online: watch::Sender<bool>,
    state: watch::Sender<SyncState>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Offline-first sync engine over one local store and one remote.
///
/// Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncEngine")
            .field("store", &self.inner.store)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Build an engine. It starts online; call [`SyncEngine::spawn`] to run
    /// the background loop.
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>, settings: SyncSettings) -> Self {
        let events = EventBus::default();
        let queue = SyncQueue::new(store.clone(), RetryPolicy::from_settings(&settings));
        let resolver =
            ConflictResolver::new(store.clone(), remote.clone(), queue.clone(), events.clone());
        let orchestrator = MergeOrchestrator::new(
            store.clone(),
            remote.clone(),
            resolver.clone(),
            events.clone(),
            &settings,
        );
        let prompts = PromptService::new(store.clone(), queue.clone());
        let (online, _) = watch::channel(true);
        let (state, _) = watch::channel(SyncState::Synced);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                settings,
                queue,
                prompts,
                resolver,
                orchestrator,
                events,
                round: Mutex::new(()),
                online,
                state,
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.inner.queue
    }

    pub fn prompts(&self) -> &PromptService {
        &self.inner.prompts
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    fn set_state(&self, state: SyncState) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!("Sync state is now {state}");
            self.inner.events.publish(SyncEvent::StateChanged(state));
        }
    }

    async fn publish_queue_changed(&self) -> Result<()> {
        let status = self.inner.queue.status().await?;
        self.inner.events.publish(SyncEvent::QueueChanged {
            pending: status.pending,
            parked: status.parked,
        });
        Ok(())
    }

    async fn after_enqueue(&self, receipt: MutationReceipt) -> Result<()> {
        if receipt.dropped > 0 {
            self.inner.events.publish(SyncEvent::QueueOverflow {
                dropped: receipt.dropped,
                dropped_total: receipt.dropped_total,
            });
        }
        self.publish_queue_changed().await
    }

    async fn identity(&self) -> Result<DeviceIdentity> {
        match self.inner.store.device_identity().await? {
            Some(identity) => Ok(identity),
            None => {
                self.inner
                    .store
                    .ensure_device(DEFAULT_DEVICE_NAME, DeviceType::default())
                    .await
            }
        }
    }

    /// Create a prompt locally and queue it for upload.
    pub async fn create_prompt(&self, input: NewPrompt) -> Result<Prompt> {
        let (prompt, receipt) = self.inner.prompts.create(input).await?;
        self.after_enqueue(receipt).await?;
        Ok(prompt)
    }

    /// Apply `patch` locally and queue the result. An empty or no-op patch
    /// writes nothing.
    pub async fn update_prompt(&self, id: &PromptId, patch: PromptPatch) -> Result<Prompt> {
        let (prompt, receipt) = self.inner.prompts.update(id, patch).await?;
        if let Some(receipt) = receipt {
            self.after_enqueue(receipt).await?;
        }
        Ok(prompt)
    }

    /// Replace the tag set of a prompt.
    pub async fn set_tags<I, S>(&self, id: &PromptId, tags: I) -> Result<Prompt>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.update_prompt(
            id,
            PromptPatch {
                tags: Some(normalize_tags(tags)),
                ..PromptPatch::default()
            },
        )
        .await
    }

    /// Soft delete a prompt and queue the deletion.
    pub async fn archive_prompt(&self, id: &PromptId) -> Result<Prompt> {
        let (prompt, receipt) = self.inner.prompts.archive(id).await?;
        if let Some(receipt) = receipt {
            self.after_enqueue(receipt).await?;
        }
        Ok(prompt)
    }

    /// Flip connectivity. Going online wakes the background loop, which
    /// flushes immediately.
    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.send_replace(online);
        if previous == online {
            return;
        }
        tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        self.set_state(if online {
            SyncState::Synced
        } else {
            SyncState::Offline
        });
    }

    /// Send one batch and apply the response.
    ///
    /// Skips when offline or when another round is running. An unauthorized
    /// response fails fast: the error is returned and no attempt counter
    /// changes.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        if !self.is_online() {
            return Ok(FlushOutcome::Skipped(SkipReason::Offline));
        }
        let Ok(_round) = self.inner.round.try_lock() else {
            return Ok(FlushOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        self.set_state(SyncState::Syncing);
        let result = self.flush_round().await;
        if result.is_err() {
            self.set_state(SyncState::Error);
        }
        result
    }

    async fn flush_round(&self) -> Result<FlushOutcome> {
        let identity = self.identity().await?;
        let batch = self.inner.queue.next_batch(now()).await?;
        tracing::debug!("Flushing {} queue items", batch.len());

        match run_round(&self.inner.store, self.inner.remote.as_ref(), &identity, &batch).await {
            Ok(report) => {
                self.inner.store.clear_last_flush_error().await?;
                let conflicts = report.conflicts.len();
                self.inner.resolver.record(report.conflicts).await?;
                tracing::info!(
                    "Flush complete: sent {}, pulled {}, {conflicts} conflicts",
                    report.sent,
                    report.pulled
                );
                self.inner.events.publish(SyncEvent::FlushCompleted {
                    sent: report.sent,
                    conflicts,
                    pulled: report.pulled,
                });
                self.publish_queue_changed().await?;
                self.set_state(SyncState::Synced);
                Ok(FlushOutcome::Completed {
                    sent: report.sent,
                    confirmed: report.confirmed,
                    pulled: report.pulled,
                    conflicts,
                })
            }
            Err(error) => self.handle_failed_round(&batch, error).await,
        }
    }

    async fn handle_failed_round(
        &self,
        batch: &[QueueItem],
        error: Error,
    ) -> Result<FlushOutcome> {
        let retry_class = error.retry_class();
        let message = error.to_string();
        self.inner.events.publish(SyncEvent::FlushFailed {
            error: message.clone(),
            retry_class,
        });
        self.set_state(SyncState::Error);

        if retry_class == RetryClass::ReauthRequired {
            tracing::warn!("Flush rejected as unauthorized; re-authentication required");
            return Err(error);
        }

        tracing::warn!("Flush failed ({retry_class:?}): {message}");
        let summary = self.inner.queue.fail_batch(batch, &message, now()).await?;
        if summary.newly_parked > 0 {
            self.inner.events.publish(SyncEvent::ItemsParked {
                count: summary.newly_parked,
            });
        }
        self.publish_queue_changed().await?;
        Ok(FlushOutcome::Failed {
            error: message,
            retry_class,
            newly_parked: summary.newly_parked,
        })
    }

    /// Reset every parked item and flush right away.
    pub async fn retry_parked(&self) -> Result<FlushOutcome> {
        self.inner.queue.retry_parked().await?;
        self.publish_queue_changed().await?;
        self.flush().await
    }

    /// Discard the whole queue. Only for an explicit user wipe.
    pub async fn clear_queue(&self) -> Result<usize> {
        let removed = self.inner.queue.clear().await?;
        self.publish_queue_changed().await?;
        Ok(removed)
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let queue = self.inner.queue.status().await?;
        let identity = self.inner.store.device_identity().await?;
        Ok(SyncStatus {
            state: self.state(),
            online: self.is_online(),
            pending: queue.pending,
            parked: queue.parked,
            dropped_total: queue.dropped_total,
            oldest_pending_at: queue.oldest_created_at,
            last_sync_at: identity.and_then(|identity| identity.last_sync_at),
            last_error: queue.last_error,
            open_conflicts: self.inner.resolver.open_count().await?,
        })
    }

    pub async fn open_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        self.inner.resolver.open_conflicts().await
    }

    pub async fn resolve_conflict(
        &self,
        prompt_id: &PromptId,
        resolution: Resolution,
    ) -> Result<ResolutionOutcome> {
        let outcome = self.inner.resolver.resolve(prompt_id, resolution).await?;
        if outcome.copy.is_some() {
            self.publish_queue_changed().await?;
        }
        Ok(outcome)
    }

    pub async fn resolve_all(&self, resolution: Resolution) -> Result<Vec<ResolutionOutcome>> {
        let outcomes = self.inner.resolver.resolve_all(resolution).await?;
        self.publish_queue_changed().await?;
        Ok(outcomes)
    }

    /// Register this device with the remote.
    pub async fn register_device(
        &self,
        name: &str,
        device_type: DeviceType,
    ) -> Result<DeviceIdentity> {
        let identity =
            register_device(&self.inner.store, self.inner.remote.as_ref(), name, device_type)
                .await?;
        tracing::info!("Registered device {} as {}", identity.device_id, identity.name);
        Ok(identity)
    }

    /// Capture the local dataset ahead of a sign-in redirect.
    pub async fn protect_snapshot(&self) -> Result<usize> {
        Ok(self.inner.orchestrator.protect_snapshot().await?.prompts.len())
    }

    /// Run the first-sign-in merge for `user_id`. No-op once migrated.
    pub async fn migrate(&self, user_id: &str) -> Result<MigrationReport> {
        let _round = self.inner.round.lock().await;
        self.set_state(SyncState::Syncing);
        match self.inner.orchestrator.run(user_id).await {
            Ok(report) => {
                self.set_state(SyncState::Synced);
                Ok(report)
            }
            Err(error) => {
                self.set_state(SyncState::Error);
                Err(error)
            }
        }
    }

    /// Physically delete prompts archived longer than the retention period.
    pub async fn purge(&self) -> Result<usize> {
        let cutoff = now() - self.inner.settings.archive_retention();
        self.inner.store.purge_archived(cutoff).await
    }

    async fn background_flush(&self, trigger: &str) {
        match self.flush().await {
            Ok(FlushOutcome::Skipped(reason)) => {
                tracing::trace!("Skipped {trigger} flush: {reason:?}");
            }
            Ok(outcome) => tracing::debug!("{trigger} flush finished: {outcome:?}"),
            Err(error) => tracing::warn!("{trigger} flush failed: {error}"),
        }
    }

    /// Start the background loop: a flush every interval and one as soon as
    /// connectivity comes back.
    pub async fn spawn(&self) {
        let engine = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut online = self.inner.online.subscribe();
        let interval = self.inner.settings.flush_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!("Sync loop started ({}s interval)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.background_flush("interval").await,
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *online.borrow_and_update() {
                            engine.background_flush("reconnect").await;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::info!("Sync loop stopped");
        });
        self.inner.tasks.lock().await.push(handle);
    }

    /// Run the first-sign-in merge whenever a user id appears on `identity`.
    pub async fn watch_identity(&self, identity: &IdentityHandle) {
        let engine = self.clone();
        let mut users = identity.subscribe();
        let mut shutdown = self.inner.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                let user = users.borrow_and_update().clone();
                if let Some(user_id) = user {
                    match engine.migrate(&user_id).await {
                        Ok(report) if !report.already_migrated => {
                            tracing::info!("Signed-in merge finished for {user_id}");
                        }
                        Ok(_) => {}
                        Err(error) => tracing::warn!("Merge for {user_id} failed: {error}"),
                    }
                }
                tokio::select! {
                    changed = users.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        self.inner.tasks.lock().await.push(handle);
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let handles: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::warn!("Sync task ended abnormally: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueueOp, LOCAL_OWNER, MAX_ATTEMPTS};
    use crate::sync::{MemoryRemote, WireEntity};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn engine_with(settings: SyncSettings) -> (SyncEngine, Arc<MemoryRemote>) {
        let store = LocalStore::open_in_memory().unwrap();
        let remote = Arc::new(MemoryRemote::default());
        (SyncEngine::new(store, remote.clone(), settings), remote)
    }

    fn engine() -> (SyncEngine, Arc<MemoryRemote>) {
        engine_with(SyncSettings::default())
    }

    fn new_prompt(title: &str) -> NewPrompt {
        NewPrompt {
            title: title.to_string(),
            content: "body".to_string(),
            ..NewPrompt::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_then_flush_confirms() {
        let (engine, remote) = engine();
        let prompt = engine.create_prompt(new_prompt("Hello")).await.unwrap();
        assert_eq!(engine.status().await.unwrap().pending, 1);

        let outcome = engine.flush().await.unwrap();

        assert_eq!(
            outcome,
            FlushOutcome::Completed {
                sent: 1,
                confirmed: 1,
                pulled: 1,
                conflicts: 0,
            }
        );
        assert!(remote.entity(&prompt.id.as_str()).is_some());
        let status = engine.status().await.unwrap();
        assert_eq!(status.pending, 0);
        assert_eq!(status.state, SyncState::Synced);
        assert!(status.last_sync_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_flush_is_skipped() {
        let (engine, remote) = engine();
        engine.create_prompt(new_prompt("Hello")).await.unwrap();
        engine.set_online(false);

        assert_eq!(
            engine.flush().await.unwrap(),
            FlushOutcome::Skipped(SkipReason::Offline)
        );
        assert_eq!(remote.sync_calls(), 0);
        assert_eq!(engine.state(), SyncState::Offline);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_flush_is_skipped() {
        let (engine, _remote) = engine();
        let _held = engine.inner.round.lock().await;
        assert_eq!(
            engine.flush().await.unwrap(),
            FlushOutcome::Skipped(SkipReason::AlreadyRunning)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn network_failure_increments_attempts() {
        let (engine, remote) = engine();
        engine.create_prompt(new_prompt("Hello")).await.unwrap();
        remote.set_offline(true);

        let outcome = engine.flush().await.unwrap();

        assert!(matches!(
            outcome,
            FlushOutcome::Failed {
                retry_class: RetryClass::Retryable,
                ..
            }
        ));
        let items = engine.queue().items().await.unwrap();
        assert_eq!(items[0].attempts, 1);
        assert!(items[0].next_attempt_at.is_some());
        let status = engine.status().await.unwrap();
        assert_eq!(status.state, SyncState::Error);
        assert!(status.last_error.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unauthorized_fails_fast_without_attempts() {
        let (engine, remote) = engine();
        engine.create_prompt(new_prompt("Hello")).await.unwrap();
        remote.set_unauthorized(true);

        let error = engine.flush().await.unwrap_err();

        assert!(matches!(error, Error::Unauthorized(_)));
        let items = engine.queue().items().await.unwrap();
        assert_eq!(items[0].attempts, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_failures_park_and_retry_parked_recovers() {
        let settings = SyncSettings {
            backoff_base_ms: 1,
            backoff_cap_ms: 1,
            backoff_jitter_percent: 0,
            ..SyncSettings::default()
        };
        let (engine, remote) = engine_with(settings);
        let mut events = engine.subscribe();
        engine.create_prompt(new_prompt("Hello")).await.unwrap();
        remote.set_failure(Some(503));

        for _ in 0..MAX_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(5)).await;
            engine.flush().await.unwrap();
        }
        let status = engine.status().await.unwrap();
        assert_eq!(status.pending, 0);
        assert_eq!(status.parked, 1);

        let mut parked_events = 0;
        while let Some(event) = events.try_recv() {
            if matches!(event, SyncEvent::ItemsParked { count: 1 }) {
                parked_events += 1;
            }
        }
        assert_eq!(parked_events, 1);

        remote.set_failure(None);
        let outcome = engine.retry_parked().await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Completed { sent: 1, .. }));
        assert_eq!(engine.status().await.unwrap().parked, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_and_archive_queue_mutations() {
        let (engine, _remote) = engine();
        let prompt = engine.create_prompt(new_prompt("Hello")).await.unwrap();

        let updated = engine
            .update_prompt(
                &prompt.id,
                PromptPatch {
                    content: Some("new body".to_string()),
                    ..PromptPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_ne!(updated.checksum, prompt.checksum);

        let unchanged = engine
            .update_prompt(&prompt.id, PromptPatch::default())
            .await
            .unwrap();
        assert_eq!(unchanged.version, 2);

        let tagged = engine.set_tags(&prompt.id, ["Work", " work ", "ai"]).await.unwrap();
        assert_eq!(tagged.tags.len(), 2);

        let archived = engine.archive_prompt(&prompt.id).await.unwrap();
        assert!(archived.is_archived());

        let ops: Vec<QueueOp> = engine
            .queue()
            .items()
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.op)
            .collect();
        assert_eq!(
            ops,
            vec![QueueOp::Create, QueueOp::Update, QueueOp::Update, QueueOp::Delete]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overflow_is_reported() {
        let settings = SyncSettings {
            queue_capacity: 2,
            ..SyncSettings::default()
        };
        let (engine, _remote) = engine_with(settings);
        let mut events = engine.subscribe();
        for index in 0..3 {
            engine
                .create_prompt(new_prompt(&format!("p{index}")))
                .await
                .unwrap();
        }

        let status = engine.status().await.unwrap();
        assert_eq!(status.pending, 2);
        assert_eq!(status.dropped_total, 1);
        let mut overflowed = false;
        while let Some(event) = events.try_recv() {
            if let SyncEvent::QueueOverflow { dropped, .. } = event {
                assert_eq!(dropped, 1);
                overflowed = true;
            }
        }
        assert!(overflowed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconnect_triggers_background_flush() {
        let settings = SyncSettings {
            flush_interval_secs: 3600,
            ..SyncSettings::default()
        };
        let (engine, remote) = engine_with(settings);
        engine.set_online(false);
        engine.spawn().await;
        engine.create_prompt(new_prompt("Hello")).await.unwrap();

        engine.set_online(true);
        let mut synced = false;
        for _ in 0..100 {
            if engine.status().await.unwrap().pending == 0 {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        engine.shutdown().await;

        assert!(synced);
        assert!(remote.sync_calls() >= 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sign_in_runs_merge_once() {
        let (engine, remote) = engine();
        engine.create_prompt(new_prompt("offline note")).await.unwrap();
        let identity = IdentityHandle::new(None);
        let mut events = engine.subscribe();
        engine.watch_identity(&identity).await;

        identity.sign_in("user-7");
        let mut migrated = false;
        for _ in 0..100 {
            if let Ok(Some(SyncEvent::MigrationCompleted { user_id, uploaded, .. })) =
                tokio::time::timeout(Duration::from_millis(50), events.recv()).await
            {
                assert_eq!(user_id, "user-7");
                assert_eq!(uploaded, 1);
                migrated = true;
                break;
            }
        }
        engine.shutdown().await;

        assert!(migrated);
        assert_eq!(remote.entity_count(), 1);
        assert_eq!(engine.store().owner_id().await.unwrap(), "user-7");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pulled_prompts_land_locally() {
        let (engine, remote) = engine();
        let other = Prompt::new(LOCAL_OWNER, "from phone", "body");
        remote.seed(WireEntity::from_prompt(&other));

        engine.flush().await.unwrap();

        assert!(engine.store().get_prompt(&other.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn purge_respects_retention() {
        let (engine, _remote) = engine();
        let prompt = engine.create_prompt(new_prompt("old")).await.unwrap();
        let mut archived = engine.archive_prompt(&prompt.id).await.unwrap();
        assert_eq!(engine.purge().await.unwrap(), 0);

        archived.archived_at = Some(now() - chrono::Duration::days(31));
        engine.store().save_prompt(&archived).await.unwrap();
        assert_eq!(engine.purge().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_conflicts_survive_restart() {
        let (engine, remote) = engine();
        let prompt = engine.create_prompt(new_prompt("Draft")).await.unwrap();
        engine.flush().await.unwrap();

        let mut server = prompt.clone();
        server.set_text("Draft v2", "body");
        server.updated_at = prompt.updated_at + chrono::Duration::minutes(5);
        remote.seed(WireEntity::from_prompt(&server));
        engine
            .update_prompt(
                &prompt.id,
                PromptPatch {
                    title: Some("Draft local".to_string()),
                    ..PromptPatch::default()
                },
            )
            .await
            .unwrap();
        let outcome = engine.flush().await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Completed { conflicts: 1, .. }));
        engine.shutdown().await;

        let restarted = SyncEngine::new(
            engine.store().clone(),
            remote.clone(),
            SyncSettings::default(),
        );
        assert_eq!(restarted.status().await.unwrap().open_conflicts, 1);
        restarted
            .resolve_conflict(&prompt.id, Resolution::KeepLocal)
            .await
            .unwrap();

        assert!(restarted.open_conflicts().await.unwrap().is_empty());
        let entity = remote.entity(&prompt.id.as_str()).unwrap();
        assert_eq!(entity.title, "Draft local");
    }
}

//! Manual conflict bookkeeping and the resolution contract.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::{EventBus, SyncEvent};
use crate::models::{ConflictRecord, Prompt, PromptId, QueueOp, Resolution};
use crate::services::LocalStore;
use crate::sync::{RemoteStore, ResolveConflictRequest, ResolveStrategy, SyncQueue};

/// Local effect of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionOutcome {
    pub resolution: Resolution,
    /// Canonical entity as returned by the remote, now stored locally
    pub canonical: Prompt,
    /// Local clone created by keep-both
    pub copy: Option<Prompt>,
}

/// Tracks open conflicts until the user resolves them.
///
/// Records are persisted in the local store. The remote does not report an
/// unresolved revision again, so a conflict must survive restarts until it
/// is resolved here.
#[derive(Clone)]
pub struct ConflictResolver {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    queue: SyncQueue,
    events: EventBus,
}

impl ConflictResolver {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        queue: SyncQueue,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            remote,
            queue,
            events,
        }
    }

    /// Track conflicts reported by a round, replacing older records.
    pub async fn record(&self, conflicts: Vec<ConflictRecord>) -> Result<()> {
        if conflicts.is_empty() {
            return Ok(());
        }
        for record in &conflicts {
            tracing::info!(
                "Conflict on prompt {} ({} ms apart)",
                record.prompt_id,
                record.delta_ms
            );
        }
        let detected: Vec<(PromptId, i64)> = conflicts
            .iter()
            .map(|record| (record.prompt_id, record.delta_ms))
            .collect();
        self.store.save_conflicts(conflicts).await?;
        for (prompt_id, delta_ms) in detected {
            self.events
                .publish(SyncEvent::ConflictDetected { prompt_id, delta_ms });
        }
        Ok(())
    }

    pub async fn open_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        self.store.open_conflicts().await
    }

    pub async fn open_count(&self) -> Result<usize> {
        Ok(self.open_conflicts().await?.len())
    }

    pub async fn get(&self, prompt_id: &PromptId) -> Result<Option<ConflictRecord>> {
        Ok(self
            .open_conflicts()
            .await?
            .into_iter()
            .find(|record| record.prompt_id == *prompt_id))
    }

    /// Apply the user's choice for one open conflict.
    ///
    /// keep-local asks the remote to adopt the stored revision, keep-remote
    /// keeps the current server copy, keep-both keeps the server copy and
    /// creates a local clone of the losing side under a new id.
    pub async fn resolve(
        &self,
        prompt_id: &PromptId,
        resolution: Resolution,
    ) -> Result<ResolutionOutcome> {
        let record = self
            .get(prompt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no open conflict for prompt {prompt_id}")))?;
        let revision_id = record.revision_id.clone().ok_or_else(|| {
            Error::validation(format!("conflict on {prompt_id} has no server revision"))
        })?;

        let strategy = match resolution {
            Resolution::KeepLocal => ResolveStrategy::UseRevision,
            Resolution::KeepRemote | Resolution::KeepBoth => ResolveStrategy::KeepCurrent,
        };
        let response = self
            .remote
            .resolve_conflict(&ResolveConflictRequest {
                entity_id: prompt_id.as_str(),
                revision_id,
                strategy,
                merged_data: None,
            })
            .await?;

        let message = response
            .message
            .clone()
            .unwrap_or_else(|| "remote did not return the resolved entity".to_string());
        let updated = match response.updated_entity {
            Some(entity) if response.success => entity,
            _ => return Err(Error::remote(502, message)),
        };

        let owner_id = self.store.owner_id().await?;
        let canonical = updated.into_prompt(&owner_id)?;
        self.store.save_prompt(&canonical).await?;

        let copy = if resolution == Resolution::KeepBoth {
            let mut copy = record.local.duplicate();
            copy.owner_id.clone_from(&owner_id);
            self.queue.enqueue(&copy, QueueOp::Create).await?;
            Some(copy)
        } else {
            None
        };

        self.store.delete_conflict(prompt_id).await?;
        tracing::info!("Resolved conflict on {prompt_id} with {resolution}");
        self.events.publish(SyncEvent::ConflictResolved {
            prompt_id: *prompt_id,
            resolution,
        });

        Ok(ResolutionOutcome {
            resolution,
            canonical,
            copy,
        })
    }

    /// Resolve every open conflict the same way, stopping at the first error.
    pub async fn resolve_all(&self, resolution: Resolution) -> Result<Vec<ResolutionOutcome>> {
        let ids: Vec<PromptId> = self
            .open_conflicts()
            .await?
            .into_iter()
            .map(|record| record.prompt_id)
            .collect();
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            outcomes.push(self.resolve(&id, resolution).await?);
        }
        Ok(outcomes)
    }
}

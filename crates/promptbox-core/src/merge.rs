//! First-contact reconciliation of a local-only dataset with a remote account.
//!
//! Runs once per account. The local dataset is snapshotted first and the
//! snapshot outlives every step until the upload pass has succeeded, so an
//! interrupted run restarts from the snapshot instead of the live store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::SyncSettings;
use crate::conflict::{classify, Classification, ConflictResolver, Side};
use crate::db::{
    migration_marker_key, MetaRepository, MetaScope, PromptRepository, QueueRepository, SyncScope,
    KEY_OWNER_ID,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, SyncEvent};
use crate::models::{DeviceType, MigrationSnapshot, Prompt, PromptId, LOCAL_OWNER};
use crate::services::LocalStore;
use crate::sync::{exchange, register_device, RemoteStore, DEFAULT_DEVICE_NAME};
use crate::util::now;

/// What to do with every prompt seen on either side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    /// Only present locally
    pub local_only: Vec<Prompt>,
    /// Only present remotely; adopted locally, never touched remotely
    pub remote_only: Vec<Prompt>,
    /// Present on both sides with the same content
    pub merged: Vec<Prompt>,
    /// Content differed within the window and the local edit is newer
    pub local_winners: Vec<Prompt>,
    /// Content differed within the window and the remote edit is newer or tied
    pub remote_winners: Vec<Prompt>,
    /// Content differed outside the window
    pub conflicts: Vec<(Prompt, Prompt)>,
}

impl MergePlan {
    /// Prompts the upload pass sends to the remote.
    ///
    /// Manual conflicts are uploaded too; the remote keeps its copy and stores
    /// the local one as a revision.
    pub fn uploads(&self) -> Vec<Prompt> {
        self.local_only
            .iter()
            .chain(&self.local_winners)
            .chain(&self.merged)
            .chain(self.conflicts.iter().map(|(local, _)| local))
            .cloned()
            .collect()
    }

    /// Prompts written locally before the upload pass.
    pub fn adoptions(&self) -> Vec<Prompt> {
        self.remote_only
            .iter()
            .chain(&self.remote_winners)
            .chain(&self.merged)
            .cloned()
            .collect()
    }
}

/// Classify every local and remote prompt.
pub fn plan_merge(local: &[Prompt], remote: &[Prompt], window_ms: i64) -> MergePlan {
    let remote_by_id: HashMap<PromptId, &Prompt> =
        remote.iter().map(|prompt| (prompt.id, prompt)).collect();
    let local_ids: HashSet<PromptId> = local.iter().map(|prompt| prompt.id).collect();
    let mut plan = MergePlan::default();

    for prompt in local {
        let Some(remote_copy) = remote_by_id.get(&prompt.id) else {
            plan.local_only.push(prompt.clone());
            continue;
        };
        match classify(prompt, remote_copy, window_ms) {
            Classification::Merged(merged) => plan.merged.push(merged),
            Classification::AutoResolved {
                winner: Side::Local,
                prompt,
            } => plan.local_winners.push(prompt),
            Classification::AutoResolved {
                winner: Side::Remote,
                prompt,
            } => plan.remote_winners.push(prompt),
            Classification::Manual { .. } => {
                plan.conflicts.push((prompt.clone(), (*remote_copy).clone()));
            }
        }
    }

    plan.remote_only = remote
        .iter()
        .filter(|prompt| !local_ids.contains(&prompt.id))
        .cloned()
        .collect();
    plan
}

/// The reconciled dataset both sides converge on.
///
/// Local prompts come first in their original order, then remote-only ones.
/// A manual conflict keeps the local copy until it is resolved.
pub fn merge(local: &[Prompt], remote: &[Prompt], window_ms: i64) -> Vec<Prompt> {
    let remote_by_id: HashMap<PromptId, &Prompt> =
        remote.iter().map(|prompt| (prompt.id, prompt)).collect();
    let mut seen = HashSet::with_capacity(local.len());
    let mut merged = Vec::with_capacity(local.len() + remote.len());

    for prompt in local {
        seen.insert(prompt.id);
        let reconciled = match remote_by_id.get(&prompt.id) {
            None => prompt.clone(),
            Some(remote_copy) => match classify(prompt, remote_copy, window_ms) {
                Classification::Merged(merged) => merged,
                Classification::AutoResolved { prompt, .. } => prompt,
                Classification::Manual { .. } => prompt.clone(),
            },
        };
        merged.push(reconciled);
    }
    merged.extend(
        remote
            .iter()
            .filter(|prompt| !seen.contains(&prompt.id))
            .cloned(),
    );
    merged
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub user_id: String,
    /// The account had already been migrated; nothing was done
    pub already_migrated: bool,
    pub local_only: usize,
    pub remote_only: usize,
    pub uploaded: usize,
    pub adopted: usize,
    pub conflicts: usize,
}

/// Runs the first-sign-in merge.
#[derive(Clone)]
pub struct MergeOrchestrator {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    resolver: ConflictResolver,
    events: EventBus,
    window_ms: i64,
    batch_size: usize,
}

impl MergeOrchestrator {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        resolver: ConflictResolver,
        events: EventBus,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            resolver,
            events,
            window_ms: settings.conflict_window_ms,
            batch_size: settings.batch_size.max(1),
        }
    }

    pub async fn is_migrated(&self, user_id: &str) -> Result<bool> {
        let key = migration_marker_key(user_id);
        self.store
            .unit_of_work::<MetaScope, _, _>(move |uow| Ok(uow.meta().get_value(&key)?.is_some()))
            .await
    }

    /// Capture the local-only dataset unless a snapshot is already protected.
    ///
    /// Safe to call before an auth redirect starts; a later run reuses it.
    pub async fn protect_snapshot(&self) -> Result<MigrationSnapshot> {
        let prompts = self.store.all_prompts().await?;
        let snapshot = self
            .store
            .unit_of_work::<MetaScope, _, _>(move |uow| {
                let meta = uow.meta();
                if let Some(existing) = meta.load_snapshot()? {
                    return Ok(existing);
                }
                let snapshot = MigrationSnapshot {
                    owner_id: LOCAL_OWNER.to_string(),
                    captured_at: now(),
                    prompts: prompts
                        .into_iter()
                        .filter(|prompt| prompt.owner_id == LOCAL_OWNER)
                        .collect(),
                };
                meta.save_snapshot(&snapshot)?;
                Ok(snapshot)
            })
            .await?;
        tracing::info!(
            "Protected migration snapshot with {} prompts",
            snapshot.prompts.len()
        );
        Ok(snapshot)
    }

    /// Merge the local dataset into `user_id`'s account.
    ///
    /// Every step is idempotent. On error the snapshot stays protected and
    /// the next call starts over from it.
    pub async fn run(&self, user_id: &str) -> Result<MigrationReport> {
        let user_id = user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(Error::validation("user id must not be empty"));
        }
        if self.is_migrated(&user_id).await? {
            tracing::debug!("Account {user_id} already migrated");
            return Ok(MigrationReport {
                user_id,
                already_migrated: true,
                ..MigrationReport::default()
            });
        }

        tracing::info!("Starting first merge for account {user_id}");
        let snapshot = self.protect_snapshot().await?;

        let identity = match self.store.device_identity().await? {
            Some(identity) => identity,
            None => {
                self.store
                    .ensure_device(DEFAULT_DEVICE_NAME, DeviceType::default())
                    .await?
            }
        };
        let identity =
            register_device(&self.store, self.remote.as_ref(), &identity.name, identity.device_type)
                .await?;
        tracing::info!("Registered device {} for merge", identity.device_id);

        let remote = self
            .remote
            .fetch_all()
            .await?
            .into_iter()
            .map(|entity| entity.into_prompt(&user_id))
            .collect::<Result<Vec<_>>>()?;
        let local: Vec<Prompt> = snapshot
            .prompts
            .iter()
            .cloned()
            .map(|mut prompt| {
                prompt.owner_id.clone_from(&user_id);
                prompt
            })
            .collect();
        let plan = plan_merge(&local, &remote, self.window_ms);
        tracing::info!(
            "Merge plan: {} local-only, {} remote-only, {} merged, {} local wins, {} remote wins, {} conflicts",
            plan.local_only.len(),
            plan.remote_only.len(),
            plan.merged.len(),
            plan.local_winners.len(),
            plan.remote_winners.len(),
            plan.conflicts.len()
        );

        let adoptions = plan.adoptions();
        let adopted = adoptions.len();
        let owner = user_id.clone();
        let snapshot_ids: HashSet<PromptId> =
            snapshot.prompts.iter().map(|prompt| prompt.id).collect();
        let captured_at = snapshot.captured_at;
        let superseded = self
            .store
            .unit_of_work::<SyncScope, _, _>(move |uow| {
                let queued = uow.queue().list()?;
                // Edits made after the snapshot stay queued and must not be
                // overwritten by an adopted remote copy.
                let edited_later: HashSet<PromptId> = queued
                    .iter()
                    .filter(|item| item.created_at > captured_at)
                    .map(|item| item.prompt_id)
                    .collect();
                let prompts = uow.prompts();
                prompts.reassign_owner(LOCAL_OWNER, &owner)?;
                for prompt in adoptions
                    .iter()
                    .filter(|prompt| !edited_later.contains(&prompt.id))
                {
                    prompts.upsert(prompt)?;
                }
                uow.meta().set_value(KEY_OWNER_ID, &owner)?;
                Ok(queued
                    .into_iter()
                    .filter(|item| {
                        snapshot_ids.contains(&item.prompt_id) && item.created_at <= captured_at
                    })
                    .map(|item| item.id)
                    .collect::<Vec<_>>())
            })
            .await?;

        let uploads = plan.uploads();
        let mut conflicts = Vec::new();
        let chunks: Vec<&[Prompt]> = if uploads.is_empty() {
            vec![&[]]
        } else {
            uploads.chunks(self.batch_size).collect()
        };
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let identity = self.store.device_identity().await?.unwrap_or_else(|| identity.clone());
            // Queued edits of migrated prompts go away with the final chunk.
            let sent_ids: &[i64] = if index == last { &superseded } else { &[] };
            let report =
                exchange(&self.store, self.remote.as_ref(), &identity, chunk, sent_ids).await?;
            conflicts.extend(report.conflicts);
        }

        let conflict_count = conflicts.len();
        self.resolver.record(conflicts).await?;

        let marker = migration_marker_key(&user_id);
        self.store
            .unit_of_work::<MetaScope, _, _>(move |uow| {
                let meta = uow.meta();
                meta.set_value(&marker, &now().to_rfc3339())?;
                meta.discard_snapshot()?;
                Ok(())
            })
            .await?;

        let report = MigrationReport {
            user_id: user_id.clone(),
            already_migrated: false,
            local_only: plan.local_only.len(),
            remote_only: plan.remote_only.len(),
            uploaded: uploads.len(),
            adopted,
            conflicts: conflict_count,
        };
        tracing::info!(
            "Merged account {user_id}: uploaded {}, adopted {}, {} conflicts",
            report.uploaded,
            report.adopted,
            report.conflicts
        );
        self.events.publish(SyncEvent::MigrationCompleted {
            user_id,
            uploaded: report.uploaded,
            conflicts: report.conflicts,
        });
        Ok(report)
    }
}

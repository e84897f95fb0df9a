//! One push/pull exchange and its local application.

use std::collections::HashSet;

use crate::checksum::checksums_match;
use crate::db::{DeviceRepository, PromptRepository, QueueRepository, SyncScope};
use crate::error::Result;
use crate::models::{
    validate_device_name, ConflictRecord, DeviceIdentity, DeviceType, Prompt, PromptId, QueueItem,
};
use crate::services::LocalStore;
use crate::util::now;

use super::protocol::{RegisterDeviceRequest, RemoteStore, SyncRequest, SyncResponse, WireEntity};

/// What a completed round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub sent: usize,
    pub confirmed: usize,
    pub pulled: usize,
    /// Pulled entities left alone because a newer local edit is still queued
    pub skipped: usize,
    pub conflicts: Vec<ConflictRecord>,
    pub sync_token: String,
}

/// Collapse a queue batch to one entity per prompt, keeping the newest payload.
fn batch_entities(batch: &[QueueItem]) -> Vec<Prompt> {
    let mut entities: Vec<Prompt> = Vec::with_capacity(batch.len());
    for item in batch {
        match entities
            .iter_mut()
            .find(|entity| entity.id == item.prompt_id)
        {
            Some(entity) => *entity = item.payload.clone(),
            None => entities.push(item.payload.clone()),
        }
    }
    entities
}

/// Register this device with the remote under `name`.
///
/// The stored device id is always sent along, so repeating the call never
/// creates a second device on the remote.
pub async fn register_device(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    name: &str,
    device_type: DeviceType,
) -> Result<DeviceIdentity> {
    let name = validate_device_name(name)?;
    let mut identity = store.ensure_device(&name, device_type).await?;
    let response = remote
        .register_device(&RegisterDeviceRequest {
            device_name: name.clone(),
            device_type,
            device_id: Some(identity.device_id.clone()),
        })
        .await?;

    if response.device_id != identity.device_id {
        tracing::info!(
            "Remote assigned device id {} (was {})",
            response.device_id,
            identity.device_id
        );
    }
    identity.device_id = response.device_id;
    identity.name = name;
    identity.device_type = device_type;
    identity.registered = true;
    store.save_device(&identity).await?;
    Ok(identity)
}

/// Send the queue batch and apply the response.
pub async fn run_round(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    identity: &DeviceIdentity,
    batch: &[QueueItem],
) -> Result<RoundReport> {
    let sent_ids: Vec<i64> = batch.iter().map(|item| item.id).collect();
    exchange(store, remote, identity, &batch_entities(batch), &sent_ids).await
}

/// Upload `entities` in one round and apply the response.
///
/// `sent_ids` are the queue items the upload covers; they are deleted in the
/// same transaction that applies the response. Nothing is written when the
/// call or the local application fails, so the old cursor is kept.
pub async fn exchange(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    identity: &DeviceIdentity,
    entities: &[Prompt],
    sent_ids: &[i64],
) -> Result<RoundReport> {
    let request = SyncRequest {
        device_id: identity.device_id.clone(),
        last_sync_at: identity.last_sync_at,
        sync_token: identity.sync_token.clone(),
        entities: entities.iter().map(WireEntity::from_prompt).collect(),
    };
    let response = remote.sync(&request).await?;
    let owner_id = store.owner_id().await?;
    apply_response(store, &owner_id, response, entities.len(), sent_ids.to_vec()).await
}

async fn apply_response(
    store: &LocalStore,
    owner_id: &str,
    response: SyncResponse,
    sent: usize,
    sent_ids: Vec<i64>,
) -> Result<RoundReport> {
    // A malformed entity is skipped so the rest of the round still lands.
    let mut conflicts = Vec::with_capacity(response.conflicts.len());
    for conflict in response.conflicts {
        let entity_id = conflict.server_version.id.clone();
        match (
            conflict.client_version.into_prompt(owner_id),
            conflict.server_version.into_prompt(owner_id),
        ) {
            (Ok(local), Ok(remote)) => {
                conflicts.push(ConflictRecord::new(local, remote, Some(conflict.revision_id)));
            }
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!("Skipping conflict on {entity_id}: {err}");
            }
        }
    }
    let pulled = response
        .server_entities
        .into_iter()
        .filter_map(|entity| {
            let entity_id = entity.id.clone();
            entity
                .into_prompt(owner_id)
                .map_err(|err| tracing::warn!("Skipping pulled entity {entity_id}: {err}"))
                .ok()
        })
        .collect::<Vec<_>>();
    let confirmed = response
        .synced
        .into_iter()
        .map(|synced| -> Result<(PromptId, String, i64)> {
            Ok((
                PromptId::parse(&synced.client_id)?,
                synced.checksum,
                synced.version,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    let conflicted: HashSet<PromptId> = conflicts.iter().map(|record| record.prompt_id).collect();
    let sync_token = response.sync_token;
    let token = sync_token.clone();

    let (confirmed_count, pulled_count, skipped) = store
        .unit_of_work::<SyncScope, _, _>(move |uow| {
            let prompts = uow.prompts();
            let queue = uow.queue();
            queue.delete(&sent_ids)?;

            let mut confirmed_count = 0;
            for (id, checksum, version) in confirmed {
                if let Some(mut local) = prompts.get(&id)? {
                    // A newer local edit keeps its own queue item; leave it be.
                    if checksums_match(&local.checksum, &checksum) {
                        local.version = version.max(1);
                        prompts.upsert(&local)?;
                        confirmed_count += 1;
                    }
                }
            }

            let mut pulled_count = 0;
            let mut skipped = 0;
            for prompt in pulled {
                if conflicted.contains(&prompt.id) || queue.has_other_items(&prompt.id, &sent_ids)?
                {
                    skipped += 1;
                    continue;
                }
                prompts.upsert(&prompt)?;
                pulled_count += 1;
            }

            uow.device().record_sync(&token, now())?;
            Ok((confirmed_count, pulled_count, skipped))
        })
        .await?;

    if !conflicts.is_empty() {
        tracing::info!("Sync round reported {} conflicts", conflicts.len());
    }
    tracing::debug!(
        "Applied sync round: sent {sent}, confirmed {confirmed_count}, pulled {pulled_count}, skipped {skipped}"
    );

    Ok(RoundReport {
        sent,
        confirmed: confirmed_count,
        pulled: pulled_count,
        skipped,
        conflicts,
        sync_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceType, QueueOp, LOCAL_OWNER};
    use crate::sync::MemoryRemote;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    async fn setup() -> (LocalStore, MemoryRemote, DeviceIdentity) {
        let store = LocalStore::open_in_memory().unwrap();
        let identity = store
            .ensure_device("laptop", DeviceType::Desktop)
            .await
            .unwrap();
        (store, MemoryRemote::default(), identity)
    }

    #[test]
    fn batch_keeps_newest_payload_per_prompt() {
        let mut prompt = Prompt::new(LOCAL_OWNER, "v1", "body");
        let first = QueueItem {
            id: 1,
            op: QueueOp::Create,
            prompt_id: prompt.id,
            payload: prompt.clone(),
            created_at: now(),
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
        };
        prompt.set_text("v2", "body");
        let second = QueueItem {
            id: 2,
            op: QueueOp::Update,
            payload: prompt.clone(),
            ..first.clone()
        };

        let entities = batch_entities(&[first, second]);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].title, "v2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_round_clears_batch_and_advances_cursor() {
        let (store, remote, identity) = setup().await;
        let prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");
        store
            .save_local_mutation(&prompt, QueueOp::Create, 100)
            .await
            .unwrap();
        let batch = store.queue_items().await.unwrap();

        let report = run_round(&store, &remote, &identity, &batch).await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.confirmed, 1);
        assert!(store.queue_items().await.unwrap().is_empty());
        let identity = store.device_identity().await.unwrap().unwrap();
        assert_eq!(identity.sync_token.as_deref(), Some(report.sync_token.as_str()));
        assert!(identity.last_sync_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_round_keeps_cursor_and_queue() {
        let (store, remote, identity) = setup().await;
        let prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");
        store
            .save_local_mutation(&prompt, QueueOp::Create, 100)
            .await
            .unwrap();
        let batch = store.queue_items().await.unwrap();

        remote.set_offline(true);
        assert!(run_round(&store, &remote, &identity, &batch).await.is_err());

        assert_eq!(store.queue_items().await.unwrap().len(), 1);
        let identity = store.device_identity().await.unwrap().unwrap();
        assert_eq!(identity.sync_token, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pulled_entity_does_not_overwrite_newer_queued_edit() {
        let (store, remote, identity) = setup().await;
        let mut prompt = Prompt::new(LOCAL_OWNER, "Title", "Body");
        let mut remote_copy = prompt.clone();
        remote_copy.set_text("Remote", "Body");
        remote_copy.updated_at = prompt.updated_at - Duration::seconds(5);
        remote.seed(WireEntity::from_prompt(&remote_copy));

        prompt.set_text("Local edit", "Body");
        store
            .save_local_mutation(&prompt, QueueOp::Update, 100)
            .await
            .unwrap();

        let report = run_round(&store, &remote, &identity, &[]).await.unwrap();

        assert_eq!(report.skipped, 1);
        let local = store.get_prompt(&prompt.id).await.unwrap().unwrap();
        assert_eq!(local.title, "Local edit");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn register_device_keeps_id_across_calls() {
        let (store, remote, identity) = setup().await;

        let first = register_device(&store, &remote, "work laptop", DeviceType::Desktop)
            .await
            .unwrap();
        let second = register_device(&store, &remote, "work laptop", DeviceType::Desktop)
            .await
            .unwrap();

        assert!(first.registered);
        assert_eq!(first.device_id, identity.device_id);
        assert_eq!(second.device_id, first.device_id);
        assert_eq!(remote.device_count(), 1);
        assert_eq!(store.device_identity().await.unwrap().unwrap().name, "work laptop");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_remote_entity_does_not_block_round() {
        let (store, remote, identity) = setup().await;
        let mut oversized = WireEntity::from_prompt(&Prompt::new(LOCAL_OWNER, "Huge", "Body"));
        oversized.content = "x".repeat(100_001);
        let oversized_id = oversized.id.clone();
        remote.seed(oversized);
        let from_phone = Prompt::new(LOCAL_OWNER, "From phone", "Body");
        remote.seed(WireEntity::from_prompt(&from_phone));

        let mine = Prompt::new(LOCAL_OWNER, "Mine", "Body");
        store
            .save_local_mutation(&mine, QueueOp::Create, 100)
            .await
            .unwrap();
        let batch = store.queue_items().await.unwrap();

        let report = run_round(&store, &remote, &identity, &batch).await.unwrap();

        assert_eq!(report.confirmed, 1);
        assert!(store.queue_items().await.unwrap().is_empty());
        assert!(store.get_prompt(&from_phone.id).await.unwrap().is_some());
        let skipped_id = PromptId::parse(&oversized_id).unwrap();
        assert!(store.get_prompt(&skipped_id).await.unwrap().is_none());
        let identity = store.device_identity().await.unwrap().unwrap();
        assert!(identity.sync_token.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_changes_are_pulled() {
        let (store, remote, identity) = setup().await;
        let other_device = Prompt::new(LOCAL_OWNER, "From phone", "Body");
        remote.seed(WireEntity::from_prompt(&other_device));

        let report = run_round(&store, &remote, &identity, &[]).await.unwrap();

        assert_eq!(report.pulled, 1);
        let local = store.get_prompt(&other_device.id).await.unwrap().unwrap();
        assert_eq!(local.title, "From phone");
    }
}

//! Optimistic prompt mutations.

use crate::error::{Error, Result};
use crate::models::{normalize_tags, NewPrompt, Prompt, PromptId, PromptPatch, QueueOp};
use crate::sync::SyncQueue;

use super::store::{LocalStore, MutationReceipt};

/// Writes prompt edits locally and queues them, whether or not a remote is
/// configured.
#[derive(Debug, Clone)]
pub struct PromptService {
    store: LocalStore,
    queue: SyncQueue,
}

impl PromptService {
    pub const fn new(store: LocalStore, queue: SyncQueue) -> Self {
        Self { store, queue }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    async fn device_id(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .device_identity()
            .await?
            .map(|identity| identity.device_id))
    }

    async fn existing(&self, id: &PromptId) -> Result<Prompt> {
        self.store
            .get_prompt(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("prompt {id}")))
    }

    pub async fn create(&self, input: NewPrompt) -> Result<(Prompt, MutationReceipt)> {
        let owner_id = self.store.owner_id().await?;
        let mut prompt = Prompt::new(owner_id, input.title, input.content);
        prompt.tags = normalize_tags(input.tags);
        prompt.pinned = input.pinned;
        prompt.sort_order = input.sort_order;
        prompt.device_id = self.device_id().await?;

        let receipt = self.queue.enqueue(&prompt, QueueOp::Create).await?;
        tracing::debug!("Created prompt {}", prompt.id);
        Ok((prompt, receipt))
    }

    /// Apply `patch` and queue the result. Returns no receipt when the patch
    /// changed nothing.
    pub async fn update(
        &self,
        id: &PromptId,
        patch: PromptPatch,
    ) -> Result<(Prompt, Option<MutationReceipt>)> {
        let mut prompt = self.existing(id).await?;
        if patch.is_empty() || !patch.apply(&mut prompt) {
            return Ok((prompt, None));
        }
        prompt.touch();
        prompt.device_id = self.device_id().await?;

        let receipt = self.queue.enqueue(&prompt, QueueOp::Update).await?;
        Ok((prompt, Some(receipt)))
    }

    /// Soft delete. Archiving an archived prompt is a no-op.
    pub async fn archive(&self, id: &PromptId) -> Result<(Prompt, Option<MutationReceipt>)> {
        let mut prompt = self.existing(id).await?;
        if prompt.is_archived() {
            return Ok((prompt, None));
        }
        prompt.touch();
        prompt.archived_at = Some(prompt.updated_at);
        prompt.device_id = self.device_id().await?;

        let receipt = self.queue.enqueue(&prompt, QueueOp::Delete).await?;
        tracing::debug!("Archived prompt {id}");
        Ok((prompt, Some(receipt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::RetryPolicy;
    use pretty_assertions::assert_eq;

    fn service() -> PromptService {
        let store = LocalStore::open_in_memory().unwrap();
        let queue = SyncQueue::new(store.clone(), RetryPolicy::default());
        PromptService::new(store, queue)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_normalizes_tags_and_queues() {
        let service = service();
        let (prompt, receipt) = service
            .create(NewPrompt {
                title: "Review".to_string(),
                content: "Check the diff".to_string(),
                tags: ["Work".to_string(), " work".to_string()].into(),
                ..NewPrompt::default()
            })
            .await
            .unwrap();

        assert_eq!(prompt.version, 1);
        assert_eq!(prompt.tags.len(), 1);
        assert_eq!(receipt.dropped, 0);
        let stored = service.store().get_prompt(&prompt.id).await.unwrap().unwrap();
        assert_eq!(stored, prompt);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_prompt_is_never_queued() {
        let service = service();
        let result = service
            .create(NewPrompt {
                title: "x".repeat(501),
                content: "body".to_string(),
                ..NewPrompt::default()
            })
            .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(service.queue().items().await.unwrap().is_empty());
        assert!(service.store().all_prompts().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn archive_twice_queues_once() {
        let service = service();
        let (prompt, _) = service
            .create(NewPrompt {
                title: "t".to_string(),
                content: "c".to_string(),
                ..NewPrompt::default()
            })
            .await
            .unwrap();

        let (_, first) = service.archive(&prompt.id).await.unwrap();
        let (archived, second) = service.archive(&prompt.id).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(archived.is_archived());
        assert_eq!(service.queue().items().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_prompt_is_not_found() {
        let service = service();
        let result = service.update(&PromptId::new(), PromptPatch::default()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}

//! Outbound mutation queue with exponential backoff.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::SyncSettings;
use crate::error::Result;
use crate::models::{Prompt, QueueItem, QueueOp, QueueStatus};
use crate::services::{FailureSummary, LocalStore, MutationReceipt};

/// Retry and capacity limits applied to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter_percent: u32,
    pub capacity: usize,
    pub batch_size: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl RetryPolicy {
    pub const fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_ms: settings.backoff_base_ms,
            cap_ms: settings.backoff_cap_ms,
            jitter_percent: settings.backoff_jitter_percent,
            capacity: settings.queue_capacity,
            batch_size: settings.batch_size,
        }
    }

    /// Delay before the next attempt of an item that has failed `attempt`
    /// times before this failure.
    ///
    /// `min(base * 2^attempt, cap)` with a uniformly random offset of up to
    /// `jitter_percent` of that value in either direction.
    pub fn backoff_delay_ms(&self, attempt: u32, rng: &mut impl Rng) -> u64 {
        let exponential = self
            .base_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        let delay = exponential.min(self.cap_ms);
        let span = delay.saturating_mul(u64::from(self.jitter_percent)) / 100;
        if span == 0 {
            return delay;
        }
        let offset = rng.gen_range(0..=span.saturating_mul(2));
        (delay + offset).saturating_sub(span)
    }
}

/// Buffer of local mutation intents awaiting delivery.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: LocalStore,
    policy: RetryPolicy,
}

impl SyncQueue {
    pub const fn new(store: LocalStore, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persist `prompt` optimistically and append its queue item.
    pub async fn enqueue(&self, prompt: &Prompt, op: QueueOp) -> Result<MutationReceipt> {
        let receipt = self
            .store
            .save_local_mutation(prompt, op, self.policy.capacity)
            .await?;
        tracing::debug!("Queued {op} for prompt {} as item {}", prompt.id, receipt.queue_id);
        Ok(receipt)
    }

    /// Oldest active items whose backoff has elapsed, up to the batch size.
    pub async fn next_batch(&self, now: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        self.store
            .due_queue_items(self.policy.max_attempts, now, self.policy.batch_size)
            .await
    }

    /// Increment attempts for every item of a failed batch and schedule retries.
    pub async fn fail_batch(
        &self,
        batch: &[QueueItem],
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureSummary> {
        let schedule = {
            let mut rng = rand::thread_rng();
            batch
                .iter()
                .map(|item| {
                    let delay = self.policy.backoff_delay_ms(item.attempts, &mut rng);
                    let delay = chrono::Duration::milliseconds(
                        i64::try_from(delay).unwrap_or(i64::MAX),
                    );
                    (item.id, now + delay)
                })
                .collect::<Vec<_>>()
        };

        let summary = self
            .store
            .record_flush_failure(schedule, error, self.policy.max_attempts)
            .await?;
        if summary.newly_parked > 0 {
            tracing::warn!(
                "Parked {} queue items after {} failed attempts",
                summary.newly_parked,
                self.policy.max_attempts
            );
        }
        Ok(summary)
    }

    /// Move every parked item back to pending with zero attempts.
    pub async fn retry_parked(&self) -> Result<usize> {
        let reset = self.store.reset_parked(self.policy.max_attempts).await?;
        tracing::info!("Reset {reset} parked queue items");
        Ok(reset)
    }

    /// Discard the whole queue.
    pub async fn clear(&self) -> Result<usize> {
        let removed = self.store.clear_queue().await?;
        tracing::info!("Cleared {removed} queue items");
        Ok(removed)
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        self.store.queue_status(self.policy.max_attempts).await
    }

    pub async fn items(&self) -> Result<Vec<QueueItem>> {
        self.store.queue_items().await
    }
}

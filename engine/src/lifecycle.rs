//! Destructive lifecycle operations: purge, dead-letter transfer, send.
//!
//! Transfers follow a send-then-complete order. The copy is on the target
//! entity before the dead-lettered original is completed, so an interruption
//! can duplicate a message but never lose one.

use std::collections::HashSet;

use azservicebus::ServiceBusReceivedMessage;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::consumer::Consumer;
use crate::error::{ServiceBusError, ServiceBusResult};
use crate::producer::{OutboundMessage, Producer, clone_for_resend};
use crate::progress::ProgressReporter;

/// Tally of a bulk operation. `skipped` counts messages seen and put back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BulkOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

/// Splits a chunk into targeted and bystander messages. With no target set
/// every message is targeted.
fn split_targets<T>(
    items: Vec<T>,
    id_of: impl Fn(&T) -> Option<String>,
    targets: Option<&HashSet<String>>,
) -> (Vec<T>, Vec<T>) {
    let Some(targets) = targets else {
        return (items, Vec::new());
    };
    items
        .into_iter()
        .partition(|item| id_of(item).is_some_and(|id| targets.contains(&id)))
}

fn received_id(message: &ServiceBusReceivedMessage) -> Option<String> {
    message.message_id().map(|id| id.to_string())
}

pub struct LifecycleEngine {
    config: EngineConfig,
}

impl LifecycleEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Deletes messages from the entity the consumer is bound to, chunk by
    /// chunk, until a receive comes back empty or the operation is cancelled.
    pub async fn purge(
        &self,
        consumer: &Consumer,
        token: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> ServiceBusResult<BulkOutcome> {
        let chunk_size = self.config.transfer_chunk_size() as u32;
        let mut outcome = BulkOutcome::default();

        loop {
            if token.is_cancelled() {
                log::info!(
                    "purge of '{}' cancelled after {} deletions",
                    consumer.path(),
                    outcome.succeeded
                );
                break;
            }

            let batch = consumer
                .receive_messages_with_timeout(chunk_size, self.config.drain_wait())
                .await?;
            if batch.is_empty() {
                break;
            }

            let completed = consumer.complete_messages(&batch).await?;
            outcome.succeeded += completed;
            outcome.failed += batch.len() - completed;
            progress.report(outcome.succeeded, None);
        }

        log::info!(
            "purged '{}': {} deleted, {} failed",
            consumer.path(),
            outcome.succeeded,
            outcome.failed
        );
        Ok(outcome)
    }

    /// Moves dead-lettered messages back onto the live entity.
    ///
    /// With `target_ids` set only those messages move and every other locked
    /// message is abandoned back; `None` moves everything. Each chunk is sent
    /// to the target before its originals are completed in the dead-letter
    /// queue.
    pub async fn transfer_dead_letters(
        &self,
        dlq_consumer: &Consumer,
        producer: &Producer,
        target_ids: Option<&[String]>,
        token: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> ServiceBusResult<BulkOutcome> {
        let targets: Option<HashSet<String>> =
            target_ids.map(|ids| ids.iter().cloned().collect());
        let wanted = targets.as_ref().map(|t| t.len());
        let chunk_size = self.config.transfer_chunk_size() as u32;
        let stale_limit = self.config.drain_batch_buffer();

        let mut outcome = BulkOutcome::default();
        let mut remaining = targets.clone();
        let mut stale_chunks = 0usize;

        loop {
            if token.is_cancelled() {
                log::info!(
                    "transfer from '{}' cancelled after {} messages",
                    dlq_consumer.path(),
                    outcome.succeeded
                );
                break;
            }
            if remaining.as_ref().is_some_and(|r| r.is_empty()) {
                break;
            }

            let batch = dlq_consumer
                .receive_messages_with_timeout(chunk_size, self.config.receive_wait())
                .await?;
            if batch.is_empty() {
                break;
            }

            let (targeted, bystanders) =
                split_targets(batch, received_id, remaining.as_ref());

            if targeted.is_empty() {
                outcome.skipped += bystanders.len();
                dlq_consumer.abandon_messages(&bystanders).await?;
                stale_chunks += 1;
                if stale_chunks > stale_limit {
                    log::warn!(
                        "no targeted messages in the last {stale_chunks} chunks of '{}', stopping",
                        dlq_consumer.path()
                    );
                    break;
                }
                continue;
            }
            stale_chunks = 0;

            match self.move_chunk(dlq_consumer, producer, &targeted).await {
                Ok(moved) => {
                    outcome.succeeded += moved;
                    outcome.failed += targeted.len() - moved;
                    if let Some(remaining) = remaining.as_mut() {
                        for message in &targeted {
                            if let Some(id) = received_id(message) {
                                remaining.remove(&id);
                            }
                        }
                    }
                }
                Err(e) => {
                    // Locks drop back to the dead-letter queue; nothing moved.
                    outcome.failed += targeted.len();
                    dlq_consumer.abandon_messages(&targeted).await?;
                    dlq_consumer.abandon_messages(&bystanders).await?;
                    return Err(e);
                }
            }

            outcome.skipped += bystanders.len();
            dlq_consumer.abandon_messages(&bystanders).await?;
            progress.report(outcome.succeeded, wanted);
        }

        if let Some(remaining) = &remaining
            && !remaining.is_empty()
        {
            log::warn!(
                "{} targeted message(s) were not found in '{}'",
                remaining.len(),
                dlq_consumer.path()
            );
        }
        log::info!(
            "transfer from '{}': {} moved, {} failed, {} skipped",
            dlq_consumer.path(),
            outcome.succeeded,
            outcome.failed,
            outcome.skipped
        );
        Ok(outcome)
    }

    /// Sends copies of a chunk to the target, then completes the originals.
    async fn move_chunk(
        &self,
        dlq_consumer: &Consumer,
        producer: &Producer,
        chunk: &[ServiceBusReceivedMessage],
    ) -> ServiceBusResult<usize> {
        let mut copies = Vec::with_capacity(chunk.len());
        for message in chunk {
            copies.push(clone_for_resend(message)?);
        }
        producer.send_messages(copies).await?;
        dlq_consumer.complete_messages(chunk).await
    }

    /// Sends one user-composed message to the producer's entity.
    pub async fn send_message(
        &self,
        producer: &Producer,
        message: OutboundMessage,
    ) -> ServiceBusResult<()> {
        producer.send_message(message.into_sdk_message()?).await
    }

    /// Sends several copies of the same payload, each with a fresh id.
    pub async fn send_repeated(
        &self,
        producer: &Producer,
        template: &OutboundMessage,
        copies: usize,
    ) -> ServiceBusResult<()> {
        if copies == 0 {
            return Err(ServiceBusError::Validation(
                "Message count must be at least 1.".to_string(),
            ));
        }
        let mut messages = Vec::with_capacity(copies);
        for _ in 0..copies {
            let mut copy = template.clone();
            copy.message_id = None;
            messages.push(copy.into_sdk_message()?);
        }
        producer.send_messages(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_target_set_means_everything_is_targeted() {
        let (targeted, bystanders) =
            split_targets(ids(&["a", "b"]), |s| Some(s.clone()), None);
        assert_eq!(targeted, ids(&["a", "b"]));
        assert!(bystanders.is_empty());
    }

    #[test]
    fn target_set_partitions_the_chunk() {
        let targets: HashSet<String> = ids(&["b", "d"]).into_iter().collect();
        let (targeted, bystanders) =
            split_targets(ids(&["a", "b", "c", "d"]), |s| Some(s.clone()), Some(&targets));
        assert_eq!(targeted, ids(&["b", "d"]));
        assert_eq!(bystanders, ids(&["a", "c"]));
    }

    #[test]
    fn messages_without_an_id_are_never_targeted() {
        let targets: HashSet<String> = ids(&["a"]).into_iter().collect();
        let items = vec![Some("a".to_string()), None];
        let (targeted, bystanders) = split_targets(items, |s| s.clone(), Some(&targets));
        assert_eq!(targeted, vec![Some("a".to_string())]);
        assert_eq!(bystanders, vec![None]);
    }

    #[test]
    fn outcome_success_requires_zero_failures() {
        assert!(BulkOutcome { succeeded: 3, failed: 0, skipped: 2 }.is_complete_success());
        assert!(!BulkOutcome { succeeded: 3, failed: 1, skipped: 0 }.is_complete_success());
    }
}

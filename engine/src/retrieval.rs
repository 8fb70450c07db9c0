//! Message retrieval in two modes: non-destructive peek fan-out and
//! lock-then-release drain.
//!
//! Peeking a partitioned entity samples whichever partition head answers, so
//! a single peek call under-reports. The fan-out issues several calls and
//! merges the results. The drain mode load-balances across partitions by
//! design, at the cost of incrementing delivery counts; every lock it takes
//! is released before the next batch.

use futures::future::join_all;

use crate::config::EngineConfig;
use crate::consumer::Consumer;
use crate::error::{ServiceBusError, ServiceBusResult};
use crate::model::MessageModel;
use crate::progress::ProgressReporter;

/// How messages are fetched for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// No side effects, but partitioned entities are sampled, not covered.
    Peek,
    /// Covers all partitions; released messages get a higher delivery count.
    ReceiveAndRelease,
}

/// Dedup key for merged batches. Message ids are the identity messages keep
/// across redeliveries; a message without one falls back to its broker
/// sequence number.
fn dedup_key(message_id: Option<String>, sequence: i64) -> String {
    message_id.unwrap_or_else(|| format!("seq:{sequence}"))
}

/// Merges batches into one list, unique per key, ordered by sequence and
/// truncated to `limit`. The first occurrence of a key wins.
fn merge_unique<T>(
    batches: Vec<Vec<T>>,
    key_of: impl Fn(&T) -> String,
    sequence_of: impl Fn(&T) -> i64,
    limit: usize,
) -> Vec<T> {
    let mut merged: Vec<T> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for batch in batches {
        for item in batch {
            if seen.insert(key_of(&item)) {
                merged.push(item);
            }
        }
    }
    merged.sort_by_key(&sequence_of);
    merged.truncate(limit);
    merged
}

pub struct RetrievalEngine {
    config: EngineConfig,
}

impl RetrievalEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub async fn fetch(
        &self,
        consumer: &Consumer,
        mode: RetrievalMode,
        count: usize,
        from_sequence: Option<i64>,
        dead_letter: bool,
        progress: &dyn ProgressReporter,
    ) -> ServiceBusResult<Vec<MessageModel>> {
        match mode {
            RetrievalMode::Peek => {
                self.peek(consumer, count as u32, from_sequence, dead_letter)
                    .await
            }
            RetrievalMode::ReceiveAndRelease => {
                self.receive_and_release(consumer, count, dead_letter, progress)
                    .await
            }
        }
    }

    /// Peeks up to `count` messages without locking them or touching delivery
    /// counts.
    ///
    /// Several peek calls run as one wave and their results are merged.
    /// Individual call failures degrade the wave; the operation only fails
    /// when every call failed.
    pub async fn peek(
        &self,
        consumer: &Consumer,
        count: u32,
        from_sequence: Option<i64>,
        dead_letter: bool,
    ) -> ServiceBusResult<Vec<MessageModel>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let attempts = self
            .config
            .peek_attempts()
            .min(self.config.peek_call_ceiling());

        let waves = join_all((0..attempts).map(|_| consumer.peek_messages(count, from_sequence)))
            .await;

        let mut batches = Vec::new();
        let mut first_error: Option<ServiceBusError> = None;
        for outcome in waves {
            match outcome {
                Ok(batch) => batches.push(batch),
                Err(e) => {
                    log::warn!("peek call on '{}' failed: {e}", consumer.path());
                    first_error.get_or_insert(e);
                }
            }
        }
        if batches.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let merged = merge_unique(
            batches,
            |m| dedup_key(m.message_id().map(|id| id.to_string()), m.sequence_number()),
            |m| m.sequence_number(),
            count as usize,
        );
        log::debug!(
            "peek wave on '{}': {attempts} calls, {} unique messages",
            consumer.path(),
            merged.len()
        );
        Ok(MessageModel::from_peeked_batch(merged, dead_letter))
    }

    /// Receives up to `count` messages in lock mode, snapshots each batch and
    /// abandons it before the next one.
    ///
    /// Abandoned messages are redelivered, so batches repeat; repeats are
    /// deduplicated and a batch ceiling bounds the broker traffic. A failing
    /// receive or release surfaces to the caller; every lock taken before the
    /// failure was already released.
    pub async fn receive_and_release(
        &self,
        consumer: &Consumer,
        count: usize,
        dead_letter: bool,
        progress: &dyn ProgressReporter,
    ) -> ServiceBusResult<Vec<MessageModel>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let batch_size = self.config.receive_batch_size();
        let wait = self.config.receive_wait();
        let max_batches = (count.div_ceil(batch_size as usize) + self.config.drain_batch_buffer())
            .min(self.config.receive_call_ceiling());

        drain(
            consumer.path(),
            count,
            max_batches,
            || consumer.receive_messages_with_timeout(batch_size, wait),
            |batch| async move { consumer.abandon_messages(&batch).await },
            |message| {
                dedup_key(
                    message.message_id().map(|id| id.to_string()),
                    message.sequence_number(),
                )
            },
            |message| MessageModel::from_received(message, dead_letter).ok(),
            progress,
        )
        .await
    }
}

/// Batch-until-done loop shared by the lock-and-release mode: receive,
/// dedup-snapshot, release, repeat. Stops on target reached, empty batch or
/// the batch ceiling; receive and release failures surface to the caller.
#[allow(clippy::too_many_arguments)]
async fn drain<T, RFut, AFut>(
    path: &str,
    count: usize,
    max_batches: usize,
    mut receive: impl FnMut() -> RFut,
    release: impl Fn(Vec<T>) -> AFut,
    key_of: impl Fn(&T) -> String,
    convert: impl Fn(&T) -> Option<MessageModel>,
    progress: &dyn ProgressReporter,
) -> ServiceBusResult<Vec<MessageModel>>
where
    RFut: Future<Output = ServiceBusResult<Vec<T>>>,
    AFut: Future<Output = ServiceBusResult<usize>>,
{
    let mut models: Vec<MessageModel> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut batches = 0usize;

    while models.len() < count && batches < max_batches {
        batches += 1;
        let batch = receive().await?;
        if batch.is_empty() {
            // Entity exhausted within the wait window.
            break;
        }

        for item in &batch {
            if seen.insert(key_of(item))
                && let Some(model) = convert(item)
            {
                models.push(model);
            }
        }
        // Locks go back before the next receive so nothing stays held.
        release(batch).await?;
        progress.report(models.len().min(count), Some(count));
    }

    log::info!(
        "drain on '{path}': {batches} receive calls, {} unique messages",
        models.len()
    );

    models.sort_by_key(|m| m.sequence);
    models.truncate(count);
    Ok(models)
}

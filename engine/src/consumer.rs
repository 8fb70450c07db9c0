//! Receiver wrapper for peek and lock-mode access to one entity path.

use azservicebus::prelude::ServiceBusPeekedMessage;
use azservicebus::{
    ServiceBusClient, ServiceBusReceiver, ServiceBusReceiverOptions, ServiceBusReceivedMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::entity::EntityRef;
use crate::error::{ServiceBusError, ServiceBusResult, translate};

/// A receiver bound to one entity path (live or dead-letter).
///
/// The inner receiver is `Option` so disposal can take it out; any call after
/// disposal fails with a disposed error instead of panicking.
#[derive(Debug)]
pub struct Consumer {
    path: String,
    receiver: Arc<Mutex<Option<ServiceBusReceiver>>>,
}

impl PartialEq for Consumer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.receiver, &other.receiver)
    }
}

fn disposed(path: &str) -> ServiceBusError {
    ServiceBusError::generic(
        format!("operation on '{path}'"),
        "receiver already disposed",
    )
}

impl Consumer {
    pub fn new(path: impl Into<String>, receiver: ServiceBusReceiver) -> Self {
        Self {
            path: path.into(),
            receiver: Arc::new(Mutex::new(Some(receiver))),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Non-destructive peek. Does not lock messages or touch delivery counts.
    pub async fn peek_messages(
        &self,
        max_count: u32,
        from_sequence_number: Option<i64>,
    ) -> ServiceBusResult<Vec<ServiceBusPeekedMessage>> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| disposed(&self.path))?;
        receiver
            .peek_messages(max_count, from_sequence_number)
            .await
            .map_err(|e| translate(&format!("peeking messages on '{}'", self.path), e))
    }

    /// Lock-mode receive bounded by `timeout`. A timeout means the entity had
    /// nothing to deliver and yields an empty batch, not an error.
    pub async fn receive_messages_with_timeout(
        &self,
        max_count: u32,
        timeout: Duration,
    ) -> ServiceBusResult<Vec<ServiceBusReceivedMessage>> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| disposed(&self.path))?;
        match tokio::time::timeout(timeout, receiver.receive_messages(max_count)).await {
            Ok(result) => {
                result.map_err(|e| translate(&format!("receiving messages on '{}'", self.path), e))
            }
            Err(_) => {
                log::debug!(
                    "receive on '{}' timed out after {timeout:?}, treating as empty",
                    self.path
                );
                Ok(Vec::new())
            }
        }
    }

    pub async fn abandon_message(&self, message: &ServiceBusReceivedMessage) -> ServiceBusResult<()> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| disposed(&self.path))?;
        receiver
            .abandon_message(message, None)
            .await
            .map_err(|e| translate(&format!("abandoning message on '{}'", self.path), e))
    }

    pub async fn complete_message(&self, message: &ServiceBusReceivedMessage) -> ServiceBusResult<()> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| disposed(&self.path))?;
        receiver
            .complete_message(message)
            .await
            .map_err(|e| translate(&format!("completing message on '{}'", self.path), e))
    }

    /// Abandons a whole batch, continuing past per-message failures so locks
    /// that can be released are released. Returns how many were abandoned.
    pub async fn abandon_messages(
        &self,
        messages: &[ServiceBusReceivedMessage],
    ) -> ServiceBusResult<usize> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| disposed(&self.path))?;

        let mut abandoned = 0usize;
        for message in messages {
            match receiver.abandon_message(message, None).await {
                Ok(()) => abandoned += 1,
                Err(e) => {
                    log::warn!(
                        "failed to abandon message seq {} on '{}': {e}",
                        message.sequence_number(),
                        self.path
                    );
                }
            }
        }
        if abandoned < messages.len() {
            log::warn!(
                "abandoned {abandoned} of {} locked messages on '{}'; the rest will reappear after lock expiry",
                messages.len(),
                self.path
            );
        }
        Ok(abandoned)
    }

    /// Completes a whole batch, continuing past per-message failures. Returns
    /// how many were completed.
    pub async fn complete_messages(
        &self,
        messages: &[ServiceBusReceivedMessage],
    ) -> ServiceBusResult<usize> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| disposed(&self.path))?;

        let mut completed = 0usize;
        for message in messages {
            match receiver.complete_message(message).await {
                Ok(()) => completed += 1,
                Err(e) => {
                    log::error!(
                        "failed to complete message seq {} on '{}': {e}",
                        message.sequence_number(),
                        self.path
                    );
                }
            }
        }
        Ok(completed)
    }

    /// Disposal is idempotent; a second call finds the receiver gone and
    /// succeeds.
    pub async fn dispose(&self) -> ServiceBusResult<()> {
        let mut guard = self.receiver.lock().await;
        if let Some(receiver) = guard.take() {
            receiver
                .dispose()
                .await
                .map_err(|e| translate(&format!("closing receiver on '{}'", self.path), e))?;
        }
        Ok(())
    }
}

pub trait ServiceBusClientExt {
    /// Opens a receiver on the entity, scoped to its dead-letter sub-queue
    /// when `dead_letter` is set.
    fn create_consumer_for_entity(
        &mut self,
        entity: &EntityRef,
        dead_letter: bool,
    ) -> impl Future<Output = ServiceBusResult<Consumer>>;
}

impl<RP> ServiceBusClientExt for ServiceBusClient<RP>
where
    RP: azservicebus::ServiceBusRetryPolicy
        + From<azservicebus::ServiceBusRetryOptions>
        + Send
        + Sync
        + 'static,
{
    async fn create_consumer_for_entity(
        &mut self,
        entity: &EntityRef,
        dead_letter: bool,
    ) -> ServiceBusResult<Consumer> {
        let path = entity.receive_path(dead_letter);
        let receiver = self
            .create_receiver_for_queue(path.clone(), ServiceBusReceiverOptions::default())
            .await
            .map_err(|e| translate(&format!("opening receiver on '{path}'"), e))?;
        Ok(Consumer::new(path, receiver))
    }
}

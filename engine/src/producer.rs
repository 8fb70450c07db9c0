//! Sender wrapper and outbound message construction.

use azservicebus::{
    ServiceBusClient, ServiceBusMessage, ServiceBusReceivedMessage, ServiceBusSender,
    ServiceBusSenderOptions,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{ServiceBusError, ServiceBusResult, translate};

/// A message composed by the user for sending, before SDK conversion.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub body: String,
    /// Explicit id; a random uuid is assigned when absent.
    pub message_id: Option<String>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub subject: Option<String>,
    pub session_id: Option<String>,
    pub time_to_live: Option<Duration>,
    pub application_properties: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Builds a resend template from a display snapshot, carrying the user-
    /// visible fields. Broker-owned fields start fresh on send.
    pub fn from_model(model: &crate::model::MessageModel) -> Self {
        Self {
            body: model.body.as_send_payload(),
            message_id: Some(model.id.clone()),
            content_type: model.content_type.clone(),
            correlation_id: model.correlation_id.clone(),
            subject: model.subject.clone(),
            session_id: model.session_id.clone(),
            time_to_live: model.time_to_live_secs.map(Duration::from_secs),
            application_properties: model
                .application_properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub(crate) fn into_sdk_message(self) -> ServiceBusResult<ServiceBusMessage> {
        let mut message = ServiceBusMessage::new(self.body.into_bytes());

        let id = self
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        message
            .set_message_id(&id)
            .map_err(|e| ServiceBusError::Validation(format!("invalid message id '{id}': {e}")))?;

        if let Some(content_type) = self.content_type {
            message.set_content_type(content_type);
        }
        if let Some(correlation_id) = self.correlation_id {
            message.set_correlation_id(correlation_id);
        }
        if let Some(subject) = self.subject {
            message.set_subject(subject);
        }
        if let Some(session_id) = self.session_id {
            message.set_session_id(session_id).map_err(|e| {
                ServiceBusError::Validation(format!("invalid session id: {e}"))
            })?;
        }
        if let Some(ttl) = self.time_to_live {
            message.set_time_to_live(ttl).map_err(|e| {
                ServiceBusError::Validation(format!("invalid time to live: {e}"))
            })?;
        }
        for (key, value) in self.application_properties {
            message
                .application_properties_mut()
                .get_or_insert_with(Default::default)
                .0
                .insert(key, value.into());
        }

        Ok(message)
    }
}

/// Builds a fresh broker message carrying a received message's body and
/// user-visible fields. Broker-owned fields (sequence, enqueue time, delivery
/// count, dead-letter metadata) are deliberately not carried; the copy starts
/// a new delivery history.
pub fn clone_for_resend(
    source: &ServiceBusReceivedMessage,
) -> ServiceBusResult<ServiceBusMessage> {
    let body = source
        .body()
        .map_err(|e| ServiceBusError::generic("reading message body for resend", e.to_string()))?;
    let mut message = ServiceBusMessage::new(body.to_vec());

    if let Some(id) = source.message_id() {
        let id = id.to_string();
        if let Err(e) = message.set_message_id(&id) {
            log::warn!("could not carry message id '{id}' onto resent copy: {e}");
        }
    }
    if let Some(content_type) = source.content_type() {
        message.set_content_type(content_type.to_string());
    }
    if let Some(correlation_id) = source.correlation_id() {
        message.set_correlation_id(correlation_id.to_string());
    }
    if let Some(subject) = source.subject() {
        message.set_subject(subject.to_string());
    }
    if let Some(session_id) = source.session_id() {
        if let Err(e) = message.set_session_id(session_id.to_string()) {
            log::warn!("could not carry session id onto resent copy: {e}");
        }
    }
    if let Some(partition_key) = source.partition_key() {
        if let Err(e) = message.set_partition_key(partition_key.to_string()) {
            log::warn!("could not carry partition key onto resent copy: {e}");
        }
    }
    if let Some(reply_to) = source.reply_to() {
        message.set_reply_to(reply_to.to_string());
    }
    if let Some(reply_to_session_id) = source.reply_to_session_id() {
        message.set_reply_to_session_id(reply_to_session_id.to_string());
    }
    if let Some(ttl) = source.time_to_live() {
        if let Err(e) = message.set_time_to_live(ttl) {
            log::warn!("could not carry time to live onto resent copy: {e}");
        }
    }
    if let Some(props) = source.application_properties() {
        for (key, value) in props.0.iter() {
            message
                .application_properties_mut()
                .get_or_insert_with(Default::default)
                .0
                .insert(key.clone(), value.clone());
        }
    }

    Ok(message)
}

/// A sender bound to one queue or topic.
#[derive(Debug)]
pub struct Producer {
    path: String,
    sender: Arc<Mutex<Option<ServiceBusSender>>>,
}

impl PartialEq for Producer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.sender, &other.sender)
    }
}

impl Producer {
    pub fn new(path: impl Into<String>, sender: ServiceBusSender) -> Self {
        Self {
            path: path.into(),
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn send_message(&self, message: ServiceBusMessage) -> ServiceBusResult<()> {
        let mut guard = self.sender.lock().await;
        let sender = guard.as_mut().ok_or_else(|| {
            ServiceBusError::generic(
                format!("sending to '{}'", self.path),
                "sender already disposed",
            )
        })?;
        sender
            .send_message(message)
            .await
            .map_err(|e| translate(&format!("sending to '{}'", self.path), e))
    }

    pub async fn send_messages(&self, messages: Vec<ServiceBusMessage>) -> ServiceBusResult<()> {
        let mut guard = self.sender.lock().await;
        let sender = guard.as_mut().ok_or_else(|| {
            ServiceBusError::generic(
                format!("sending to '{}'", self.path),
                "sender already disposed",
            )
        })?;
        sender
            .send_messages(messages)
            .await
            .map_err(|e| translate(&format!("sending batch to '{}'", self.path), e))
    }

    pub async fn dispose(&self) -> ServiceBusResult<()> {
        let mut guard = self.sender.lock().await;
        if let Some(sender) = guard.take() {
            sender
                .dispose()
                .await
                .map_err(|e| translate(&format!("closing sender on '{}'", self.path), e))?;
        }
        Ok(())
    }
}

pub trait ServiceBusClientProducerExt {
    fn create_producer_for_path(
        &mut self,
        path: impl Into<String> + Send,
    ) -> impl Future<Output = ServiceBusResult<Producer>>;
}

impl<RP> ServiceBusClientProducerExt for ServiceBusClient<RP>
where
    RP: azservicebus::ServiceBusRetryPolicy
        + From<azservicebus::ServiceBusRetryOptions>
        + Send
        + Sync
        + 'static,
{
    async fn create_producer_for_path(
        &mut self,
        path: impl Into<String> + Send,
    ) -> ServiceBusResult<Producer> {
        let path = path.into();
        let sender = self
            .create_sender(path.clone(), ServiceBusSenderOptions::default())
            .await
            .map_err(|e| translate(&format!("opening sender on '{path}'"), e))?;
        Ok(Producer::new(path, sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::assert_ok;

    #[test]
    fn outbound_text_message_converts_with_generated_id() {
        let outbound = OutboundMessage::text("hello");
        assert_ok!(outbound.into_sdk_message());
    }

    #[test]
    fn outbound_message_carries_application_properties() {
        let outbound = OutboundMessage {
            body: "x".to_string(),
            application_properties: HashMap::from([
                ("region".to_string(), "eu".to_string()),
                ("attempt".to_string(), "1".to_string()),
            ]),
            ..Default::default()
        };
        assert_ok!(outbound.into_sdk_message());
    }

    #[test]
    fn outbound_message_keeps_explicit_fields() {
        let outbound = OutboundMessage {
            body: r#"{"a":1}"#.to_string(),
            message_id: Some("order-42".to_string()),
            content_type: Some("application/json".to_string()),
            correlation_id: Some("corr-1".to_string()),
            subject: Some("orders".to_string()),
            ..Default::default()
        };
        assert_ok!(outbound.into_sdk_message());
    }
}

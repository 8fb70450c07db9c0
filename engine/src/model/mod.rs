//! Display-oriented message snapshot.
//!
//! Broker messages are converted into [`MessageModel`] at the retrieval
//! boundary so the UI never holds SDK types. The snapshot keeps the full
//! broker field set, including dead-letter metadata when the message came
//! from a dead-letter sub-queue.

use azservicebus::ServiceBusReceivedMessage;
use azservicebus::prelude::ServiceBusPeekedMessage;
use azservicebus::primitives::service_bus_message_state::ServiceBusMessageState;
use azure_core::date::OffsetDateTime;
use serde::Serialize;
use serde::ser::Serializer;
use serde_json::Value;
use std::collections::BTreeMap;

/// A message as shown to the user: identity, timing, delivery state and body.
#[derive(Serialize, Clone, PartialEq, Debug)]
pub struct MessageModel {
    /// Sequence number assigned by the broker, unique per entity.
    pub sequence: i64,
    pub id: String,
    #[serde(with = "azure_core::date::iso8601")]
    pub enqueued_at: OffsetDateTime,
    pub delivery_count: usize,
    pub state: MessageState,
    pub body: BodyData,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub subject: Option<String>,
    pub session_id: Option<String>,
    pub partition_key: Option<String>,
    pub reply_to: Option<String>,
    pub reply_to_session_id: Option<String>,
    pub time_to_live_secs: Option<u64>,
    /// Custom application properties, values rendered as display strings.
    pub application_properties: BTreeMap<String, String>,
    pub dead_letter_reason: Option<String>,
    pub dead_letter_description: Option<String>,
    pub dead_letter_source: Option<String>,
}

/// Lifecycle state of a message at the time it was observed.
#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MessageState {
    #[default]
    Active,
    Deferred,
    Scheduled,
    DeadLettered,
}

/// Message body, parsed as JSON when it is valid JSON and kept raw otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyData {
    ValidJson(Value),
    RawString(String),
}

impl BodyData {
    /// JSON-first parse of a body payload. Invalid UTF-8 is replaced lossily
    /// rather than rejected, since a viewer still wants to see the bytes.
    pub fn parse(bytes: &[u8]) -> BodyData {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(val) => BodyData::ValidJson(val),
            Err(_) => BodyData::RawString(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Body rendered as the string a send operation would carry.
    pub fn as_send_payload(&self) -> String {
        match self {
            BodyData::ValidJson(val) => val.to_string(),
            BodyData::RawString(s) => s.clone(),
        }
    }
}

impl Serialize for BodyData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            BodyData::ValidJson(val) => val.serialize(serializer),
            BodyData::RawString(s) => serializer.serialize_str(s),
        }
    }
}

/// Conversion failures; a message without an id or body cannot be displayed.
#[derive(Debug)]
pub enum MessageModelError {
    MissingMessageId,
    MissingMessageBody,
}

fn display_property_value(value: &impl std::fmt::Debug) -> String {
    format!("{value:?}")
}

impl MessageModel {
    /// Converts a peeked batch, dropping messages that fail to convert. A
    /// malformed message should not abort the whole listing.
    pub fn from_peeked_batch(
        messages: Vec<ServiceBusPeekedMessage>,
        dead_letter: bool,
    ) -> Vec<MessageModel> {
        messages
            .into_iter()
            .filter_map(|msg| MessageModel::from_peeked(&msg, dead_letter).ok())
            .collect()
    }

    pub fn from_peeked(
        msg: &ServiceBusPeekedMessage,
        dead_letter: bool,
    ) -> Result<Self, MessageModelError> {
        let id = msg
            .message_id()
            .ok_or(MessageModelError::MissingMessageId)?
            .to_string();
        let body = BodyData::parse(msg.body().map_err(|_| MessageModelError::MissingMessageBody)?);

        let state = if dead_letter {
            MessageState::DeadLettered
        } else {
            match msg.state() {
                ServiceBusMessageState::Active => MessageState::Active,
                ServiceBusMessageState::Deferred => MessageState::Deferred,
                ServiceBusMessageState::Scheduled => MessageState::Scheduled,
            }
        };

        let mut application_properties = BTreeMap::new();
        if let Some(props) = msg.application_properties() {
            for (key, value) in props.0.iter() {
                application_properties.insert(key.to_string(), display_property_value(value));
            }
        }

        Ok(Self {
            sequence: msg.sequence_number(),
            id,
            enqueued_at: msg.enqueued_time(),
            delivery_count: msg.delivery_count().unwrap_or(0) as usize,
            state,
            body,
            content_type: msg.content_type().map(|v| v.to_string()),
            correlation_id: msg.correlation_id().map(|v| v.to_string()),
            subject: msg.subject().map(|v| v.to_string()),
            session_id: msg.session_id().map(|v| v.to_string()),
            partition_key: msg.partition_key().map(|v| v.to_string()),
            reply_to: msg.reply_to().map(|v| v.to_string()),
            reply_to_session_id: msg.reply_to_session_id().map(|v| v.to_string()),
            time_to_live_secs: msg.time_to_live().map(|d| d.as_secs()),
            application_properties,
            dead_letter_reason: msg.dead_letter_reason().map(|v| v.to_string()),
            dead_letter_description: msg.dead_letter_error_description().map(|v| v.to_string()),
            dead_letter_source: msg.dead_letter_source().map(|v| v.to_string()),
        })
    }

    /// Snapshot of a locked message. The message stays borrowed because the
    /// caller still needs it for the abandon or complete disposition.
    pub fn from_received(
        msg: &ServiceBusReceivedMessage,
        dead_letter: bool,
    ) -> Result<Self, MessageModelError> {
        let id = msg
            .message_id()
            .ok_or(MessageModelError::MissingMessageId)?
            .to_string();
        let body = BodyData::parse(msg.body().map_err(|_| MessageModelError::MissingMessageBody)?);

        let state = if dead_letter {
            MessageState::DeadLettered
        } else {
            MessageState::Active
        };

        let mut application_properties = BTreeMap::new();
        if let Some(props) = msg.application_properties() {
            for (key, value) in props.0.iter() {
                application_properties.insert(key.to_string(), display_property_value(value));
            }
        }

        Ok(Self {
            sequence: msg.sequence_number(),
            id,
            enqueued_at: msg.enqueued_time(),
            delivery_count: msg.delivery_count().unwrap_or(0) as usize,
            state,
            body,
            content_type: msg.content_type().map(|v| v.to_string()),
            correlation_id: msg.correlation_id().map(|v| v.to_string()),
            subject: msg.subject().map(|v| v.to_string()),
            session_id: msg.session_id().map(|v| v.to_string()),
            partition_key: msg.partition_key().map(|v| v.to_string()),
            reply_to: msg.reply_to().map(|v| v.to_string()),
            reply_to_session_id: msg.reply_to_session_id().map(|v| v.to_string()),
            time_to_live_secs: msg.time_to_live().map(|d| d.as_secs()),
            application_properties,
            dead_letter_reason: msg.dead_letter_reason().map(|v| v.to_string()),
            dead_letter_description: msg.dead_letter_error_description().map(|v| v.to_string()),
            dead_letter_source: msg.dead_letter_source().map(|v| v.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn json_bodies_parse_as_structured_values() {
        let body = BodyData::parse(br#"{"orderId": 42, "items": ["a", "b"]}"#);
        match body {
            BodyData::ValidJson(val) => {
                assert_eq!(val["orderId"], 42);
                assert_eq!(val["items"][1], "b");
            }
            other => panic!("expected ValidJson, got {other:?}"),
        }
    }

    #[test]
    fn non_json_bodies_stay_raw() {
        assert_eq!(
            BodyData::parse(b"plain text payload"),
            BodyData::RawString("plain text payload".to_string())
        );
        // Truncated JSON counts as raw, not an error.
        assert_eq!(
            BodyData::parse(b"{\"broken\":"),
            BodyData::RawString("{\"broken\":".to_string())
        );
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let body = BodyData::parse(&[0xff, 0xfe, b'h', b'i']);
        match body {
            BodyData::RawString(s) => assert!(s.contains("hi")),
            other => panic!("expected RawString, got {other:?}"),
        }
    }

    #[test]
    fn send_payload_preserves_json_and_raw_forms() {
        let json = BodyData::parse(br#"{"a":1}"#);
        assert_eq!(json.as_send_payload(), r#"{"a":1}"#);

        let raw = BodyData::RawString("hello".to_string());
        assert_eq!(raw.as_send_payload(), "hello");
    }

    #[test]
    fn body_serializes_inline_not_wrapped() {
        let json = serde_json::to_string(&BodyData::parse(br#"{"a":1}"#)).unwrap();
        assert_eq!(json, r#"{"a":1}"#);

        let raw = serde_json::to_string(&BodyData::RawString("x".to_string())).unwrap();
        assert_eq!(raw, r#""x""#);
    }

    proptest! {
        #[test]
        fn body_parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = BodyData::parse(&bytes);
        }

        #[test]
        fn valid_json_round_trips_through_send_payload(value in any::<i64>()) {
            let payload = format!(r#"{{"n":{value}}}"#);
            let body = BodyData::parse(payload.as_bytes());
            prop_assert!(matches!(body, BodyData::ValidJson(_)));
            let reparsed: Value = serde_json::from_str(&body.as_send_payload()).unwrap();
            prop_assert_eq!(reparsed["n"].as_i64(), Some(value));
        }
    }
}

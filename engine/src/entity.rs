//! Entity references for queues and topic subscriptions.
//!
//! Every broker operation addresses either a queue or a subscription under a
//! topic. [`EntityRef`] carries that distinction as a tagged variant so path
//! construction is exhaustively matched instead of sniffed from strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path suffix addressing an entity's dead-letter sub-queue.
pub const DEAD_LETTER_SUFFIX: &str = "/$deadletterqueue";

/// A broker entity that messages can be received from.
///
/// A subscription reference always carries its owning topic name, since the
/// broker addresses subscriptions as `topic/Subscriptions/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EntityRef {
    Queue { name: String },
    Subscription { topic: String, name: String },
}

/// Discriminant of an [`EntityRef`], used for favorite ids and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Queue,
    Subscription,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Queue => "queue",
            EntityKind::Subscription => "subscription",
        }
    }
}

impl EntityRef {
    pub fn queue(name: impl Into<String>) -> Self {
        EntityRef::Queue { name: name.into() }
    }

    pub fn subscription(topic: impl Into<String>, name: impl Into<String>) -> Self {
        EntityRef::Subscription {
            topic: topic.into(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Queue { .. } => EntityKind::Queue,
            EntityRef::Subscription { .. } => EntityKind::Subscription,
        }
    }

    /// Path used to open a receiver on this entity, optionally scoped to its
    /// dead-letter sub-queue.
    pub fn receive_path(&self, dead_letter: bool) -> String {
        let base = match self {
            EntityRef::Queue { name } => name.clone(),
            EntityRef::Subscription { topic, name } => {
                format!("{topic}/Subscriptions/{name}")
            }
        };
        if dead_letter {
            format!("{base}{DEAD_LETTER_SUFFIX}")
        } else {
            base
        }
    }

    /// Path messages are sent to when they are resent or transferred back to
    /// the live entity. Subscriptions receive from a topic, so sends target
    /// the owning topic.
    pub fn send_path(&self) -> &str {
        match self {
            EntityRef::Queue { name } => name,
            EntityRef::Subscription { topic, .. } => topic,
        }
    }

    /// Name of the owning topic for subscription references.
    pub fn topic_name(&self) -> Option<&str> {
        match self {
            EntityRef::Queue { .. } => None,
            EntityRef::Subscription { topic, .. } => Some(topic),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Queue { name } => write!(f, "queue '{name}'"),
            EntityRef::Subscription { topic, name } => {
                write!(f, "subscription '{name}' of topic '{topic}'")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_receive_path() {
        let entity = EntityRef::queue("orders");
        assert_eq!(entity.receive_path(false), "orders");
        assert_eq!(entity.receive_path(true), "orders/$deadletterqueue");
    }

    #[test]
    fn subscription_receive_path_includes_topic() {
        let entity = EntityRef::subscription("events", "audit");
        assert_eq!(entity.receive_path(false), "events/Subscriptions/audit");
        assert_eq!(
            entity.receive_path(true),
            "events/Subscriptions/audit/$deadletterqueue"
        );
    }

    #[test]
    fn send_path_targets_owning_topic_for_subscriptions() {
        assert_eq!(EntityRef::queue("orders").send_path(), "orders");
        assert_eq!(
            EntityRef::subscription("events", "audit").send_path(),
            "events"
        );
    }

    #[test]
    fn topic_name_only_for_subscriptions() {
        assert_eq!(EntityRef::queue("orders").topic_name(), None);
        assert_eq!(
            EntityRef::subscription("events", "audit").topic_name(),
            Some("events")
        );
    }
}

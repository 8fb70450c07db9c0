//! Namespace topology enumeration.

use futures::future::join_all;
use std::sync::Arc;

use crate::admin::{AdminClient, CountDetails, QueueInfo, SubscriptionInfo, TopicInfo};
use crate::entity::EntityRef;
use crate::error::ServiceBusResult;

/// A topic together with its subscriptions.
#[derive(Debug, Clone)]
pub struct TopicNode {
    pub info: TopicInfo,
    pub subscriptions: Vec<SubscriptionInfo>,
}

/// Full namespace overview as shown in the explorer tree.
#[derive(Debug, Clone, Default)]
pub struct NamespaceInfo {
    pub queues: Vec<QueueInfo>,
    pub topics: Vec<TopicNode>,
}

impl NamespaceInfo {
    pub fn entity_count(&self) -> usize {
        self.queues.len()
            + self
                .topics
                .iter()
                .map(|t| t.subscriptions.len())
                .sum::<usize>()
    }
}

/// Reads topology through the management API.
pub struct TopologyReader {
    admin: Arc<AdminClient>,
}

impl TopologyReader {
    pub fn new(admin: Arc<AdminClient>) -> Self {
        Self { admin }
    }

    /// Builds the namespace overview.
    ///
    /// Queue and topic listings run concurrently; once topic names are known,
    /// all subscription listings run as a second concurrent wave. A failing
    /// subscription listing degrades that topic to an empty node instead of
    /// failing the overview.
    pub async fn get_namespace_info(&self) -> ServiceBusResult<NamespaceInfo> {
        let (queues, topics) = tokio::join!(self.admin.list_queues(), self.admin.list_topics());
        let queues = queues?;
        let topics = topics?;

        let subscription_lists = join_all(
            topics
                .iter()
                .map(|topic| self.admin.list_subscriptions(&topic.name)),
        )
        .await;

        let mut nodes = Vec::with_capacity(topics.len());
        for (info, subscriptions) in topics.into_iter().zip(subscription_lists) {
            let subscriptions = match subscriptions {
                Ok(subs) => subs,
                Err(e) => {
                    log::warn!(
                        "could not list subscriptions of topic '{}': {e}",
                        info.name
                    );
                    Vec::new()
                }
            };
            nodes.push(TopicNode {
                info,
                subscriptions,
            });
        }

        let namespace = NamespaceInfo {
            queues,
            topics: nodes,
        };
        log::info!(
            "namespace overview: {} queues, {} topics, {} receivable entities",
            namespace.queues.len(),
            namespace.topics.len(),
            namespace.entity_count()
        );
        Ok(namespace)
    }

    /// Refreshes the counters of a single entity without re-reading the tree.
    pub async fn refresh_counts(&self, entity: &EntityRef) -> ServiceBusResult<CountDetails> {
        self.admin.entity_counts(entity).await
    }

    pub async fn queue_info(&self, name: &str) -> ServiceBusResult<QueueInfo> {
        self.admin.get_queue(name).await
    }

    pub async fn topic_info(&self, name: &str) -> ServiceBusResult<TopicInfo> {
        self.admin.get_topic(name).await
    }

    pub async fn subscription_info(
        &self,
        topic: &str,
        name: &str,
    ) -> ServiceBusResult<SubscriptionInfo> {
        self.admin.get_subscription(topic, name).await
    }

    /// Whether lock-mode operations must be declined for this entity.
    pub async fn requires_session(&self, entity: &EntityRef) -> ServiceBusResult<bool> {
        self.admin.requires_session(entity).await
    }
}

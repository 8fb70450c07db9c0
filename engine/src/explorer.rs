//! High-level operation facade.
//!
//! The host application drives everything through [`ServiceBusExplorer`].
//! Every operation crosses one error boundary here: failures are logged,
//! remembered as the last error and returned already classified.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::admin::CountDetails;
use crate::auth::ParsedConnectionString;
use crate::config::EngineConfig;
use crate::connection::ConnectionManager;
use crate::consumer::{Consumer, ServiceBusClientExt};
use crate::entity::EntityRef;
use crate::error::{ServiceBusError, ServiceBusResult, validate_connection_string};
use crate::lifecycle::{BulkOutcome, LifecycleEngine};
use crate::model::MessageModel;
use crate::monitor::{MonitorCallback, MonitorRegistry, MonitorStart, monitor_key};
use crate::producer::{OutboundMessage, Producer, ServiceBusClientProducerExt};
use crate::progress::{ProgressReporter, with_progress};
use crate::retrieval::{RetrievalEngine, RetrievalMode};
use crate::topology::{NamespaceInfo, TopologyReader};

/// Live and dead-letter listings of one entity, fetched together.
#[derive(Debug, Clone, Default)]
pub struct RetrievedMessages {
    pub live: Vec<MessageModel>,
    pub dead_letter: Vec<MessageModel>,
}

pub struct ServiceBusExplorer {
    connections: ConnectionManager,
    retrieval: RetrievalEngine,
    lifecycle: LifecycleEngine,
    monitors: MonitorRegistry,
    last_error: Mutex<Option<ServiceBusError>>,
}

impl ServiceBusExplorer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            connections: ConnectionManager::new(),
            retrieval: RetrievalEngine::new(config.clone()),
            lifecycle: LifecycleEngine::new(config.clone()),
            monitors: MonitorRegistry::new(config),
            last_error: Mutex::new(None),
        }
    }

    /// Most recent operation failure, for a status line or error panel.
    pub async fn last_error(&self) -> Option<ServiceBusError> {
        self.last_error.lock().await.clone()
    }

    async fn finish<T>(&self, operation: &str, result: ServiceBusResult<T>) -> ServiceBusResult<T> {
        if let Err(e) = &result {
            log::error!("{operation} failed: {e}");
            *self.last_error.lock().await = Some(e.clone());
        }
        result
    }

    /// Shape-checks a connection string without touching the network; the
    /// actual broker handshake happens on the first operation.
    pub fn validate_connection(&self, connection_string: &str) -> ServiceBusResult<()> {
        validate_connection_string(connection_string)
    }

    async fn open_consumer(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        dead_letter: bool,
    ) -> ServiceBusResult<Consumer> {
        let client = self.connections.get_client(connection_string).await?;
        let mut client = client.lock().await;
        client.create_consumer_for_entity(entity, dead_letter).await
    }

    async fn open_producer(
        &self,
        connection_string: &str,
        entity: &EntityRef,
    ) -> ServiceBusResult<Producer> {
        let client = self.connections.get_client(connection_string).await?;
        let mut client = client.lock().await;
        client.create_producer_for_path(entity.send_path()).await
    }

    async fn topology(&self, connection_string: &str) -> ServiceBusResult<TopologyReader> {
        Ok(TopologyReader::new(
            self.connections.get_admin_client(connection_string).await?,
        ))
    }

    /// Full namespace overview.
    pub async fn namespace(&self, connection_string: &str) -> ServiceBusResult<NamespaceInfo> {
        let result = match self.topology(connection_string).await {
            Ok(reader) => reader.get_namespace_info().await,
            Err(e) => Err(e),
        };
        self.finish("reading namespace topology", result).await
    }

    /// Live counters for one entity without re-reading the tree.
    pub async fn refresh_counts(
        &self,
        connection_string: &str,
        entity: &EntityRef,
    ) -> ServiceBusResult<CountDetails> {
        let result = match self.topology(connection_string).await {
            Ok(reader) => reader.refresh_counts(entity).await,
            Err(e) => Err(e),
        };
        self.finish(&format!("refreshing counters of {entity}"), result)
            .await
    }

    /// Fetches live and dead-letter listings of one entity concurrently.
    /// A count of zero skips that side without any broker traffic.
    pub async fn retrieve(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        mode: RetrievalMode,
        live_count: usize,
        dead_letter_count: usize,
        progress: &dyn ProgressReporter,
    ) -> ServiceBusResult<RetrievedMessages> {
        let result = with_progress(progress, "retrieving messages", async {
            let (live, dead_letter) = tokio::join!(
                self.fetch_one_side(connection_string, entity, mode, live_count, false, progress),
                self.fetch_one_side(
                    connection_string,
                    entity,
                    mode,
                    dead_letter_count,
                    true,
                    progress
                ),
            );
            Ok(RetrievedMessages {
                live: live?,
                dead_letter: dead_letter?,
            })
        })
        .await;
        self.finish(&format!("retrieving messages of {entity}"), result)
            .await
    }

    async fn fetch_one_side(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        mode: RetrievalMode,
        count: usize,
        dead_letter: bool,
        progress: &dyn ProgressReporter,
    ) -> ServiceBusResult<Vec<MessageModel>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let consumer = self
            .open_consumer(connection_string, entity, dead_letter)
            .await?;
        let outcome = self
            .retrieval
            .fetch(&consumer, mode, count, None, dead_letter, progress)
            .await;
        if let Err(e) = consumer.dispose().await {
            log::warn!("error closing retrieval receiver on {entity}: {e}");
        }
        outcome
    }

    /// Non-destructive listing of up to `count` messages from one view,
    /// optionally resuming from a sequence number for paging.
    pub async fn peek_messages(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        dead_letter: bool,
        count: u32,
        from_sequence: Option<i64>,
    ) -> ServiceBusResult<Vec<MessageModel>> {
        let result = async {
            let consumer = self
                .open_consumer(connection_string, entity, dead_letter)
                .await?;
            let outcome = self
                .retrieval
                .peek(&consumer, count, from_sequence, dead_letter)
                .await;
            if let Err(e) = consumer.dispose().await {
                log::warn!("error closing peek receiver on {entity}: {e}");
            }
            outcome
        }
        .await;
        self.finish(&format!("peeking messages on {entity}"), result)
            .await
    }

    /// Deletes every message from the entity (or its dead-letter sub-queue).
    pub async fn purge(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        dead_letter: bool,
        token: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> ServiceBusResult<BulkOutcome> {
        let result = with_progress(progress, "purging", async {
            let consumer = self
                .open_consumer(connection_string, entity, dead_letter)
                .await?;
            let outcome = self.lifecycle.purge(&consumer, token, progress).await;
            if let Err(e) = consumer.dispose().await {
                log::warn!("error closing purge receiver on {entity}: {e}");
            }
            outcome
        })
        .await;
        self.finish(&format!("purging {entity}"), result).await
    }

    /// Moves dead-lettered messages back onto the live entity, all of them or
    /// only the given message ids.
    pub async fn transfer_dead_letters(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        target_ids: Option<&[String]>,
        token: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> ServiceBusResult<BulkOutcome> {
        let result = with_progress(progress, "transferring dead letters", async {
            let consumer = self.open_consumer(connection_string, entity, true).await?;
            let producer = self.open_producer(connection_string, entity).await?;
            let outcome = self
                .lifecycle
                .transfer_dead_letters(&consumer, &producer, target_ids, token, progress)
                .await;
            if let Err(e) = producer.dispose().await {
                log::warn!("error closing transfer sender on {entity}: {e}");
            }
            if let Err(e) = consumer.dispose().await {
                log::warn!("error closing transfer receiver on {entity}: {e}");
            }
            outcome
        })
        .await;
        self.finish(&format!("transferring dead letters of {entity}"), result)
            .await
    }

    /// Sends one user-composed message to the entity (its owning topic for a
    /// subscription).
    pub async fn send_message(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        message: OutboundMessage,
    ) -> ServiceBusResult<()> {
        let result = async {
            let producer = self.open_producer(connection_string, entity).await?;
            let outcome = self.lifecycle.send_message(&producer, message).await;
            if let Err(e) = producer.dispose().await {
                log::warn!("error closing sender on {entity}: {e}");
            }
            outcome
        }
        .await;
        self.finish(&format!("sending to {entity}"), result).await
    }

    /// Resends a displayed message, carrying its user-visible fields.
    pub async fn resend_message(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        model: &MessageModel,
    ) -> ServiceBusResult<()> {
        self.send_message(connection_string, entity, OutboundMessage::from_model(model))
            .await
    }

    /// Sends `copies` messages built from the same template, each with a
    /// fresh id.
    pub async fn send_repeated(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        template: &OutboundMessage,
        copies: usize,
    ) -> ServiceBusResult<()> {
        let result = async {
            let producer = self.open_producer(connection_string, entity).await?;
            let outcome = self
                .lifecycle
                .send_repeated(&producer, template, copies)
                .await;
            if let Err(e) = producer.dispose().await {
                log::warn!("error closing sender on {entity}: {e}");
            }
            outcome
        }
        .await;
        self.finish(&format!("sending batch to {entity}"), result)
            .await
    }

    /// Starts (or restarts) a live monitor on the entity.
    pub async fn start_monitor(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        dead_letter: bool,
        callback: MonitorCallback,
    ) -> ServiceBusResult<MonitorStart> {
        let result = async {
            let scope = ParsedConnectionString::parse(connection_string)?
                .fully_qualified_namespace;
            let requires_session = self
                .connections
                .get_admin_client(connection_string)
                .await?
                .requires_session(entity)
                .await?;
            let consumer = self
                .open_consumer(connection_string, entity, dead_letter)
                .await?;
            self.monitors
                .start(&scope, entity, dead_letter, requires_session, consumer, callback)
                .await
        }
        .await;
        self.finish(&format!("starting monitor on {entity}"), result)
            .await
    }

    pub async fn stop_monitor(
        &self,
        connection_string: &str,
        entity: &EntityRef,
        dead_letter: bool,
    ) -> ServiceBusResult<bool> {
        let scope = ParsedConnectionString::parse(connection_string)?.fully_qualified_namespace;
        Ok(self
            .monitors
            .stop(&monitor_key(&scope, entity, dead_letter))
            .await)
    }

    pub async fn running_monitors(&self) -> Vec<String> {
        self.monitors.running().await
    }

    /// Closes one namespace connection after stopping its work.
    pub async fn close_connection(&self, connection_string: &str) -> ServiceBusResult<()> {
        let result = self.connections.close_client(connection_string).await;
        self.finish("closing namespace connection", result).await
    }

    /// Stops all monitors and closes every connection.
    pub async fn shutdown(&self) {
        self.monitors.stop_all().await;
        self.connections.close_all().await;
        log::info!("engine shut down");
    }
}

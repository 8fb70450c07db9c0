//! Live per-entity monitors.
//!
//! A monitor is a spawned long-poll loop on its own receiver. Each arriving
//! message is snapshotted, handed to the callback and abandoned, so observing
//! an entity never consumes from it (delivery counts do increase).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::consumer::Consumer;
use crate::entity::EntityRef;
use crate::error::ServiceBusResult;
use crate::model::MessageModel;

/// Called for every message a monitor observes.
pub type MonitorCallback = Arc<dyn Fn(MessageModel) + Send + Sync>;

/// How a start request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStart {
    Started,
    /// An existing monitor on the same entity was torn down first.
    Restarted,
    /// Session-required entities need a session receiver the monitor does not
    /// hold; declining is a warning for the UI, not a failure.
    DeclinedSessionRequired,
}

struct MonitorHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Monitor identity: namespace scope plus entity receive path, so the same
/// entity name under two connections gets two monitors.
pub fn monitor_key(scope: &str, entity: &EntityRef, dead_letter: bool) -> String {
    format!("{scope}/{}", entity.receive_path(dead_letter))
}

/// Registry of running monitors, keyed by [`monitor_key`].
pub struct MonitorRegistry {
    config: EngineConfig,
    monitors: Mutex<HashMap<String, MonitorHandle>>,
}

impl MonitorRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a monitor on the entity the consumer is bound to.
    ///
    /// A monitor already running under the same key is stopped and replaced.
    /// The spawned loop owns the consumer and disposes it on exit.
    pub async fn start(
        &self,
        scope: &str,
        entity: &EntityRef,
        dead_letter: bool,
        requires_session: bool,
        consumer: Consumer,
        callback: MonitorCallback,
    ) -> ServiceBusResult<MonitorStart> {
        if requires_session {
            log::warn!("declining monitor on session-required {entity}");
            consumer.dispose().await?;
            return Ok(MonitorStart::DeclinedSessionRequired);
        }

        let key = monitor_key(scope, entity, dead_letter);
        let token = CancellationToken::new();
        let task = tokio::spawn(monitor_loop(
            key.clone(),
            consumer,
            dead_letter,
            callback,
            token.clone(),
            self.config.clone(),
        ));

        let replaced = self
            .swap_in(
                &key,
                MonitorHandle {
                    token,
                    task: Some(task),
                },
            )
            .await;
        log::info!("monitor started on '{key}'");
        Ok(if replaced {
            MonitorStart::Restarted
        } else {
            MonitorStart::Started
        })
    }

    /// Installs a handle under the key in one map mutation. The displaced
    /// handle, if any, is cancelled and joined, so concurrent starts on the
    /// same key always leave exactly one loop running.
    async fn swap_in(&self, key: &str, handle: MonitorHandle) -> bool {
        let displaced = self.monitors.lock().await.insert(key.to_string(), handle);
        let Some(mut displaced) = displaced else {
            return false;
        };
        displaced.token.cancel();
        if let Some(task) = displaced.task.take() {
            let _ = task.await;
        }
        log::debug!("monitor replaced on '{key}'");
        true
    }

    /// Stops the monitor on one path. Returns whether one was running.
    pub async fn stop(&self, key: &str) -> bool {
        let handle = self.monitors.lock().await.remove(key);
        let Some(mut handle) = handle else {
            return false;
        };
        handle.token.cancel();
        if let Some(task) = handle.task.take() {
            let _ = task.await;
        }
        log::info!("monitor stopped on '{key}'");
        true
    }

    /// Stops every monitor. Used on connection switch and shutdown.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, MonitorHandle)> =
            self.monitors.lock().await.drain().collect();
        for (key, mut handle) in drained {
            handle.token.cancel();
            if let Some(task) = handle.task.take() {
                let _ = task.await;
            }
            log::debug!("monitor stopped on '{key}'");
        }
    }

    /// Paths with a live monitor. Loops that died on error are pruned.
    pub async fn running(&self) -> Vec<String> {
        let mut monitors = self.monitors.lock().await;
        monitors.retain(|_, handle| {
            handle
                .task
                .as_ref()
                .is_some_and(|task| !task.is_finished())
        });
        monitors.keys().cloned().collect()
    }

    #[cfg(test)]
    async fn insert_idle_handle(&self, key: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let task = tokio::spawn(async move { loop_token.cancelled().await });
        self.swap_in(
            key,
            MonitorHandle {
                token: token.clone(),
                task: Some(task),
            },
        )
        .await;
        token
    }
}

async fn monitor_loop(
    key: String,
    consumer: Consumer,
    dead_letter: bool,
    callback: MonitorCallback,
    token: CancellationToken,
    config: EngineConfig,
) {
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            outcome = consumer.receive_messages_with_timeout(
                config.receive_batch_size(),
                config.monitor_poll_wait(),
            ) => outcome,
        };

        let batch = match received {
            Ok(batch) => batch,
            Err(e) => {
                // A broken receiver cannot recover; tear the monitor down.
                log::error!("monitor on '{key}' stopping after receive failure: {e}");
                break;
            }
        };

        for message in &batch {
            if let Ok(model) = MessageModel::from_received(message, dead_letter) {
                callback(model);
            }
        }
        if !batch.is_empty()
            && let Err(e) = consumer.abandon_messages(&batch).await
        {
            log::error!("monitor on '{key}' stopping, could not release locks: {e}");
            break;
        }
    }

    if let Err(e) = consumer.dispose().await {
        log::warn!("error closing monitor receiver on '{key}': {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_is_a_no_op_without_a_monitor() {
        let registry = MonitorRegistry::new(EngineConfig::default());
        assert!(!registry.stop("orders").await);
    }

    #[test]
    fn keys_are_scoped_per_namespace_and_view() {
        let entity = EntityRef::queue("orders");
        assert_eq!(monitor_key("demo", &entity, false), "demo/orders");
        assert_eq!(
            monitor_key("demo", &entity, true),
            "demo/orders/$deadletterqueue"
        );
        assert_ne!(
            monitor_key("demo", &entity, false),
            monitor_key("staging", &entity, false)
        );
    }

    #[tokio::test]
    async fn stop_cancels_and_removes_the_handle() {
        let registry = MonitorRegistry::new(EngineConfig::default());
        let token = registry.insert_idle_handle("demo/orders").await;

        assert_eq!(registry.running().await, vec!["demo/orders".to_string()]);
        assert!(registry.stop("demo/orders").await);
        assert!(token.is_cancelled());
        assert!(registry.running().await.is_empty());
    }

    #[tokio::test]
    async fn replacing_a_monitor_cancels_the_displaced_handle() {
        let registry = MonitorRegistry::new(EngineConfig::default());
        let first = registry.insert_idle_handle("demo/orders").await;
        let second = registry.insert_idle_handle("demo/orders").await;

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.running().await, vec!["demo/orders".to_string()]);
    }

    #[tokio::test]
    async fn stop_all_cancels_every_monitor() {
        let registry = MonitorRegistry::new(EngineConfig::default());
        let first = registry.insert_idle_handle("orders").await;
        let second = registry
            .insert_idle_handle("events/Subscriptions/audit/$deadletterqueue")
            .await;

        registry.stop_all().await;
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(registry.running().await.is_empty());
    }

    #[tokio::test]
    async fn finished_loops_are_pruned_from_running() {
        let registry = MonitorRegistry::new(EngineConfig::default());
        let token = registry.insert_idle_handle("orders").await;
        token.cancel();
        // Give the idle task a chance to observe the cancellation.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(registry.running().await.is_empty());
    }
}

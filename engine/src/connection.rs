//! Cached data-plane clients, one per connection string.

use azservicebus::core::BasicRetryPolicy;
use azservicebus::{ServiceBusClient, ServiceBusClientOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::admin::AdminClient;
use crate::error::{ServiceBusResult, translate, validate_connection_string};

/// The concrete client type every receiver and sender is opened from.
pub type SharedClient = Arc<Mutex<ServiceBusClient<BasicRetryPolicy>>>;

/// Lazily opens and caches one AMQP client and one management client per
/// connection string.
///
/// Opening a client does not probe the broker; a bad connection string
/// surfaces on the first receiver, sender or management call made through it.
#[derive(Default)]
pub struct ConnectionManager {
    clients: Mutex<HashMap<String, SharedClient>>,
    admins: Mutex<HashMap<String, Arc<AdminClient>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached client for this connection string, creating it on
    /// first use. The string is shape-validated before any client is built.
    pub async fn get_client(&self, connection_string: &str) -> ServiceBusResult<SharedClient> {
        validate_connection_string(connection_string)?;

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(connection_string) {
            return Ok(Arc::clone(client));
        }

        let client = ServiceBusClient::new_from_connection_string(
            connection_string,
            ServiceBusClientOptions::default(),
        )
        .await
        .map_err(|e| translate("opening namespace connection", e))?;

        let client = Arc::new(Mutex::new(client));
        clients.insert(connection_string.to_string(), Arc::clone(&client));
        log::info!("opened namespace connection ({} cached)", clients.len());
        Ok(client)
    }

    /// Whether a client is already cached for this connection string.
    pub async fn has_client(&self, connection_string: &str) -> bool {
        self.clients.lock().await.contains_key(connection_string)
    }

    /// Returns the cached management client for this connection string,
    /// creating it on first use.
    pub async fn get_admin_client(
        &self,
        connection_string: &str,
    ) -> ServiceBusResult<Arc<AdminClient>> {
        let mut admins = self.admins.lock().await;
        if let Some(admin) = admins.get(connection_string) {
            return Ok(Arc::clone(admin));
        }
        let admin = Arc::new(AdminClient::from_connection_string(connection_string)?);
        admins.insert(connection_string.to_string(), Arc::clone(&admin));
        Ok(admin)
    }

    /// Closes the client for one connection string.
    ///
    /// With no operation still holding the handle the client is disposed
    /// cleanly; otherwise the cache entry is dropped and the link closes when
    /// the last borrow ends.
    pub async fn close_client(&self, connection_string: &str) -> ServiceBusResult<()> {
        self.admins.lock().await.remove(connection_string);
        let removed = self.clients.lock().await.remove(connection_string);
        let Some(client) = removed else {
            return Ok(());
        };

        match Arc::try_unwrap(client) {
            Ok(mutex) => {
                let client = mutex.into_inner();
                client
                    .dispose()
                    .await
                    .map_err(|e| translate("closing namespace connection", e))?;
            }
            Err(still_shared) => {
                log::debug!(
                    "connection still borrowed by {} handle(s), deferring close to last drop",
                    Arc::strong_count(&still_shared) - 1
                );
                drop(still_shared);
            }
        }
        Ok(())
    }

    /// Closes every cached client. Failures are logged and do not stop the
    /// remaining closes.
    pub async fn close_all(&self) {
        self.admins.lock().await.clear();
        let drained: Vec<(String, SharedClient)> =
            self.clients.lock().await.drain().collect();
        for (_, client) in drained {
            match Arc::try_unwrap(client) {
                Ok(mutex) => {
                    if let Err(e) = mutex.into_inner().dispose().await {
                        log::warn!("error while closing namespace connection: {e}");
                    }
                }
                Err(still_shared) => drop(still_shared),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::assert_err;

    #[tokio::test]
    async fn invalid_connection_string_is_rejected_before_any_client_exists() {
        let manager = ConnectionManager::new();
        assert_err!(manager.get_client("not a connection string").await);
        assert!(!manager.has_client("not a connection string").await);
    }

    #[tokio::test]
    async fn closing_an_unknown_connection_is_a_no_op() {
        let manager = ConnectionManager::new();
        manager
            .close_client("Endpoint=sb://demo.servicebus.windows.net/;SharedAccessKeyName=x;SharedAccessKey=y")
            .await
            .unwrap();
    }
}

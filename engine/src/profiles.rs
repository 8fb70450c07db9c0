//! Saved connections and favorite entities.
//!
//! The persistent store never carries the connection string itself; the host
//! application keeps secrets in its own store under the keys built here. The
//! export format does carry it (supplied by the host at export time), so an
//! exported file restores working connections on another machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;
use crate::error::{ServiceBusError, ServiceBusResult};

/// A saved namespace connection, minus its secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
    /// Display alias shown instead of the name when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConnectionProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            alias: None,
            created_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Key under which the host's secret store holds a profile's connection
/// string. The engine never reads or writes the store itself.
pub fn connection_secret_key(profile_name: &str) -> String {
    format!("connection.{profile_name}")
}

/// Key under which the host's secret store holds a profile's alias, for
/// hosts that treat aliases as sensitive.
pub fn alias_secret_key(profile_name: &str) -> String {
    format!("alias.{profile_name}")
}

/// A pinned entity under one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub connection_id: String,
    #[serde(flatten)]
    pub entity: EntityRef,
    #[serde(default)]
    pub dead_letter: bool,
}

impl Favorite {
    /// Composite identity: same entity pinned twice is the same favorite,
    /// but its live and dead-letter views are distinct.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.connection_id,
            self.entity.receive_path(false),
            if self.dead_letter { "dlq" } else { "live" }
        )
    }
}

/// Profile and favorite collection with JSON import/export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileStore {
    #[serde(default)]
    pub profiles: Vec<ConnectionProfile>,
    #[serde(default)]
    pub favorites: Vec<Favorite>,
}

impl ProfileStore {
    pub fn add_profile(&mut self, name: impl Into<String>) -> &ConnectionProfile {
        let profile = ConnectionProfile::new(name);
        self.profiles.push(profile);
        self.profiles.last().expect("just pushed")
    }

    pub fn find_profile(&self, id: &str) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn rename_profile(&mut self, id: &str, name: impl Into<String>) -> ServiceBusResult<()> {
        let profile = self
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ServiceBusError::ResourceNotFound(format!("connection '{id}'")))?;
        profile.name = name.into();
        Ok(())
    }

    /// Removes a profile and every favorite pinned under it.
    pub fn remove_profile(&mut self, id: &str) -> Option<ConnectionProfile> {
        let index = self.profiles.iter().position(|p| p.id == id)?;
        self.favorites.retain(|f| f.connection_id != id);
        Some(self.profiles.remove(index))
    }

    /// Adds a favorite unless the same composite identity is already pinned.
    /// Returns whether it was added.
    pub fn add_favorite(&mut self, favorite: Favorite) -> bool {
        let key = favorite.key();
        if self.favorites.iter().any(|f| f.key() == key) {
            return false;
        }
        self.favorites.push(favorite);
        true
    }

    pub fn remove_favorite(&mut self, favorite: &Favorite) -> bool {
        let key = favorite.key();
        let before = self.favorites.len();
        self.favorites.retain(|f| f.key() != key);
        self.favorites.len() < before
    }

    pub fn is_favorite(&self, favorite: &Favorite) -> bool {
        let key = favorite.key();
        self.favorites.iter().any(|f| f.key() == key)
    }

    pub fn favorites_for(&self, connection_id: &str) -> Vec<&Favorite> {
        self.favorites
            .iter()
            .filter(|f| f.connection_id == connection_id)
            .collect()
    }

    /// Serializes every profile with its favorites into the transfer format.
    ///
    /// The host supplies each profile's connection string from its secret
    /// store; returning `None` exports the profile without one.
    pub fn export_json(
        &self,
        connection_string_of: impl Fn(&ConnectionProfile) -> Option<String>,
    ) -> ServiceBusResult<String> {
        let profiles = self
            .profiles
            .iter()
            .map(|profile| ProfileExportRecord {
                name: profile.name.clone(),
                alias: profile.alias.clone(),
                connection_string: connection_string_of(profile),
                favorites: self
                    .favorites_for(&profile.id)
                    .into_iter()
                    .map(|f| FavoriteExport {
                        entity: f.entity.clone(),
                        dead_letter: f.dead_letter,
                    })
                    .collect(),
            })
            .collect();
        serde_json::to_string_pretty(&ProfileExport { profiles })
            .map_err(|e| ServiceBusError::generic("exporting profiles", e.to_string()))
    }

    /// Merges an exported file into this store. An existing profile with the
    /// same name wins over the imported record; favorites merge by composite
    /// identity. Imported connection strings come back in the result for the
    /// host to place into its secret store.
    pub fn import_json(&mut self, json: &str) -> ServiceBusResult<ProfileImport> {
        let imported: ProfileExport = serde_json::from_str(json).map_err(|e| {
            ServiceBusError::Validation(format!("profile import is not valid JSON: {e}"))
        })?;

        let mut summary = ImportSummary::default();
        let mut secrets = Vec::new();
        for record in imported.profiles {
            let existing = self
                .profiles
                .iter()
                .find(|p| p.name == record.name)
                .map(|p| p.id.clone());
            let connection_id = match existing {
                Some(id) => id,
                None => {
                    let mut profile = ConnectionProfile::new(record.name.clone());
                    profile.alias = record.alias.clone();
                    let id = profile.id.clone();
                    self.profiles.push(profile);
                    summary.profiles_added += 1;
                    if let Some(connection_string) = record.connection_string {
                        secrets.push(ImportedSecret {
                            key: connection_secret_key(&record.name),
                            connection_string,
                        });
                    }
                    id
                }
            };
            for favorite in record.favorites {
                let relinked = Favorite {
                    connection_id: connection_id.clone(),
                    entity: favorite.entity,
                    dead_letter: favorite.dead_letter,
                };
                if self.add_favorite(relinked) {
                    summary.favorites_added += 1;
                }
            }
        }
        Ok(ProfileImport { summary, secrets })
    }
}

/// Transfer format: profiles with their favorites nested, so import never has
/// to remap stored connection ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProfileExport {
    profiles: Vec<ProfileExportRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileExportRecord {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connection_string: Option<String>,
    #[serde(default)]
    favorites: Vec<FavoriteExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteExport {
    #[serde(flatten)]
    entity: EntityRef,
    #[serde(default)]
    dead_letter: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileImport {
    pub summary: ImportSummary,
    /// Connection strings from the file, keyed for the host's secret store.
    pub secrets: Vec<ImportedSecret>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedSecret {
    pub key: String,
    pub connection_string: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub profiles_added: usize,
    pub favorites_added: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_some};

    fn favorite(connection_id: &str, queue: &str, dead_letter: bool) -> Favorite {
        Favorite {
            connection_id: connection_id.to_string(),
            entity: EntityRef::queue(queue),
            dead_letter,
        }
    }

    #[test]
    fn duplicate_favorites_are_rejected() {
        let mut store = ProfileStore::default();
        assert!(store.add_favorite(favorite("c1", "orders", false)));
        assert!(!store.add_favorite(favorite("c1", "orders", false)));
        assert_eq!(store.favorites.len(), 1);
    }

    #[test]
    fn live_and_dead_letter_views_are_distinct_favorites() {
        let mut store = ProfileStore::default();
        assert!(store.add_favorite(favorite("c1", "orders", false)));
        assert!(store.add_favorite(favorite("c1", "orders", true)));
        assert_eq!(store.favorites.len(), 2);
    }

    #[test]
    fn subscription_and_queue_with_same_name_do_not_collide() {
        let sub = Favorite {
            connection_id: "c1".to_string(),
            entity: EntityRef::subscription("orders", "audit"),
            dead_letter: false,
        };
        let queue = favorite("c1", "orders", false);
        assert_ne!(sub.key(), queue.key());
    }

    #[test]
    fn removing_a_profile_drops_its_favorites() {
        let mut store = ProfileStore::default();
        let id = store.add_profile("prod").id.clone();
        store.add_favorite(favorite(&id, "orders", false));
        store.add_favorite(favorite("other", "orders", false));

        assert_some!(store.remove_profile(&id));
        assert_eq!(store.favorites.len(), 1);
        assert_eq!(store.favorites[0].connection_id, "other");
    }

    const CONNECTION: &str =
        "Endpoint=sb://prod.servicebus.windows.net/;SharedAccessKeyName=Root;SharedAccessKey=a2V5";

    #[test]
    fn export_then_import_restores_profiles_favorites_and_secrets() {
        let mut store = ProfileStore::default();
        let id = store.add_profile("prod").id.clone();
        store.profiles[0].alias = Some("p".to_string());
        store.add_favorite(favorite(&id, "orders", true));

        let json = store.export_json(|_| Some(CONNECTION.to_string())).unwrap();

        let mut fresh = ProfileStore::default();
        let outcome = fresh.import_json(&json).unwrap();
        assert_eq!(outcome.summary.profiles_added, 1);
        assert_eq!(outcome.summary.favorites_added, 1);
        assert_eq!(outcome.secrets.len(), 1);
        assert_eq!(outcome.secrets[0].key, "connection.prod");
        assert_eq!(outcome.secrets[0].connection_string, CONNECTION);

        // The favorite is relinked to the freshly assigned profile id.
        let new_id = fresh.profiles[0].id.clone();
        assert_eq!(fresh.profiles[0].alias.as_deref(), Some("p"));
        assert!(fresh.is_favorite(&favorite(&new_id, "orders", true)));
    }

    #[test]
    fn importing_into_the_same_store_adds_nothing() {
        let mut store = ProfileStore::default();
        let id = store.add_profile("prod").id.clone();
        store.add_favorite(favorite(&id, "orders", false));

        let json = store.export_json(|_| Some(CONNECTION.to_string())).unwrap();
        let outcome = store.import_json(&json).unwrap();

        // The existing profile wins by name, so neither it nor its secret
        // comes back.
        assert_eq!(outcome.summary, ImportSummary::default());
        assert!(outcome.secrets.is_empty());
        assert_eq!(store.profiles.len(), 1);
        assert_eq!(store.favorites.len(), 1);
    }

    #[test]
    fn export_carries_the_host_supplied_connection_string() {
        let mut store = ProfileStore::default();
        store.add_profile("prod");

        let json = store.export_json(|_| Some(CONNECTION.to_string())).unwrap();
        assert!(json.contains("\"connectionString\""));
        assert!(json.contains("Endpoint=sb://prod"));

        // Without a host-supplied secret the field is omitted entirely.
        let json = store.export_json(|_| None).unwrap();
        assert!(!json.contains("connectionString"));
    }

    #[test]
    fn import_rejects_malformed_json() {
        let mut store = ProfileStore::default();
        assert_err!(store.import_json("{not json"));
    }

    #[test]
    fn secret_keys_are_scoped_to_the_profile_name() {
        assert_eq!(connection_secret_key("prod"), "connection.prod");
        assert_eq!(alias_secret_key("prod"), "alias.prod");
    }

    #[test]
    fn alias_wins_in_display_name() {
        let mut profile = ConnectionProfile::new("prod-westeurope-01");
        assert_eq!(profile.display_name(), "prod-westeurope-01");
        profile.alias = Some("prod".to_string());
        assert_eq!(profile.display_name(), "prod");
    }

    #[test]
    fn persistent_store_serialization_stays_secret_free() {
        let mut store = ProfileStore::default();
        store.add_profile("prod");
        let json = serde_json::to_string(&store).unwrap();
        assert!(!json.to_lowercase().contains("sharedaccesskey"));
        assert!(!json.to_lowercase().contains("connectionstring"));
    }
}

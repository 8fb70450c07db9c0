//! # sbnav Engine
//!
//! Broker-facing core of the sbnav Service Bus explorer. The engine
//! enumerates namespace topology, retrieves messages without consuming them,
//! runs destructive lifecycle operations (purge, dead-letter transfer, send)
//! and maintains live per-entity monitors. UI concerns stay in the host
//! application.
//!
//! ## Modules
//!
//! - [`admin`] - Management-plane client (ATOM API)
//! - [`auth`] - Connection-string parsing and SAS tokens
//! - [`config`] - Engine tunables
//! - [`connection`] - Cached data-plane clients
//! - [`consumer`] / [`producer`] - Receiver and sender wrappers
//! - [`entity`] - Queue and subscription references
//! - [`explorer`] - High-level operation facade
//! - [`lifecycle`] - Purge, dead-letter transfer and send
//! - [`model`] - Display-oriented message snapshots
//! - [`monitor`] - Live per-entity monitors
//! - [`profiles`] - Saved connections and favorites
//! - [`retrieval`] - Peek fan-out and lock-then-release drain
//! - [`topology`] - Namespace enumeration

pub mod admin;
pub mod auth;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod entity;
pub mod error;
pub mod explorer;
pub mod lifecycle;
pub mod model;
pub mod monitor;
pub mod producer;
pub mod profiles;
pub mod progress;
pub mod retrieval;
pub mod topology;

pub use config::EngineConfig;
pub use entity::EntityRef;
pub use error::{ServiceBusError, ServiceBusResult};
pub use explorer::{RetrievedMessages, ServiceBusExplorer};
pub use lifecycle::BulkOutcome;
pub use model::{BodyData, MessageModel, MessageState};
pub use monitor::{MonitorCallback, MonitorStart};
pub use producer::OutboundMessage;
pub use progress::{NoProgress, ProgressReporter};
pub use retrieval::RetrievalMode;

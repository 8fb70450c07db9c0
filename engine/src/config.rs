//! Tunables for retrieval, lifecycle and monitor operations.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine tunables with defaults matching interactive-explorer latencies.
///
/// All fields are optional so a partial config deserialized from the host
/// application falls back per-field. [`EngineConfig::from_env`] builds a
/// config from `SBNAV_*` environment variables for overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent peek calls in one retrieval wave.
    pub peek_attempts: Option<usize>,
    /// Hard ceiling on broker calls per retrieval operation.
    pub peek_call_ceiling: Option<usize>,
    /// Messages requested per lock-mode receive call.
    pub receive_batch_size: Option<u32>,
    /// Hard ceiling on receive calls per retrieval operation.
    pub receive_call_ceiling: Option<usize>,
    /// How long a drain receive waits before concluding the entity is empty.
    pub drain_wait_ms: Option<u64>,
    /// Per-call timeout for lock-mode receives.
    pub receive_wait_ms: Option<u64>,
    /// Extra drain batches allowed beyond the requested count.
    pub drain_batch_buffer: Option<usize>,
    /// Messages moved per chunk during dead-letter transfers and purges.
    pub transfer_chunk_size: Option<usize>,
    /// Idle wait between monitor long-poll receives.
    pub monitor_poll_wait_ms: Option<u64>,
}

fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| v.trim().parse().ok())
}

impl EngineConfig {
    /// Reads overrides from `SBNAV_*` environment variables. Unset, empty and
    /// unparsable values stay `None`.
    pub fn from_env() -> Self {
        Self {
            peek_attempts: env_value("SBNAV_PEEK_ATTEMPTS"),
            peek_call_ceiling: env_value("SBNAV_PEEK_CALL_CEILING"),
            receive_batch_size: env_value("SBNAV_RECEIVE_BATCH_SIZE"),
            receive_call_ceiling: env_value("SBNAV_RECEIVE_CALL_CEILING"),
            drain_wait_ms: env_value("SBNAV_DRAIN_WAIT_MS"),
            receive_wait_ms: env_value("SBNAV_RECEIVE_WAIT_MS"),
            drain_batch_buffer: env_value("SBNAV_DRAIN_BATCH_BUFFER"),
            transfer_chunk_size: env_value("SBNAV_TRANSFER_CHUNK_SIZE"),
            monitor_poll_wait_ms: env_value("SBNAV_MONITOR_POLL_WAIT_MS"),
        }
    }

    /// Field-wise overlay: values set in `overrides` win.
    pub fn overridden_by(self, overrides: EngineConfig) -> EngineConfig {
        EngineConfig {
            peek_attempts: overrides.peek_attempts.or(self.peek_attempts),
            peek_call_ceiling: overrides.peek_call_ceiling.or(self.peek_call_ceiling),
            receive_batch_size: overrides.receive_batch_size.or(self.receive_batch_size),
            receive_call_ceiling: overrides.receive_call_ceiling.or(self.receive_call_ceiling),
            drain_wait_ms: overrides.drain_wait_ms.or(self.drain_wait_ms),
            receive_wait_ms: overrides.receive_wait_ms.or(self.receive_wait_ms),
            drain_batch_buffer: overrides.drain_batch_buffer.or(self.drain_batch_buffer),
            transfer_chunk_size: overrides.transfer_chunk_size.or(self.transfer_chunk_size),
            monitor_poll_wait_ms: overrides.monitor_poll_wait_ms.or(self.monitor_poll_wait_ms),
        }
    }

    pub fn peek_attempts(&self) -> usize {
        self.peek_attempts.unwrap_or(5).max(1)
    }

    pub fn peek_call_ceiling(&self) -> usize {
        self.peek_call_ceiling.unwrap_or(256).max(1)
    }

    pub fn receive_batch_size(&self) -> u32 {
        self.receive_batch_size.unwrap_or(10).max(1)
    }

    pub fn receive_call_ceiling(&self) -> usize {
        self.receive_call_ceiling.unwrap_or(100).max(1)
    }

    pub fn drain_wait(&self) -> Duration {
        Duration::from_millis(self.drain_wait_ms.unwrap_or(150))
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms.unwrap_or(2000))
    }

    pub fn drain_batch_buffer(&self) -> usize {
        self.drain_batch_buffer.unwrap_or(5)
    }

    pub fn transfer_chunk_size(&self) -> usize {
        self.transfer_chunk_size.unwrap_or(10).max(1)
    }

    pub fn monitor_poll_wait(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_wait_ms.unwrap_or(5000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_unset() {
        let config = EngineConfig::default();
        assert_eq!(config.peek_attempts(), 5);
        assert_eq!(config.peek_call_ceiling(), 256);
        assert_eq!(config.receive_batch_size(), 10);
        assert_eq!(config.receive_call_ceiling(), 100);
        assert_eq!(config.drain_wait(), Duration::from_millis(150));
        assert_eq!(config.receive_wait(), Duration::from_millis(2000));
        assert_eq!(config.drain_batch_buffer(), 5);
        assert_eq!(config.transfer_chunk_size(), 10);
        assert_eq!(config.monitor_poll_wait(), Duration::from_millis(5000));
    }

    #[test]
    fn explicit_fields_win_over_defaults() {
        let config = EngineConfig {
            peek_attempts: Some(8),
            transfer_chunk_size: Some(50),
            ..Default::default()
        };
        assert_eq!(config.peek_attempts(), 8);
        assert_eq!(config.transfer_chunk_size(), 50);
    }

    #[test]
    fn zero_sized_batches_are_clamped_to_one() {
        let config = EngineConfig {
            transfer_chunk_size: Some(0),
            receive_batch_size: Some(0),
            peek_attempts: Some(0),
            ..Default::default()
        };
        assert_eq!(config.transfer_chunk_size(), 1);
        assert_eq!(config.receive_batch_size(), 1);
        assert_eq!(config.peek_attempts(), 1);
    }

    #[test]
    fn overlay_prefers_set_override_fields() {
        let base = EngineConfig {
            peek_attempts: Some(3),
            receive_batch_size: Some(20),
            ..Default::default()
        };
        let overrides = EngineConfig {
            peek_attempts: Some(9),
            ..Default::default()
        };
        let merged = base.overridden_by(overrides);
        assert_eq!(merged.peek_attempts(), 9);
        assert_eq!(merged.receive_batch_size(), 20);
    }

    #[test]
    fn from_env_without_variables_is_all_defaults() {
        // The SBNAV_* variables are not set in the test environment.
        let config = EngineConfig::from_env();
        assert_eq!(config.peek_attempts(), 5);
        assert_eq!(config.receive_batch_size(), 10);
    }

    #[test]
    fn partial_json_deserializes_with_missing_fields() {
        let config: EngineConfig = serde_json::from_str(r#"{"peek_attempts": 3}"#).unwrap();
        assert_eq!(config.peek_attempts(), 3);
        assert_eq!(config.receive_batch_size(), 10);
    }
}

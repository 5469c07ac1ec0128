//! Client and relay configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::ReconnectPolicy;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("relay url must start with ws:// or wss://, got {0:?}")]
    RelayUrl(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Client-side settings for a document session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay endpoint; the document id is appended as a path segment
    pub relay_url: String,
    pub reconnect: ReconnectPolicy,
    /// UI command channel capacity
    pub command_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8000/ws".to_string(),
            reconnect: ReconnectPolicy::default(),
            command_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Full WebSocket address of `document_id` on the relay.
    pub fn document_url(&self, document_id: &str) -> String {
        format!("{}/{}", self.relay_url.trim_end_matches('/'), document_id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(ConfigError::RelayUrl(self.relay_url.clone()));
        }
        if self.command_buffer == 0 {
            return Err(ConfigError::Zero("command_buffer"));
        }
        Ok(())
    }
}

/// Relay server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per member before a slow member starts losing them
    pub broadcast_capacity: usize,
    /// Maximum connections per room
    pub max_peers_per_room: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            broadcast_capacity: 256,
            max_peers_per_room: 100,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Zero("broadcast_capacity"));
        }
        if self.max_peers_per_room == 0 {
            return Err(ConfigError::Zero("max_peers_per_room"));
        }
        Ok(())
    }
}

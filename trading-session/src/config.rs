//! Session configuration for both sides of a connection.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use trading_protocol::model::MAX_CLIENT_ID_LEN;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_CLIENTS: usize = 100;
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Fixed delay between connect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Suggested cadence for client heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5000);

/// Configuration for an outbound client session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    pub client_id: String,
    /// Connect timeout in seconds; 0 disables the timeout.
    pub socket_timeout: u64,
    /// Connect attempts before `connect` surfaces a terminal error.
    pub reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: DEFAULT_PORT,
            client_id: "client".to_string(),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT_SECS,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.server_host.is_empty() {
            return Err(SessionError::InvalidConfig("server host is empty".into()));
        }
        if self.server_port == 0 {
            return Err(SessionError::InvalidConfig("server port must be in 1..=65535".into()));
        }
        if self.client_id.is_empty() || self.client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(SessionError::InvalidConfig(format!(
                "client id must be 1..={MAX_CLIENT_ID_LEN} bytes"
            )));
        }
        Ok(())
    }
}

/// Configuration for the listening server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_clients: usize,
    /// Per-socket timeout in seconds; 0 disables it. Reserved for idle
    /// sweeps; heartbeat times are tracked per session either way.
    pub socket_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.bind_address.is_empty() {
            return Err(SessionError::InvalidConfig("bind address is empty".into()));
        }
        if self.port == 0 {
            return Err(SessionError::InvalidConfig("port must be in 1..=65535".into()));
        }
        if self.max_clients == 0 {
            return Err(SessionError::InvalidConfig("max clients must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_are_valid() {
        assert!(ClientConfig::default().validate().is_ok());
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut client = ClientConfig::default();
        client.server_port = 0;
        assert!(matches!(client.validate(), Err(SessionError::InvalidConfig(_))));

        let mut client = ClientConfig::default();
        client.client_id = "x".repeat(MAX_CLIENT_ID_LEN + 1);
        assert!(client.validate().is_err());

        let mut server = ServerConfig::default();
        server.max_clients = 0;
        assert!(matches!(server.validate(), Err(SessionError::InvalidConfig(_))));
    }
}

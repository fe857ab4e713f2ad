//! Node configuration, loaded from TOML.

use std::path::PathBuf;

use fabric::config::{DEFAULT_NODE_PORT, DEFAULT_RECONNECT_BACKOFF_SECS};
use serde::{Deserialize, Serialize};

/// Upstream connection settings for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Host to dial.
    pub host: String,
    /// Node-plane port on the host.
    pub port: u16,
    /// Pre-shared key presented during authentication.
    pub auth_key: String,
    /// PEM trust anchor bundle used to verify the host's certificate.
    pub trust: Option<PathBuf>,
    /// Seconds to wait before redialing after a drop.
    pub reconnect_backoff_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_NODE_PORT,
            auth_key: String::new(),
            trust: None,
            reconnect_backoff_secs: DEFAULT_RECONNECT_BACKOFF_SECS,
        }
    }
}

impl NodeConfig {
    pub fn backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reconnect_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_standard_node_port() {
        let config = NodeConfig::default();
        assert_eq!(config.port, 6666);
        assert_eq!(config.reconnect_backoff_secs, 10);
    }

    #[test]
    fn parses_a_config_file() {
        let config: NodeConfig = toml::from_str(
            r#"
            host = "hub.internal"
            port = 7001
            auth_key = "node-secret"
            reconnect_backoff_secs = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "hub.internal");
        assert_eq!(config.backoff(), std::time::Duration::from_secs(3));
    }
}

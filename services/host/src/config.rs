//! Host configuration, loaded from TOML with CLI overrides.

use std::net::SocketAddr;
use std::path::PathBuf;

use fabric::config::{
    DEFAULT_API_PORT, DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_NODE_PORT,
    DEFAULT_TASK_DEADLINE_SECS,
};
use fabric::{AuthMethod, TlsFilesConfig};
use network::TlsSettings;
use serde::{Deserialize, Serialize};

/// One listener plane: where to bind, its TLS material, and the pre-shared
/// key its peers must present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneConfig {
    pub bind: SocketAddr,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub auth_key: String,
}

impl PlaneConfig {
    fn with_port(port: u16) -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], port)),
            cert: None,
            key: None,
            auth_key: String::new(),
        }
    }

    /// Builds the plane's TLS settings from its configured files.
    pub fn tls(&self) -> fabric::Result<TlsSettings> {
        TlsFilesConfig {
            cert: self.cert.clone(),
            key: self.key.clone(),
            trust: None,
        }
        .load()
    }
}

/// Full host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub node: PlaneConfig,
    pub api: PlaneConfig,
    pub auth_method: AuthMethod,
    pub heartbeat_interval_secs: u64,
    /// Pending calls older than this are error-completed by the sweep.
    /// `0` disables the deadline.
    pub task_deadline_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            node: PlaneConfig::with_port(DEFAULT_NODE_PORT),
            api: PlaneConfig::with_port(DEFAULT_API_PORT),
            auth_method: AuthMethod::Plain,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            task_deadline_secs: DEFAULT_TASK_DEADLINE_SECS,
        }
    }
}

impl HostConfig {
    pub fn task_deadline(&self) -> Option<std::time::Duration> {
        match self.task_deadline_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_the_standard_ports() {
        let config = HostConfig::default();
        assert_eq!(config.node.bind.port(), 6666);
        assert_eq!(config.api.bind.port(), 6667);
        assert_eq!(config.auth_method, AuthMethod::Plain);
    }

    #[test]
    fn parses_a_minimal_config_file() {
        let config: HostConfig = toml::from_str(
            r#"
            auth_method = "sha256"
            task_deadline_secs = 0

            [node]
            bind = "127.0.0.1:7001"
            auth_key = "node-secret"

            [api]
            bind = "127.0.0.1:7002"
            auth_key = "api-secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.node.bind.port(), 7001);
        assert_eq!(config.api.auth_key, "api-secret");
        assert_eq!(config.auth_method, AuthMethod::Sha256);
        assert_eq!(config.task_deadline(), None);
    }
}

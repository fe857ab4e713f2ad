//! Shared configuration primitives for the role services.

use std::path::{Path, PathBuf};

use network::TlsSettings;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::{FabricError, Result};

/// Default node-facing listener port.
pub const DEFAULT_NODE_PORT: u16 = 6666;

/// Default api-facing listener port.
pub const DEFAULT_API_PORT: u16 = 6667;

/// Default upstream reconnect backoff, seconds.
pub const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 10;

/// Default server-initiated heartbeat interval, seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default pending-task deadline, seconds.
pub const DEFAULT_TASK_DEADLINE_SECS: u64 = 60;

/// File-based TLS material, as it appears in service config files.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TlsFilesConfig {
    /// Server certificate chain, PEM.
    pub cert: Option<PathBuf>,
    /// Server private key, PEM.
    pub key: Option<PathBuf>,
    /// Trust anchor bundle for outbound verification, PEM.
    pub trust: Option<PathBuf>,
}

impl TlsFilesConfig {
    /// Reads the configured files and builds [`TlsSettings`].
    pub fn load(&self) -> Result<TlsSettings> {
        let mut builder = TlsSettings::builder();
        if let Some(cert) = &self.cert {
            builder = builder.cert_pem(std::fs::read(cert)?);
        }
        if let Some(key) = &self.key {
            builder = builder.key_pem(std::fs::read(key)?);
        }
        if let Some(trust) = &self.trust {
            builder = builder.trust_pem(std::fs::read(trust)?);
        }
        Ok(builder.build()?)
    }
}

/// Loads and parses a TOML configuration file.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        FabricError::Config(format!("unable to read {}: {e}", path.display()))
    })?;
    let parsed = toml::from_str(&raw)?;
    info!(path = %path.display(), "loaded configuration file");
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Sample {
        name: String,
        port: u16,
    }

    #[test]
    fn load_toml_parses_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"weave\"\nport = 6666").unwrap();

        let sample: Sample = load_toml(file.path()).unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "weave".to_string(),
                port: 6666
            }
        );
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_toml::<Sample>(Path::new("/nonexistent/weave.toml")).unwrap_err();
        assert!(matches!(err, FabricError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = ").unwrap();
        let err = load_toml::<Sample>(file.path()).unwrap_err();
        assert!(matches!(err, FabricError::Toml(_)));
    }

    #[test]
    fn empty_tls_files_builds_roleless_settings() {
        let settings = TlsFilesConfig::default().load().unwrap();
        assert!(settings.connector().is_err());
        assert!(settings.acceptor().is_err());
    }
}

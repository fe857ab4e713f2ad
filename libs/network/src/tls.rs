//! TLS configuration shared by listeners and outbound clients.
//!
//! Server side requires a PEM certificate/key pair; client side requires a
//! PEM trust anchor bundle (a CA, or the server's own certificate for
//! self-signed deployments). Both halves are optional so a pure server or
//! pure client only supplies what it uses.

use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{NetworkError, Result};

/// Built TLS configuration for one process role.
#[derive(Clone)]
pub struct TlsSettings {
    client_config: Option<Arc<ClientConfig>>,
    server_config: Option<Arc<ServerConfig>>,
}

/// Builder for [`TlsSettings`].
pub struct TlsSettingsBuilder {
    cert_pem: Option<Vec<u8>>,
    key_pem: Option<Vec<u8>>,
    trust_pem: Option<Vec<u8>>,
}

impl Default for TlsSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsSettingsBuilder {
    pub const fn new() -> Self {
        Self {
            cert_pem: None,
            key_pem: None,
            trust_pem: None,
        }
    }

    /// Sets the server certificate chain in PEM format.
    pub fn cert_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.cert_pem = Some(pem.into());
        self
    }

    /// Sets the server private key in PEM format.
    pub fn key_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.key_pem = Some(pem.into());
        self
    }

    /// Sets the trust anchor bundle used to verify servers when dialing out.
    pub fn trust_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.trust_pem = Some(pem.into());
        self
    }

    /// Builds the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a supplied certificate, key, or trust bundle does
    /// not parse, or if a cert is given without its key (and vice versa).
    pub fn build(self) -> Result<TlsSettings> {
        let client_config = match self.trust_pem {
            Some(trust) => {
                let anchors = parse_certificates(&trust)?;
                if anchors.is_empty() {
                    return Err(NetworkError::Certificate(
                        "no trust anchors found in bundle".into(),
                    ));
                }
                let mut root_store = RootCertStore::empty();
                for cert in anchors {
                    root_store.add(cert).map_err(|e| {
                        NetworkError::Certificate(format!("failed to add trust anchor: {e}"))
                    })?;
                }
                let config = ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth();
                Some(Arc::new(config))
            }
            None => None,
        };

        let server_config = match (self.cert_pem, self.key_pem) {
            (Some(cert), Some(key)) => {
                let certs = parse_certificates(&cert)?;
                if certs.is_empty() {
                    return Err(NetworkError::Certificate("no certificates found".into()));
                }
                let key = parse_private_key(&key)?;
                let config = ServerConfig::builder()
                    .with_no_client_auth()
                    .with_single_cert(certs, key)
                    .map_err(|e| NetworkError::TlsConfig(format!("server config error: {e}")))?;
                Some(Arc::new(config))
            }
            (None, None) => None,
            _ => {
                return Err(NetworkError::TlsConfig(
                    "certificate and key must be supplied together".into(),
                ))
            }
        };

        Ok(TlsSettings {
            client_config,
            server_config,
        })
    }
}

impl TlsSettings {
    pub const fn builder() -> TlsSettingsBuilder {
        TlsSettingsBuilder::new()
    }

    /// Creates a TLS connector for outbound connections.
    ///
    /// # Errors
    ///
    /// Returns an error if no trust bundle was configured.
    pub fn connector(&self) -> Result<TlsConnector> {
        self.client_config
            .clone()
            .map(TlsConnector::from)
            .ok_or_else(|| NetworkError::TlsConfig("no client trust bundle configured".into()))
    }

    /// Creates a TLS acceptor for inbound connections.
    ///
    /// # Errors
    ///
    /// Returns an error if no server certificate/key pair was configured.
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        self.server_config
            .clone()
            .map(TlsAcceptor::from)
            .ok_or_else(|| NetworkError::TlsConfig("no server certificate configured".into()))
    }
}

/// Parse PEM-encoded certificates.
fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| NetworkError::Certificate(format!("failed to parse certificates: {e}")))
}

/// Parse a PEM-encoded private key.
fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| NetworkError::PrivateKey(format!("failed to parse private key: {e}")))
}

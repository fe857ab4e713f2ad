//! Shared harness for the end-to-end scenarios: test certificates, a
//! loopback host, and node/api spawn helpers.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use rcgen::{CertificateParams, DnType, KeyPair};
use tempfile::TempDir;
use weave_host::{HostConfig, PlaneConfig, RunningHost};

/// Node-plane pre-shared key used by the harness.
pub const NODE_KEY: &str = "node-secret";

/// Api-plane pre-shared key used by the harness.
pub const API_KEY: &str = "abcd";

static CRYPTO_INIT: Once = Once::new();

/// Installs the process-wide rustls crypto provider once.
pub fn init_crypto() {
    CRYPTO_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("failed to install crypto provider");
    });
}

/// On-disk TLS material for one test fabric: a CA and a localhost server
/// certificate chained to it.
pub struct TestCerts {
    _dir: TempDir,
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TestCerts {
    pub fn generate() -> Self {
        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "Weave Test CA");
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().expect("ca key");
        let ca_cert = ca_params.self_signed(&ca_key).expect("ca cert");

        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, "localhost");
        params.subject_alt_names = vec![rcgen::SanType::DnsName(
            "localhost".try_into().expect("valid dns name"),
        )];
        let server_key = KeyPair::generate().expect("server key");
        let server_cert = params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .expect("server cert");

        let dir = TempDir::new().expect("temp dir");
        let ca = write_pem(&dir, "ca.pem", ca_cert.pem().as_bytes());
        let cert = write_pem(&dir, "cert.pem", server_cert.pem().as_bytes());
        let key = write_pem(&dir, "key.pem", server_key.serialize_pem().as_bytes());

        Self {
            _dir: dir,
            ca,
            cert,
            key,
        }
    }
}

fn write_pem(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create pem file");
    file.write_all(contents).expect("write pem file");
    path
}

/// Starts a host on ephemeral loopback ports with the harness keys.
pub async fn start_host(certs: &TestCerts) -> RunningHost {
    init_crypto();

    let config = HostConfig {
        node: PlaneConfig {
            bind: "127.0.0.1:0".parse().expect("bind addr"),
            cert: Some(certs.cert.clone()),
            key: Some(certs.key.clone()),
            auth_key: NODE_KEY.to_string(),
        },
        api: PlaneConfig {
            bind: "127.0.0.1:0".parse().expect("bind addr"),
            cert: Some(certs.cert.clone()),
            key: Some(certs.key.clone()),
            auth_key: API_KEY.to_string(),
        },
        ..Default::default()
    };

    weave_host::start(config).await.expect("start host")
}

/// Spawns a node worker against the host and waits until it is
/// authenticated and fully announced.
pub async fn start_node(
    certs: &TestCerts,
    node_port: u16,
    service: weave_node::Service,
) -> Arc<weave_node::Upstream> {
    let config = weave_node::NodeConfig {
        host: "localhost".to_string(),
        port: node_port,
        auth_key: NODE_KEY.to_string(),
        trust: Some(certs.ca.clone()),
        reconnect_backoff_secs: 1,
    };

    let upstream = Arc::new(weave_node::Upstream::new(config, service).expect("build upstream"));
    let runner = Arc::clone(&upstream);
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    let mut ready = upstream.ready();
    tokio::time::timeout(std::time::Duration::from_secs(10), ready.wait_for(|v| *v))
        .await
        .expect("node never became ready")
        .expect("ready channel closed");

    upstream
}

/// Connects an api client to the host's api plane.
pub async fn connect_api(certs: &TestCerts, api_port: u16) -> weave_api::ApiClient {
    weave_api::ApiClient::connect(weave_api::ApiSettings {
        host: "localhost".to_string(),
        port: api_port,
        trust: Some(certs.ca.clone()),
        ..Default::default()
    })
    .await
    .expect("connect api client")
}

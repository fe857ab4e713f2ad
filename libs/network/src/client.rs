//! Outbound client: resolve, connect, handshake, then hand the stream to the
//! shared driver loop.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::{lookup_host, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::connection::{drive, ConnState, Connection, ConnectionEvents, TransportConfig};
use crate::error::{NetworkError, Result};
use crate::tls::TlsSettings;

/// Connects to `host:port`, performs the client-role TLS handshake, fires
/// `on_connect`, and spawns the driver task for the connection.
///
/// Resolution may yield several candidate addresses; each is tried in order
/// and only exhausting all of them is a terminal connect error. Failures
/// before the handshake completes are returned as `Err` — the event callbacks
/// only ever describe an established connection.
pub async fn connect(
    host: &str,
    port: u16,
    tls: &TlsSettings,
    config: TransportConfig,
    events: Arc<dyn ConnectionEvents>,
) -> Result<(Arc<Connection>, JoinHandle<()>)> {
    let connector = tls.connector()?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| NetworkError::TlsConfig(format!("invalid server name {host:?}: {e}")))?;

    let conn = Arc::new(Connection::outbound(config.clone()));

    debug!(conn = conn.id(), host, port, "resolving");
    let candidates: Vec<_> = lookup_host((host, port)).await?.collect();
    if candidates.is_empty() {
        conn.close().await;
        return Err(NetworkError::Resolve {
            host: host.to_string(),
            port,
        });
    }

    conn.set_state(ConnState::Connecting);
    let mut last_err = None;
    let mut socket = None;
    for addr in candidates {
        debug!(conn = conn.id(), %addr, "trying address");
        match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                socket = Some(stream);
                break;
            }
            Ok(Err(e)) => {
                debug!(conn = conn.id(), %addr, "connect failed: {e}, trying next address");
                last_err = Some(e);
            }
            Err(_) => {
                debug!(conn = conn.id(), %addr, "connect timed out, trying next address");
                last_err = Some(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ));
            }
        }
    }
    let socket = match socket {
        Some(s) => s,
        None => {
            conn.close().await;
            return Err(NetworkError::Connect {
                host: host.to_string(),
                port,
                source: last_err.unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotConnected, "no usable address")
                }),
            });
        }
    };

    if let Err(e) = socket.set_nodelay(true) {
        debug!(conn = conn.id(), "failed to set TCP_NODELAY: {e}");
    }
    let peer = socket.peer_addr()?;

    conn.set_state(ConnState::Handshaking);
    let tls_stream = match timeout(
        config.handshake_timeout,
        connector.connect(server_name, socket),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            conn.close().await;
            return Err(NetworkError::handshake(Some(peer), e.to_string()));
        }
        Err(_) => {
            conn.close().await;
            return Err(NetworkError::timeout("TLS handshake", config.handshake_timeout));
        }
    };

    let (reader, writer) = tokio::io::split(tokio_rustls::TlsStream::from(tls_stream));
    conn.attach(writer, peer).await;

    info!(conn = conn.id(), %peer, "connected");
    events.on_connect(&conn).await;

    let driver = tokio::spawn(drive(Arc::clone(&conn), reader, events));
    Ok((conn, driver))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoEvents;
    impl ConnectionEvents for NoEvents {}

    #[tokio::test]
    async fn connect_without_trust_bundle_fails() {
        let tls = TlsSettings::builder().build().unwrap();
        let result = connect(
            "localhost",
            1,
            &tls,
            TransportConfig::default(),
            Arc::new(NoEvents),
        )
        .await;
        assert!(matches!(result, Err(NetworkError::TlsConfig(_))));
    }
}

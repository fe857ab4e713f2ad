//! TLS listener: binds a port, accepts sockets, and wires each accepted
//! connection into its owner's connection set and event handler.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::connection::{drive, Connection, ConnectionEvents, ConnectionSet, TransportConfig};
use crate::error::{NetworkError, Result};
use crate::tls::TlsSettings;

/// Accepting side of a fabric plane.
pub struct Listener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
    local_addr: SocketAddr,
    config: TransportConfig,
}

impl Listener {
    /// Binds the listener and prepares the server-role TLS acceptor.
    pub async fn bind(addr: SocketAddr, tls: &TlsSettings, config: TransportConfig) -> Result<Self> {
        let acceptor = tls.acceptor()?;
        let inner = TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        info!(%local_addr, "listening");
        Ok(Self {
            inner,
            acceptor,
            local_addr,
            config,
        })
    }

    /// Actual bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop. For each socket: server-role TLS handshake, register the
    /// connection in `connections`, fire `on_connect`, then run the driver
    /// until the connection ends and unregister it.
    ///
    /// A failed handshake drops that socket only; the loop keeps accepting.
    pub async fn run(
        self,
        connections: ConnectionSet,
        events: Arc<dyn ConnectionEvents>,
    ) -> Result<()> {
        loop {
            let (socket, peer) = self.inner.accept().await?;
            debug!(%peer, "accepted tcp connection");

            let acceptor = self.acceptor.clone();
            let config = self.config.clone();
            let connections = connections.clone();
            let events = Arc::clone(&events);
            tokio::spawn(async move {
                accept_one(socket, peer, acceptor, config, connections, events).await;
            });
        }
    }
}

async fn accept_one(
    socket: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    config: TransportConfig,
    connections: ConnectionSet,
    events: Arc<dyn ConnectionEvents>,
) {
    if let Err(e) = socket.set_nodelay(true) {
        warn!(%peer, "failed to set TCP_NODELAY: {e}");
    }

    let handshake_timeout = config.handshake_timeout;
    let conn = Arc::new(Connection::inbound(peer, config));

    let tls = match timeout(handshake_timeout, acceptor.accept(socket)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(%peer, "TLS handshake failed: {e}");
            return;
        }
        Err(_) => {
            warn!(%peer, "TLS handshake timed out");
            return;
        }
    };

    let (reader, writer) = tokio::io::split(tokio_rustls::TlsStream::from(tls));
    conn.attach(writer, peer).await;

    connections.insert(Arc::clone(&conn));
    info!(conn = conn.id(), %peer, "connection established");
    events.on_connect(&conn).await;

    drive(Arc::clone(&conn), reader, events).await;
    connections.remove(conn.id());
}

/// Convenience: bind and spawn the accept loop, returning the bound address.
pub async fn spawn_listener(
    addr: SocketAddr,
    tls: &TlsSettings,
    config: TransportConfig,
    connections: ConnectionSet,
    events: Arc<dyn ConnectionEvents>,
) -> Result<SocketAddr> {
    let listener = Listener::bind(addr, tls, config).await?;
    let local = listener.local_addr();
    tokio::spawn(async move {
        if let Err(e) = listener.run(connections, events).await {
            match e {
                NetworkError::Io(ref io) => warn!(%local, "accept loop ended: {io}"),
                other => warn!(%local, "accept loop ended: {other}"),
            }
        }
    });
    Ok(local)
}

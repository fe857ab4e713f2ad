//! Per-connection state machine and the driver read loop.
//!
//! A [`Connection`] is a cheap cloneable handle (via `Arc`) around one TLS
//! stream's write half plus bookkeeping; the read half is owned by the
//! connection's single *driver* task, which is the sole source of inbound
//! traffic and the sole invoker of the close/error callbacks. States advance
//! strictly forward:
//!
//! ```text
//! Resolving → Connecting → Handshaking → Reading → Closing → Closed
//! ```
//!
//! Server-accepted connections begin at `Handshaking`; `Closing`/`Closed` are
//! reachable from every state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use codec::{Header, Message, HEADER_LEN};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::error::{is_benign_disconnect, NetworkError, Result};
use crate::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_MAX_MESSAGE_SIZE};

pub(crate) type TlsIo = tokio_rustls::TlsStream<TcpStream>;
pub(crate) type Reader = ReadHalf<TlsIo>;
pub(crate) type Writer = WriteHalf<TlsIo>;

/// Process-unique connection identifier.
///
/// Shared tables (subscriptions, method providers) hold ids rather than
/// connection handles, so nothing but the owning server keeps a connection
/// alive.
pub type ConnectionId = u64;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocates the next connection id.
pub fn next_connection_id() -> ConnectionId {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Explicit connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Resolving the remote hostname (outbound only)
    Resolving,
    /// Trying resolved address candidates (outbound only)
    Connecting,
    /// TLS handshake in flight
    Handshaking,
    /// Read loop active; the steady state
    Reading,
    /// Teardown in progress
    Closing,
    /// Terminal
    Closed,
}

/// Transport tuning knobs shared by listeners and clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for TCP connection establishment (outbound).
    pub connect_timeout: Duration,
    /// Timeout for the TLS handshake, both roles.
    pub handshake_timeout: Duration,
    /// Largest payload accepted from a peer; a header announcing more is an
    /// unrecoverable framing fault.
    pub max_message_size: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Event seam between the transport and the protocol layer.
///
/// All methods default to no-ops so implementors override only what they
/// need. Handlers run inline on the connection's driver task and must not
/// block it.
#[async_trait]
pub trait ConnectionEvents: Send + Sync + 'static {
    /// Connection established: TLS handshake done, peer address known.
    async fn on_connect(&self, _conn: &Arc<Connection>) {}

    /// One complete framed message arrived.
    async fn on_message(&self, _conn: &Arc<Connection>, _msg: Message) {}

    /// Orderly teardown (peer disconnected or `close()` was called).
    /// Safe to reconnect immediately.
    async fn on_close(&self, _conn: &Arc<Connection>) {}

    /// Anomalous teardown; `err` carries the underlying fault.
    async fn on_error(&self, _conn: &Arc<Connection>, _err: &NetworkError) {}
}

/// One TLS stream plus its write path and lifecycle bookkeeping.
pub struct Connection {
    id: ConnectionId,
    peer: parking_lot::Mutex<Option<SocketAddr>>,
    writer: tokio::sync::Mutex<Option<Writer>>,
    state: parking_lot::Mutex<ConnState>,
    closed: AtomicBool,
    config: TransportConfig,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Connection {
    /// New outbound connection handle, not yet connected.
    pub(crate) fn outbound(config: TransportConfig) -> Self {
        Self::with_state(ConnState::Resolving, None, config)
    }

    /// New server-accepted connection handle; the TCP socket exists, the TLS
    /// handshake has not run yet.
    pub(crate) fn inbound(peer: SocketAddr, config: TransportConfig) -> Self {
        Self::with_state(ConnState::Handshaking, Some(peer), config)
    }

    fn with_state(state: ConnState, peer: Option<SocketAddr>, config: TransportConfig) -> Self {
        Self {
            id: next_connection_id(),
            peer: parking_lot::Mutex::new(peer),
            writer: tokio::sync::Mutex::new(None),
            state: parking_lot::Mutex::new(state),
            closed: AtomicBool::new(false),
            config,
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Wires the write half in after a successful handshake.
    pub(crate) async fn attach(&self, writer: Writer, peer: SocketAddr) {
        *self.writer.lock().await = Some(writer);
        *self.peer.lock() = Some(peer);
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ConnState) {
        *self.state.lock() = state;
    }

    /// Remote peer address, known once the handshake completed.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    /// Remote host as a string, for reconnect targeting and logs.
    pub fn remote_host(&self) -> Option<String> {
        self.peer_addr().map(|a| a.ip().to_string())
    }

    /// Remote port, for reconnect targeting.
    pub fn remote_port(&self) -> Option<u16> {
        self.peer_addr().map(|a| a.port())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub(crate) fn max_message_size(&self) -> u32 {
        self.config.max_message_size
    }

    /// Serializes the message and writes exactly `size + 8` bytes to the
    /// stream as a single write.
    ///
    /// Contract: concurrent `send`s queue on the internal write lock in
    /// arrival order and are never interleaved on the wire. Sending on a
    /// closed (or never-established) connection fails with
    /// [`NetworkError::ConnectionClosed`] rather than silently dropping.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(NetworkError::ConnectionClosed);
        }
        if msg.payload().len() > self.config.max_message_size as usize {
            return Err(NetworkError::FrameTooLarge {
                size: msg.payload().len() as u32,
                max: self.config.max_message_size,
            });
        }
        // Message constructors keep header.size in lockstep with the payload.
        debug_assert_eq!(msg.header().size() as usize, msg.payload().len());

        let wire = msg.encode();

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(NetworkError::ConnectionClosed)?;
        writer.write_all(&wire).await?;
        writer.flush().await?;
        drop(guard);

        self.bytes_sent
            .fetch_add(wire.len() as u64, Ordering::Relaxed);
        debug!(
            conn = self.id,
            bytes = wire.len(),
            msg_type = msg.header().raw_type(),
            "sent message"
        );
        Ok(())
    }

    /// Closes the connection: best-effort TLS shutdown, then the socket.
    ///
    /// Idempotent. Shutdown errors are discarded; there is nothing useful a
    /// caller can do with them. After this returns, `send()` fails with
    /// [`NetworkError::ConnectionClosed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(ConnState::Closing);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.set_state(ConnState::Closed);
        debug!(conn = self.id, "connection closed");
    }

    pub(crate) fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer_addr())
            .field("state", &self.state())
            .finish()
    }
}

/// Read loop: the single task driving a connection's inbound traffic.
///
/// Reads exactly [`HEADER_LEN`] bytes, decodes the header, reads exactly
/// `size` payload bytes, and hands the assembled [`Message`] to
/// `events.on_message`. Ends only on transport error or close, classifying
/// the terminating error into `on_close` (whitelisted) or `on_error`.
pub(crate) async fn drive(
    conn: Arc<Connection>,
    mut reader: Reader,
    events: Arc<dyn ConnectionEvents>,
) {
    conn.set_state(ConnState::Reading);
    let mut payload_buf = BytesMut::new();

    let fatal = loop {
        let mut head = [0u8; HEADER_LEN];
        if let Err(e) = reader.read_exact(&mut head).await {
            break e;
        }
        let header = Header::decode(u64::from_be_bytes(head));

        if header.size() > conn.max_message_size() {
            // The peer is announcing more than we will buffer; the stream
            // can no longer be re-synced.
            let err = NetworkError::FrameTooLarge {
                size: header.size(),
                max: conn.max_message_size(),
            };
            error!(conn = conn.id(), %err, "framing fault, closing connection");
            conn.close().await;
            events.on_error(&conn, &err).await;
            return;
        }

        let payload = if header.size() > 0 {
            payload_buf.resize(header.size() as usize, 0);
            if let Err(e) = reader.read_exact(&mut payload_buf).await {
                break e;
            }
            payload_buf.split_to(header.size() as usize).freeze()
        } else {
            Bytes::new()
        };

        conn.add_bytes_received((HEADER_LEN + payload.len()) as u64);

        match Message::from_wire(header, payload) {
            Ok(msg) => {
                debug!(
                    conn = conn.id(),
                    msg_type = header.raw_type(),
                    size = header.size(),
                    "received message"
                );
                events.on_message(&conn, msg).await;
            }
            Err(e) => {
                // Unreachable with exact reads, but a dropped frame must not
                // kill the connection.
                warn!(conn = conn.id(), %e, "dropping malformed frame");
            }
        }
    };

    conn.close().await;
    if is_benign_disconnect(&fatal) {
        debug!(conn = conn.id(), error = %fatal, "peer disconnected");
        events.on_close(&conn).await;
    } else {
        error!(conn = conn.id(), error = %fatal, "connection failed");
        events.on_error(&conn, &NetworkError::Io(fatal)).await;
    }
}

/// Shared map of live connections, keyed by [`ConnectionId`].
#[derive(Clone, Default)]
pub struct ConnectionSet {
    inner: Arc<DashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conn: Arc<Connection>) {
        self.inner.insert(conn.id(), conn);
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.remove(&id).map(|(_, c)| c)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.get(&id).map(|c| Arc::clone(c.value()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Snapshot of the live connections, for periodic sweeps.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Closes every connection in the set.
    pub async fn close_all(&self) {
        for conn in self.snapshot() {
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn send_before_attach_fails() {
        let conn = Connection::outbound(TransportConfig::default());
        let msg = codec::envelope::heartbeat_request();
        assert!(matches!(
            conn.send(&msg).await,
            Err(NetworkError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_terminal() {
        let conn = Connection::outbound(TransportConfig::default());
        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), ConnState::Closed);
        assert!(conn.is_closed());

        let msg = codec::envelope::heartbeat_request();
        assert!(matches!(
            conn.send(&msg).await,
            Err(NetworkError::ConnectionClosed)
        ));
    }

    #[test]
    fn connection_set_tracks_membership() {
        let set = ConnectionSet::new();
        let conn = Arc::new(Connection::outbound(TransportConfig::default()));
        let id = conn.id();

        set.insert(Arc::clone(&conn));
        assert_eq!(set.len(), 1);
        assert!(set.get(id).is_some());

        set.remove(id);
        assert!(set.get(id).is_none());
        assert!(set.is_empty());
    }
}

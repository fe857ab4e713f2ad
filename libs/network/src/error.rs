//! Transport error types and disconnect classification.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Main transport error type.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Certificate parsing error.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Private key parsing error.
    #[error("private key error: {0}")]
    PrivateKey(String),

    /// All resolved addresses for an endpoint were tried and failed.
    #[error("unable to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        source: io::Error,
    },

    /// Hostname did not resolve to any address.
    #[error("no addresses resolved for {host}:{port}")]
    Resolve { host: String, port: u16 },

    /// TLS handshake failure.
    #[error("TLS handshake with {peer:?} failed: {message}")]
    Handshake {
        peer: Option<SocketAddr>,
        message: String,
    },

    /// Socket-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// `send()` was called on a connection that is closed or not yet
    /// established.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Peer announced a payload larger than the configured limit; the stream
    /// framing can no longer be trusted.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: u32, max: u32 },

    /// Codec-level violation on an outbound message.
    #[error("protocol error: {0}")]
    Protocol(#[from] codec::ProtocolError),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    pub fn handshake(peer: Option<SocketAddr>, message: impl Into<String>) -> Self {
        Self::Handshake {
            peer,
            message: message.into(),
        }
    }

    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }

    /// Whether this error represents an orderly peer disconnect rather than
    /// an anomaly.
    pub fn is_benign(&self) -> bool {
        match self {
            NetworkError::Io(e) => is_benign_disconnect(e),
            _ => false,
        }
    }
}

/// Fixed whitelist of socket errors treated as normal connection teardown.
///
/// A whitelisted error closes the connection and fires `on_close`; anything
/// else closes the connection and fires `on_error` with the original error
/// attached. rustls surfaces a peer that drops without `close_notify` as
/// `UnexpectedEof`, which keeps abrupt-but-ordinary disconnects on the benign
/// side.
pub fn is_benign_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
    )
}

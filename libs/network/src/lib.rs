//! # Weave Network Transport
//!
//! Encrypted TCP transport for the fabric: TLS configuration, the
//! per-connection asynchronous state machine, the listener/acceptor, and the
//! outbound client.
//!
//! Every connection is driven by exactly one async task (its *driver*) which
//! advances an explicit [`ConnState`] through resolve → connect → handshake →
//! read loop and surfaces traffic through the [`ConnectionEvents`] seam.
//! Transport faults are classified into orderly disconnects (`on_close`) and
//! anomalies (`on_error`) by a fixed whitelist of benign socket errors.

pub mod client;
pub mod connection;
pub mod error;
pub mod listener;
pub mod tls;

// Re-export commonly used types
pub use client::connect;
pub use connection::{
    next_connection_id, ConnState, Connection, ConnectionEvents, ConnectionId, ConnectionSet,
    TransportConfig,
};
pub use error::{is_benign_disconnect, NetworkError, Result};
pub use listener::{spawn_listener, Listener};
pub use tls::TlsSettings;

/// Default maximum payload size accepted from a peer (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Default timeout for TCP connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for the TLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

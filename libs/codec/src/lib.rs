//! # Weave Protocol Codec
//!
//! Framing and message types shared by every role on the fabric (host, node,
//! api). A wire message is a fixed 8-byte header followed by exactly
//! `header.size` bytes of UTF-8 JSON payload:
//!
//! ```text
//! [type:16][args:14][error:1][direction:1][size:32]  big-endian u64
//! [payload: size bytes of JSON]
//! ```
//!
//! This crate contains the "rules" layer only: bit packing, the size
//! invariant, and typed envelope encode/decode. Transport and dispatch live
//! in the `network` and `fabric` crates.

pub mod envelope;
pub mod header;
pub mod message;

// Re-export main protocol types
pub use envelope::{
    AuthPayload, ImplementPayload, MessageBody, SubscribePayload, TaskPayload,
};
pub use header::{Direction, Header, MessageType, TaskKind, HEADER_LEN};
pub use message::Message;

use thiserror::Error;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message `type` field does not name a known message kind.
    #[error("unknown message type: {0}")]
    UnknownType(u16),

    /// Task `args` sub-tag is neither `call` nor `event`.
    #[error("unknown task kind: {0}")]
    UnknownTaskKind(u16),

    /// Header `size` disagrees with the actual payload length.
    #[error("header size {header} does not match payload length {payload}")]
    SizeMismatch { header: u32, payload: usize },

    /// Payload cannot be represented in the 32-bit `size` field.
    #[error("payload of {0} bytes exceeds the 32-bit size field")]
    Oversize(usize),

    /// Payload is not the JSON document the message type requires.
    #[error("payload error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

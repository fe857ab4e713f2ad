//! # Weave Fabric Core
//!
//! Role-independent broker machinery layered over `codec` and `network`:
//! typed protocol dispatch, the request/response correlation table, the
//! subscription/broadcast registry, credential checking, and configuration
//! loading. The host, node, and api services compose these pieces; none of
//! them owns a socket directly.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod tasks;

// Re-export commonly used types
pub use auth::{AuthContext, AuthMethod};
pub use config::{load_toml, TlsFilesConfig};
pub use dispatch::{dispatch, ProtocolHandler};
pub use registry::{Registry, SubscriptionTable};
pub use tasks::{random_task_id, TaskTable, TASK_ID_LEN};

use thiserror::Error;

/// Fabric-level errors.
#[derive(Debug, Error)]
pub enum FabricError {
    /// `create` was called with a task id that is already pending.
    #[error("task id {0:?} is already pending")]
    DuplicateTask(String),

    /// `respond` was called with a task id no entry exists for.
    #[error("task id {0:?} is not a pending task")]
    UnknownTask(String),

    /// `respond` was called with a request-direction message.
    #[error("task {0:?} response has request direction")]
    NotAResponse(String),

    /// Configuration file or field error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A peer answered with an application-level error payload.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] codec::ProtocolError),

    #[error("transport error: {0}")]
    Network(#[from] network::NetworkError),
}

/// Result type for fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;

//! # Weave Node
//!
//! A worker process: connects upstream to the host, authenticates, announces
//! the methods it serves and the events it wants, answers forwarded calls,
//! and reconnects with a fixed backoff whenever the upstream link drops.

pub mod config;
pub mod service;
pub mod upstream;

pub use config::NodeConfig;
pub use service::Service;
pub use upstream::Upstream;

//! # Weave Api Client
//!
//! The caller side of the fabric: one TLS connection to the host's api
//! plane, typed `call` and `subscribe` operations, and a local task table
//! correlating responses back to their awaiting callers.

pub mod client;

pub use client::{ApiClient, ApiSettings};

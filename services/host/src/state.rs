//! Shared broker state: connection sets, registries, the task table, and
//! per-connection auth contexts.

use std::sync::Arc;

use dashmap::DashMap;
use fabric::{AuthContext, AuthMethod, Registry, SubscriptionTable, TaskTable};
use network::{Connection, ConnectionId, ConnectionSet};
use tracing::warn;

use crate::config::HostConfig;

/// State shared by both planes' handlers.
///
/// Tables are internally synchronized; handlers for different connections run
/// on different driver tasks and touch them concurrently.
pub struct HostState {
    pub node_conns: ConnectionSet,
    pub api_conns: ConnectionSet,

    /// Per-connection credential state, created at accept time.
    pub auth: DashMap<ConnectionId, Arc<AuthContext>>,

    /// Method name → node connections providing it.
    pub methods: Registry,
    /// Event subscriptions on the node plane.
    pub node_subs: SubscriptionTable,
    /// Event subscriptions on the api plane.
    pub api_subs: SubscriptionTable,
    /// Pending calls, keyed by task id, shared by both planes.
    pub tasks: TaskTable,

    pub node_auth_key: String,
    pub api_auth_key: String,
    pub auth_method: AuthMethod,
}

impl HostState {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            node_conns: ConnectionSet::new(),
            api_conns: ConnectionSet::new(),
            auth: DashMap::new(),
            methods: Registry::new(),
            node_subs: SubscriptionTable::new(),
            api_subs: SubscriptionTable::new(),
            tasks: TaskTable::new(config.task_deadline()),
            node_auth_key: config.node.auth_key.clone(),
            api_auth_key: config.api.auth_key.clone(),
            auth_method: config.auth_method,
        }
    }

    /// Registers a fresh auth context for an accepted connection.
    pub fn register_auth(&self, id: ConnectionId, stored_key: &str) {
        self.auth
            .insert(id, Arc::new(AuthContext::new(stored_key, self.auth_method)));
    }

    /// Whether the connection has passed authentication.
    ///
    /// Unauthenticated peers attempting gated operations are closed by the
    /// caller; a connection with no registered context counts as
    /// unauthenticated.
    pub fn authenticated(&self, id: ConnectionId) -> bool {
        self.auth
            .get(&id)
            .map(|ctx| ctx.authenticated())
            .unwrap_or(false)
    }

    /// Runs the auth check for a gated operation, logging the refusal.
    pub async fn require_auth(&self, conn: &Arc<Connection>, operation: &str) -> bool {
        if self.authenticated(conn.id()) {
            return true;
        }
        warn!(
            conn = conn.id(),
            operation, "unauthenticated connection attempted gated operation, closing"
        );
        conn.close().await;
        false
    }

    /// Drops every trace of a departed connection from the shared tables.
    pub fn prune(&self, id: ConnectionId) {
        self.auth.remove(&id);
        self.methods.remove_member(id);
        self.node_subs.remove_connection(id);
        self.api_subs.remove_connection(id);
    }
}

//! Node-facing plane: workers authenticate, announce the methods they serve,
//! subscribe to events, answer forwarded calls, and emit event broadcasts.

use std::sync::Arc;

use async_trait::async_trait;
use codec::envelope::{auth_response, implement_error, implement_response, subscribe_response};
use codec::{AuthPayload, Direction, Header, ImplementPayload, Message, SubscribePayload, TaskKind, TaskPayload};
use fabric::{dispatch, ProtocolHandler};
use network::{Connection, ConnectionEvents, NetworkError};
use tracing::{debug, error, info, warn};

use crate::state::HostState;

/// Handler for connections accepted on the node listener.
pub struct NodePlane {
    state: Arc<HostState>,
}

impl NodePlane {
    pub fn new(state: Arc<HostState>) -> Self {
        Self { state }
    }

    /// Fans an event task out to subscribers on both planes.
    fn broadcast_event(&self, task: &TaskPayload) {
        let Some(event) = task.event.as_deref() else {
            warn!(task_id = %task.task_id, "event task without an event name, dropping");
            return;
        };

        let state = &self.state;
        let node_sent = state.node_subs.broadcast(event, &task.task_id, task.data.clone(), |id, msg| {
            crate::send_later(&state.node_conns, id, msg.clone());
            true
        });
        let api_sent = state.api_subs.broadcast(event, &task.task_id, task.data.clone(), |id, msg| {
            crate::send_later(&state.api_conns, id, msg.clone());
            true
        });

        if let (Ok(0), Ok(0)) = (&node_sent, &api_sent) {
            debug!(event, "event had no subscribers on either plane");
        }
        for result in [node_sent, api_sent] {
            if let Err(e) = result {
                error!(event, "failed to construct broadcast: {e}");
            }
        }
    }
}

#[async_trait]
impl ConnectionEvents for NodePlane {
    async fn on_connect(&self, conn: &Arc<Connection>) {
        self.state.register_auth(conn.id(), &self.state.node_auth_key);
        info!(conn = conn.id(), "node connected");
    }

    async fn on_message(&self, conn: &Arc<Connection>, msg: Message) {
        dispatch(self, conn, &msg).await;
    }

    async fn on_close(&self, conn: &Arc<Connection>) {
        self.state.prune(conn.id());
        info!(conn = conn.id(), "node disconnected");
    }

    async fn on_error(&self, conn: &Arc<Connection>, err: &NetworkError) {
        self.state.prune(conn.id());
        error!(conn = conn.id(), "node connection failed: {err}");
    }
}

#[async_trait]
impl ProtocolHandler for NodePlane {
    async fn on_auth(&self, conn: &Arc<Connection>, header: Header, auth: AuthPayload) {
        if header.direction() != Direction::Request {
            return;
        }

        let granted = self
            .state
            .auth
            .get(&conn.id())
            .map(|ctx| ctx.authenticate(&auth.key))
            .unwrap_or(false);

        match auth_response(&auth.key, granted) {
            Ok(reply) => {
                if let Err(e) = conn.send(&reply).await {
                    warn!(conn = conn.id(), "failed to send auth response: {e}");
                }
            }
            Err(e) => error!(conn = conn.id(), "failed to build auth response: {e}"),
        }

        // One refusal, then the connection is gone; the host never re-prompts.
        if !granted {
            info!(conn = conn.id(), "node failed authentication, closing");
            conn.close().await;
        }
    }

    async fn on_implement(&self, conn: &Arc<Connection>, header: Header, implement: ImplementPayload) {
        if header.direction() != Direction::Request
            || !self.state.require_auth(conn, "implement").await
        {
            return;
        }

        let reply = if self.state.methods.insert(&implement.method, conn.id()) {
            info!(conn = conn.id(), method = %implement.method, "method provided");
            implement_response(&implement.method)
        } else {
            implement_error(&implement.method, "method already provided by this connection")
        };

        match reply {
            Ok(reply) => {
                if let Err(e) = conn.send(&reply).await {
                    warn!(conn = conn.id(), "failed to send implement response: {e}");
                }
            }
            Err(e) => error!(conn = conn.id(), "failed to build implement response: {e}"),
        }
    }

    async fn on_subscribe(&self, conn: &Arc<Connection>, header: Header, subscribe: SubscribePayload) {
        if header.direction() != Direction::Request
            || !self.state.require_auth(conn, "subscribe").await
        {
            return;
        }

        self.state.node_subs.subscribe(&subscribe.event, conn.id());
        info!(conn = conn.id(), event = %subscribe.event, "node subscribed");

        match subscribe_response(&subscribe.event) {
            Ok(reply) => {
                if let Err(e) = conn.send(&reply).await {
                    warn!(conn = conn.id(), "failed to send subscribe response: {e}");
                }
            }
            Err(e) => error!(conn = conn.id(), "failed to build subscribe response: {e}"),
        }
    }

    async fn on_task(&self, conn: &Arc<Connection>, header: Header, kind: TaskKind, task: TaskPayload) {
        if !self.state.require_auth(conn, "task").await {
            return;
        }

        match (header.direction(), kind) {
            // A node answering a call we forwarded; route it back to the
            // caller through the correlation table.
            (Direction::Response, _) => {
                if let Err(e) = self.state.tasks.respond(header.direction(), task) {
                    warn!(conn = conn.id(), "unroutable task response: {e}");
                }
            }
            // A node emitting an event.
            (Direction::Request, TaskKind::Event) => self.broadcast_event(&task),
            (Direction::Request, TaskKind::Call) => {
                warn!(conn = conn.id(), task_id = %task.task_id, "nodes cannot originate calls, dropping");
            }
        }
    }
}

//! Api-facing plane: callers authenticate, subscribe to events, and issue
//! calls that are forwarded to a providing node and answered through the
//! correlation table.

use std::sync::Arc;

use async_trait::async_trait;
use codec::envelope::{
    auth_response, implement_error, subscribe_response, task_call, task_error, task_response,
};
use codec::{AuthPayload, Direction, Header, ImplementPayload, Message, SubscribePayload, TaskKind, TaskPayload};
use fabric::{dispatch, ProtocolHandler};
use network::{Connection, ConnectionEvents, ConnectionId, NetworkError};
use tracing::{error, info, warn};

use crate::state::HostState;

/// Handler for connections accepted on the api listener.
pub struct ApiPlane {
    state: Arc<HostState>,
}

impl ApiPlane {
    pub fn new(state: Arc<HostState>) -> Self {
        Self { state }
    }

    /// Sends an error response for a call that cannot be routed.
    async fn refuse_call(&self, conn: &Arc<Connection>, task_id: &str, reason: &str) {
        match task_error(TaskKind::Call, task_id, reason) {
            Ok(reply) => {
                if let Err(e) = conn.send(&reply).await {
                    warn!(conn = conn.id(), "failed to send task error: {e}");
                }
            }
            Err(e) => error!(conn = conn.id(), "failed to build task error: {e}"),
        }
    }

    /// Registers the pending call and forwards it to a providing node.
    async fn route_call(&self, conn: &Arc<Connection>, task: TaskPayload) {
        let task_id = task.task_id.clone();

        let Some(method) = task.method.clone() else {
            self.refuse_call(conn, &task_id, "call without a method").await;
            return;
        };

        let Some(provider) = self.state.methods.any_member(&method) else {
            self.refuse_call(conn, &task_id, "method not provided").await;
            return;
        };

        let forwarded = match task_call(&task_id, &method, task.data.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                error!(conn = conn.id(), "failed to build forwarded call: {e}");
                self.refuse_call(conn, &task_id, "internal error").await;
                return;
            }
        };

        // The callback runs when the node's response (or the deadline sweep)
        // completes the entry; it queues the reply back to the caller.
        let api_conns = self.state.api_conns.clone();
        let caller: ConnectionId = conn.id();
        let callback = Box::new(move |resp: TaskPayload| {
            let reply = match &resp.error {
                Some(error) => task_error(TaskKind::Call, &resp.task_id, error),
                None => task_response(TaskKind::Call, &resp.task_id, resp.data.clone()),
            };
            match reply {
                Ok(reply) => crate::send_later(&api_conns, caller, reply),
                Err(e) => error!(task_id = %resp.task_id, "failed to build call reply: {e}"),
            }
        });

        // A colliding id fails loudly back to this caller; the pending entry
        // it collides with stays untouched.
        if let Err(e) = self.state.tasks.create(task, callback) {
            warn!(conn = conn.id(), "rejected call: {e}");
            self.refuse_call(conn, &task_id, "duplicate task id").await;
            return;
        }

        crate::send_later(&self.state.node_conns, provider, forwarded);
    }
}

#[async_trait]
impl ConnectionEvents for ApiPlane {
    async fn on_connect(&self, conn: &Arc<Connection>) {
        self.state.register_auth(conn.id(), &self.state.api_auth_key);
        info!(conn = conn.id(), "api client connected");
    }

    async fn on_message(&self, conn: &Arc<Connection>, msg: Message) {
        dispatch(self, conn, &msg).await;
    }

    async fn on_close(&self, conn: &Arc<Connection>) {
        self.state.prune(conn.id());
        info!(conn = conn.id(), "api client disconnected");
    }

    async fn on_error(&self, conn: &Arc<Connection>, err: &NetworkError) {
        self.state.prune(conn.id());
        error!(conn = conn.id(), "api connection failed: {err}");
    }
}

#[async_trait]
impl ProtocolHandler for ApiPlane {
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

        if !granted {
            info!(conn = conn.id(), "api client failed authentication, closing");
            conn.close().await;
        }
    }

    async fn on_implement(&self, conn: &Arc<Connection>, header: Header, implement: ImplementPayload) {
        if header.direction() != Direction::Request
            || !self.state.require_auth(conn, "implement").await
        {
            return;
        }

        // Only workers provide methods.
        match implement_error(&implement.method, "implement is not supported on the api plane") {
            Ok(reply) => {
                if let Err(e) = conn.send(&reply).await {
                    warn!(conn = conn.id(), "failed to send implement refusal: {e}");
                }
            }
            Err(e) => error!(conn = conn.id(), "failed to build implement refusal: {e}"),
        }
    }

    async fn on_subscribe(&self, conn: &Arc<Connection>, header: Header, subscribe: SubscribePayload) {
        if header.direction() != Direction::Request
            || !self.state.require_auth(conn, "subscribe").await
        {
            return;
        }

        self.state.api_subs.subscribe(&subscribe.event, conn.id());
        info!(conn = conn.id(), event = %subscribe.event, "api client subscribed");

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
            (Direction::Request, TaskKind::Call) => self.route_call(conn, task).await,
            (Direction::Request, TaskKind::Event) => {
                warn!(conn = conn.id(), task_id = %task.task_id, "api clients cannot emit events, dropping");
            }
            (Direction::Response, _) => {
                warn!(conn = conn.id(), task_id = %task.task_id, "unexpected task response from api client, dropping");
            }
        }
    }
}

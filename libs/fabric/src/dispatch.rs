//! Typed protocol dispatch.
//!
//! [`dispatch`] decodes a framed [`Message`] into its envelope and routes it
//! to the matching [`ProtocolHandler`] method. Every handler method has a
//! default, so a role implements only the slots it serves; the only default
//! with behavior is the heartbeat auto-reply.

use std::sync::Arc;

use async_trait::async_trait;
use codec::envelope::heartbeat_response;
use codec::{
    AuthPayload, Direction, Header, ImplementPayload, Message, MessageBody, SubscribePayload,
    TaskKind, TaskPayload,
};
use network::Connection;
use tracing::{debug, warn};

/// Per-message-type handler slots for one plane of a server or client.
///
/// Handlers run inline in the connection's driver task: they must not block
/// and must not perform long computation. An unhandled message type is a
/// logged, dropped event, never a connection fault.
#[async_trait]
pub trait ProtocolHandler: Send + Sync + 'static {
    async fn on_auth(&self, _conn: &Arc<Connection>, _header: Header, _auth: AuthPayload) {
        debug!("no auth handler bound, dropping message");
    }

    async fn on_implement(
        &self,
        _conn: &Arc<Connection>,
        _header: Header,
        _implement: ImplementPayload,
    ) {
        debug!("no implement handler bound, dropping message");
    }

    async fn on_subscribe(
        &self,
        _conn: &Arc<Connection>,
        _header: Header,
        _subscribe: SubscribePayload,
    ) {
        debug!("no subscribe handler bound, dropping message");
    }

    async fn on_task(
        &self,
        _conn: &Arc<Connection>,
        _header: Header,
        _kind: TaskKind,
        _task: TaskPayload,
    ) {
        debug!("no task handler bound, dropping message");
    }

    /// Keepalive. The default answers requests with a heartbeat response so
    /// dead-peer detection works without any registration; heartbeats are
    /// never auth-gated.
    async fn on_heartbeat(&self, conn: &Arc<Connection>, header: Header) {
        if header.direction() == Direction::Request {
            if let Err(e) = conn.send(&heartbeat_response()).await {
                debug!(conn = conn.id(), "failed to answer heartbeat: {e}");
            }
        }
    }
}

/// Decodes `msg` and invokes the matching handler slot.
///
/// An unknown message type or a malformed payload is logged and dropped; the
/// connection stays open in both cases since the frame itself was read
/// cleanly.
pub async fn dispatch<H>(handler: &H, conn: &Arc<Connection>, msg: &Message)
where
    H: ProtocolHandler + ?Sized,
{
    let header = msg.header();
    match MessageBody::decode(msg) {
        Ok(MessageBody::Auth(auth)) => handler.on_auth(conn, header, auth).await,
        Ok(MessageBody::Implement(implement)) => {
            handler.on_implement(conn, header, implement).await
        }
        Ok(MessageBody::Subscribe(subscribe)) => {
            handler.on_subscribe(conn, header, subscribe).await
        }
        Ok(MessageBody::Task { kind, payload }) => {
            handler.on_task(conn, header, kind, payload).await
        }
        Ok(MessageBody::Heartbeat) => handler.on_heartbeat(conn, header).await,
        Err(e) => {
            warn!(
                conn = conn.id(),
                msg_type = header.raw_type(),
                "dropping undecodable message: {e}"
            );
        }
    }
}

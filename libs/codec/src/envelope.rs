//! Typed message envelopes.
//!
//! One tagged union ([`MessageBody`]) replaces per-type message subclasses:
//! decoding a [`Message`] parses the JSON payload once into the payload
//! struct matching the header type, and the constructors below are the only
//! way outbound messages are built, so header fields and payload fields can
//! never drift apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::header::{Direction, MessageType, TaskKind};
use crate::message::Message;
use crate::Result;

/// `auth` payload: `{"key": ..., "data": bool?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub key: String,
    /// Authentication verdict, present on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `implement` payload: `{"method": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementPayload {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `subscribe` payload: `{"event": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `task` payload. `method` is set on call requests, `event` on event tasks,
/// `data` on responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A decoded message body, tagged by the header `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Auth(AuthPayload),
    Implement(ImplementPayload),
    Subscribe(SubscribePayload),
    Task {
        kind: TaskKind,
        payload: TaskPayload,
    },
    Heartbeat,
}

impl MessageBody {
    /// Decodes a framed message into its typed body.
    ///
    /// Fails on an unknown `type`, an unknown task sub-kind, or a payload
    /// that is not the JSON document the type requires. Callers treat all of
    /// these as droppable protocol errors, not connection faults.
    pub fn decode(msg: &Message) -> Result<Self> {
        let header = msg.header();
        match header.message_type()? {
            MessageType::Auth => Ok(MessageBody::Auth(msg.json()?)),
            MessageType::Implement => Ok(MessageBody::Implement(msg.json()?)),
            MessageType::Subscribe => Ok(MessageBody::Subscribe(msg.json()?)),
            MessageType::Task => Ok(MessageBody::Task {
                kind: header.task_kind()?,
                payload: msg.json()?,
            }),
            // Heartbeats are a bare keepalive; any payload is ignored.
            MessageType::Heartbeat => Ok(MessageBody::Heartbeat),
        }
    }
}

/// `auth` request carrying the presented credential.
pub fn auth_request(key: &str) -> Result<Message> {
    Message::from_json(
        MessageType::Auth,
        0,
        false,
        Direction::Request,
        &AuthPayload {
            key: key.to_string(),
            data: None,
            error: None,
        },
    )
}

/// `auth` response echoing the key with the verdict in `data`.
pub fn auth_response(key: &str, granted: bool) -> Result<Message> {
    Message::from_json(
        MessageType::Auth,
        0,
        false,
        Direction::Response,
        &AuthPayload {
            key: key.to_string(),
            data: Some(granted),
            error: None,
        },
    )
}

/// `implement` request announcing a served method.
pub fn implement_request(method: &str) -> Result<Message> {
    Message::from_json(
        MessageType::Implement,
        0,
        false,
        Direction::Request,
        &ImplementPayload {
            method: method.to_string(),
            error: None,
        },
    )
}

/// Successful `implement` acknowledgement.
pub fn implement_response(method: &str) -> Result<Message> {
    Message::from_json(
        MessageType::Implement,
        0,
        false,
        Direction::Response,
        &ImplementPayload {
            method: method.to_string(),
            error: None,
        },
    )
}

/// `implement` rejection with the error bit set.
pub fn implement_error(method: &str, error: &str) -> Result<Message> {
    Message::from_json(
        MessageType::Implement,
        0,
        true,
        Direction::Response,
        &ImplementPayload {
            method: method.to_string(),
            error: Some(error.to_string()),
        },
    )
}

/// `subscribe` request for a named event.
pub fn subscribe_request(event: &str) -> Result<Message> {
    Message::from_json(
        MessageType::Subscribe,
        0,
        false,
        Direction::Request,
        &SubscribePayload {
            event: event.to_string(),
            error: None,
        },
    )
}

/// Successful `subscribe` acknowledgement.
pub fn subscribe_response(event: &str) -> Result<Message> {
    Message::from_json(
        MessageType::Subscribe,
        0,
        false,
        Direction::Response,
        &SubscribePayload {
            event: event.to_string(),
            error: None,
        },
    )
}

/// `subscribe` rejection with the error bit set.
pub fn subscribe_error(event: &str, error: &str) -> Result<Message> {
    Message::from_json(
        MessageType::Subscribe,
        0,
        true,
        Direction::Response,
        &SubscribePayload {
            event: event.to_string(),
            error: Some(error.to_string()),
        },
    )
}

/// `task` call request invoking `method`.
pub fn task_call(task_id: &str, method: &str, args: Option<Value>) -> Result<Message> {
    Message::from_json(
        MessageType::Task,
        TaskKind::Call as u16,
        false,
        Direction::Request,
        &TaskPayload {
            task_id: task_id.to_string(),
            method: Some(method.to_string()),
            event: None,
            data: args,
            error: None,
        },
    )
}

/// `task` event request broadcasting `event` to subscribers.
pub fn task_event(task_id: &str, event: &str, data: Option<Value>) -> Result<Message> {
    Message::from_json(
        MessageType::Task,
        TaskKind::Event as u16,
        false,
        Direction::Request,
        &TaskPayload {
            task_id: task_id.to_string(),
            method: None,
            event: Some(event.to_string()),
            data,
            error: None,
        },
    )
}

/// `task` response carrying the result `data`.
pub fn task_response(kind: TaskKind, task_id: &str, data: Option<Value>) -> Result<Message> {
    Message::from_json(
        MessageType::Task,
        kind as u16,
        false,
        Direction::Response,
        &TaskPayload {
            task_id: task_id.to_string(),
            method: None,
            event: None,
            data,
            error: None,
        },
    )
}

/// `task` error response. Only responses can carry errors; it makes no sense
/// to request one.
pub fn task_error(kind: TaskKind, task_id: &str, error: &str) -> Result<Message> {
    Message::from_json(
        MessageType::Task,
        kind as u16,
        true,
        Direction::Response,
        &TaskPayload {
            task_id: task_id.to_string(),
            method: None,
            event: None,
            data: None,
            error: Some(error.to_string()),
        },
    )
}

/// Payload-free heartbeat request.
pub fn heartbeat_request() -> Message {
    Message::empty(MessageType::Heartbeat, 0, Direction::Request)
}

/// Payload-free heartbeat response.
pub fn heartbeat_response() -> Message {
    Message::empty(MessageType::Heartbeat, 0, Direction::Response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolError;
    use serde_json::json;

    #[test]
    fn auth_round_trip() {
        let msg = auth_request("abcd").unwrap();
        assert_eq!(msg.header().message_type().unwrap(), MessageType::Auth);
        assert_eq!(msg.header().direction(), Direction::Request);

        match MessageBody::decode(&msg).unwrap() {
            MessageBody::Auth(auth) => {
                assert_eq!(auth.key, "abcd");
                assert_eq!(auth.data, None);
            }
            other => panic!("expected auth body, got {other:?}"),
        }
    }

    #[test]
    fn auth_response_carries_verdict() {
        let msg = auth_response("abcd", true).unwrap();
        let body: AuthPayload = msg.json().unwrap();
        assert_eq!(body.data, Some(true));
        assert_eq!(msg.header().direction(), Direction::Response);
    }

    #[test]
    fn task_call_sets_kind_and_method() {
        let msg = task_call("T1", "test", None).unwrap();
        assert_eq!(msg.header().task_kind().unwrap(), TaskKind::Call);

        match MessageBody::decode(&msg).unwrap() {
            MessageBody::Task { kind, payload } => {
                assert_eq!(kind, TaskKind::Call);
                assert_eq!(payload.task_id, "T1");
                assert_eq!(payload.method.as_deref(), Some("test"));
                assert_eq!(payload.event, None);
            }
            other => panic!("expected task body, got {other:?}"),
        }
    }

    #[test]
    fn task_event_sets_kind_and_event() {
        let msg = task_event("T2", "tick", Some(json!({"seq": 1}))).unwrap();
        assert_eq!(msg.header().task_kind().unwrap(), TaskKind::Event);

        match MessageBody::decode(&msg).unwrap() {
            MessageBody::Task { kind, payload } => {
                assert_eq!(kind, TaskKind::Event);
                assert_eq!(payload.event.as_deref(), Some("tick"));
                assert_eq!(payload.data, Some(json!({"seq": 1})));
            }
            other => panic!("expected task body, got {other:?}"),
        }
    }

    #[test]
    fn error_constructors_pair_bit_and_string() {
        let msg = task_error(TaskKind::Call, "T1", "method not provided").unwrap();
        assert!(msg.header().has_error());
        assert_eq!(msg.header().direction(), Direction::Response);

        let payload: TaskPayload = msg.json().unwrap();
        assert_eq!(payload.error.as_deref(), Some("method not provided"));
    }

    #[test]
    fn heartbeat_ignores_payload() {
        let msg = heartbeat_request();
        assert_eq!(MessageBody::decode(&msg).unwrap(), MessageBody::Heartbeat);
    }

    #[test]
    fn malformed_payload_is_a_json_error() {
        let msg = Message::new(
            crate::Header::new(MessageType::Auth, 0, false, Direction::Request, 0),
            bytes::Bytes::from_static(b"not json"),
        )
        .unwrap();
        assert!(matches!(
            MessageBody::decode(&msg),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn unknown_task_kind_is_rejected() {
        let msg = Message::new(
            crate::Header::new(MessageType::Task, 7, false, Direction::Request, 0),
            bytes::Bytes::from_static(b"{\"task_id\":\"T\"}"),
        )
        .unwrap();
        assert!(matches!(
            MessageBody::decode(&msg),
            Err(ProtocolError::UnknownTaskKind(7))
        ));
    }
}

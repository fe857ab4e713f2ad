//! A framed wire message: one [`Header`] plus its payload bytes.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::header::{Direction, Header, MessageType, HEADER_LEN};
use crate::{ProtocolError, Result};

/// Immutable pairing of a header and a payload byte string.
///
/// The constructors maintain the framing invariant `header.size ==
/// payload.len()`; the two are never updated independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: Header,
    payload: Bytes,
}

impl Message {
    /// Builds a message from a header and payload, fixing up `size` so the
    /// invariant holds.
    pub fn new(header: Header, payload: Bytes) -> Result<Self> {
        let size = u32::try_from(payload.len()).map_err(|_| ProtocolError::Oversize(payload.len()))?;
        Ok(Self {
            header: header.with_size(size),
            payload,
        })
    }

    /// Reassembles a message read off the wire.
    ///
    /// Unlike [`Message::new`] this refuses a mismatched size rather than
    /// repairing it: a peer that frames `size` incorrectly has desynced the
    /// stream.
    pub fn from_wire(header: Header, payload: Bytes) -> Result<Self> {
        if header.size() as usize != payload.len() {
            return Err(ProtocolError::SizeMismatch {
                header: header.size(),
                payload: payload.len(),
            });
        }
        Ok(Self { header, payload })
    }

    /// Builds a message whose payload is the JSON serialization of `body`.
    pub fn from_json<T: Serialize>(
        msg_type: MessageType,
        args: u16,
        error: bool,
        direction: Direction,
        body: &T,
    ) -> Result<Self> {
        let payload = serde_json::to_vec(body)?;
        Self::new(
            Header::new(msg_type, args, error, direction, 0),
            Bytes::from(payload),
        )
    }

    /// Builds a payload-free message (`size == 0`), e.g. a heartbeat.
    pub fn empty(msg_type: MessageType, args: u16, direction: Direction) -> Self {
        Self {
            header: Header::new(msg_type, args, false, direction, 0),
            payload: Bytes::new(),
        }
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replaces the payload, re-syncing `size` in the same step.
    pub fn with_payload(self, payload: Bytes) -> Result<Self> {
        Self::new(self.header, payload)
    }

    /// Parses the JSON payload into a typed body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Serializes header and payload into a single wire buffer of exactly
    /// `size + 8` bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u64(self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MessageType;

    #[test]
    fn new_syncs_size_with_payload() {
        let header = Header::new(MessageType::Auth, 0, false, Direction::Request, 999);
        let msg = Message::new(header, Bytes::from_static(b"{\"key\":\"k\"}")).unwrap();
        assert_eq!(msg.header().size() as usize, msg.payload().len());
    }

    #[test]
    fn with_payload_keeps_invariant() {
        let header = Header::new(MessageType::Subscribe, 0, false, Direction::Request, 0);
        let msg = Message::new(header, Bytes::from_static(b"{}")).unwrap();
        let msg = msg.with_payload(Bytes::from_static(b"{\"event\":\"tick\"}")).unwrap();
        assert_eq!(msg.header().size() as usize, msg.payload().len());
    }

    #[test]
    fn from_wire_rejects_size_mismatch() {
        let header = Header::new(MessageType::Task, 0, false, Direction::Request, 5);
        let err = Message::from_wire(header, Bytes::from_static(b"abc")).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::SizeMismatch { header: 5, payload: 3 }
        ));
    }

    #[test]
    fn encode_is_header_plus_payload() {
        let msg = Message::from_json(
            MessageType::Auth,
            0,
            false,
            Direction::Request,
            &serde_json::json!({"key": "abcd"}),
        )
        .unwrap();

        let wire = msg.encode();
        assert_eq!(wire.len(), HEADER_LEN + msg.payload().len());
        assert_eq!(
            u64::from_be_bytes(wire[..8].try_into().unwrap()),
            msg.header().encode()
        );
        assert_eq!(&wire[8..], msg.payload());
    }

    #[test]
    fn empty_message_has_no_payload() {
        let hb = Message::empty(MessageType::Heartbeat, 0, Direction::Request);
        assert_eq!(hb.header().size(), 0);
        assert!(hb.payload().is_empty());
        assert_eq!(hb.encode().len(), HEADER_LEN);
    }
}

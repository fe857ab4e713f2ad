//! Fixed 64-bit message header.
//!
//! Field layout, most significant bits first:
//! `type:16 | args:14 | error:1 | direction:1 | size:32`. The packed value is
//! written big-endian as the first [`HEADER_LEN`] bytes of every message.

use num_enum::TryFromPrimitive;

use crate::ProtocolError;

/// Number of bytes a header occupies on the wire.
pub const HEADER_LEN: usize = 8;

/// Maximum value representable in the 14-bit `args` field.
pub const MAX_ARGS: u16 = (1 << 14) - 1;

/// Message kinds carried in the header `type` field.
///
/// Zero is deliberately unused so an all-zero header never decodes to a
/// valid type.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum MessageType {
    /// Credential presentation, first message on every connection
    Auth = 1,
    /// Node announces a method it can serve
    Implement = 2,
    /// Peer subscribes to a named event
    Subscribe = 3,
    /// Correlated call/event unit, discriminated by [`TaskKind`] in `args`
    Task = 4,
    /// Keepalive round trip, exempt from auth gating
    Heartbeat = 5,
}

impl MessageType {
    /// Human-readable name for log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Auth => "auth",
            MessageType::Implement => "implement",
            MessageType::Subscribe => "subscribe",
            MessageType::Task => "task",
            MessageType::Heartbeat => "heartbeat",
        }
    }
}

/// Request/response discriminator carried in the header `direction` bit.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum Direction {
    Request = 0,
    Response = 1,
}

/// Task sub-kind carried in the header `args` field of `task` messages.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum TaskKind {
    /// Method invocation routed to a providing node
    Call = 0,
    /// Broadcast notification fanned out to subscribers
    Event = 1,
}

/// Decoded header fields.
///
/// `msg_type` is kept as the raw u16 so that a frame with an unknown type can
/// still be framed correctly (and then dropped at dispatch); use
/// [`Header::message_type`] for the typed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    msg_type: u16,
    args: u16,
    error: bool,
    direction: Direction,
    size: u32,
}

impl Header {
    /// Builds a header for a known message type.
    ///
    /// # Panics
    ///
    /// Panics if `args` needs more than 14 bits. Overflow here is a
    /// programming error, not a recoverable wire condition.
    pub fn new(
        msg_type: MessageType,
        args: u16,
        error: bool,
        direction: Direction,
        size: u32,
    ) -> Self {
        assert!(
            args <= MAX_ARGS,
            "header args {args} exceeds the 14-bit field"
        );
        Self {
            msg_type: msg_type as u16,
            args,
            error,
            direction,
            size,
        }
    }

    /// Packs the header into its 64-bit wire representation.
    pub fn encode(&self) -> u64 {
        (u64::from(self.msg_type) << 48)
            | (u64::from(self.args) << 34)
            | (u64::from(self.error) << 33)
            | (u64::from(self.direction as u8) << 32)
            | u64::from(self.size)
    }

    /// Unpacks a header from its 64-bit wire representation.
    ///
    /// Decoding is total: every u64 yields a header. Unknown `type` values
    /// surface later through [`Header::message_type`] so the read loop can
    /// frame the payload and drop the message without losing sync.
    pub fn decode(bits: u64) -> Self {
        Self {
            msg_type: (bits >> 48) as u16,
            args: ((bits >> 34) & u64::from(MAX_ARGS)) as u16,
            error: (bits >> 33) & 1 == 1,
            direction: if (bits >> 32) & 1 == 1 {
                Direction::Response
            } else {
                Direction::Request
            },
            size: bits as u32,
        }
    }

    /// Typed view of the `type` field.
    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.msg_type).map_err(|_| ProtocolError::UnknownType(self.msg_type))
    }

    /// Raw `type` field.
    pub fn raw_type(&self) -> u16 {
        self.msg_type
    }

    /// Message-kind-specific sub-tag (14 bits).
    pub fn args(&self) -> u16 {
        self.args
    }

    /// Task sub-kind view of `args`, valid for `task` messages.
    pub fn task_kind(&self) -> Result<TaskKind, ProtocolError> {
        TaskKind::try_from(self.args).map_err(|_| ProtocolError::UnknownTaskKind(self.args))
    }

    /// Whether the payload carries an `"error"` string.
    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Exact byte length of the payload that follows on the wire.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Copy of this header with a different payload size.
    pub(crate) fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_matches_field_layout() {
        let header = Header::new(MessageType::Task, 1, true, Direction::Response, 0xDEAD);
        let bits = header.encode();

        assert_eq!(bits >> 48, 4);
        assert_eq!((bits >> 34) & 0x3FFF, 1);
        assert_eq!((bits >> 33) & 1, 1);
        assert_eq!((bits >> 32) & 1, 1);
        assert_eq!(bits as u32, 0xDEAD);
    }

    #[test]
    fn decode_inverts_encode() {
        let header = Header::new(MessageType::Auth, 0, false, Direction::Request, 42);
        assert_eq!(Header::decode(header.encode()), header);
    }

    #[test]
    fn unknown_type_is_framed_not_rejected() {
        let header = Header::decode((999u64 << 48) | 16);
        assert_eq!(header.raw_type(), 999);
        assert_eq!(header.size(), 16);
        assert!(matches!(
            header.message_type(),
            Err(ProtocolError::UnknownType(999))
        ));
    }

    #[test]
    #[should_panic(expected = "14-bit field")]
    fn oversized_args_panics() {
        Header::new(MessageType::Task, MAX_ARGS + 1, false, Direction::Request, 0);
    }

    proptest! {
        #[test]
        fn round_trip_all_field_ranges(
            raw_type in 0u16..=u16::MAX,
            args in 0u16..=MAX_ARGS,
            error in any::<bool>(),
            response in any::<bool>(),
            size in 0u32..=u32::MAX,
        ) {
            let direction = if response { Direction::Response } else { Direction::Request };
            let bits = (u64::from(raw_type) << 48)
                | (u64::from(args) << 34)
                | (u64::from(error) << 33)
                | (u64::from(direction as u8) << 32)
                | u64::from(size);

            let header = Header::decode(bits);
            prop_assert_eq!(header.raw_type(), raw_type);
            prop_assert_eq!(header.args(), args);
            prop_assert_eq!(header.has_error(), error);
            prop_assert_eq!(header.direction(), direction);
            prop_assert_eq!(header.size(), size);
            prop_assert_eq!(header.encode(), bits);
        }
    }
}

//! Wire protocol for the Songclash room coordinator.
//!
//! A frame is a fixed 16-byte binary header followed by a CBOR payload. The
//! header carries only transport concerns (opcode, request correlation,
//! payload size); room codes and identities live in the payloads, since the
//! server decodes every payload anyway.
//!
//! The [`Payload`] enum covers the whole event surface: session management
//! (Hello, Ping, Goodbye), room intents (create/join/leave/ready/answer), and
//! room broadcasts (userList, roundStart, roundEnd, gameEnd, snapshot).

mod errors;
mod frame;
mod header;
mod payloads;
mod types;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use payloads::{
    ErrorPayload, GameEnd, Goodbye, Hello, HelloReply, Payload, RoomRef, RoundEnd, RoundStart,
    SubmitAnswer, UserList, UserReady,
};
pub use types::{Participant, RoomPhase, RoomSnapshot, RoundInfo, Track, UserProfile};

/// ALPN protocol identifier for QUIC connections.
pub const ALPN_PROTOCOL: &[u8] = b"songclash";

/// Frame operation codes.
///
/// The opcode in the frame header determines how the payload bytes are
/// decoded. Codes are grouped by direction: 0x00xx session, 0x01xx client
/// intents, 0x02xx server events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client handshake carrying the identity token
    Hello = 0x0001,
    /// Server handshake reply with session id and resolved profile
    HelloReply = 0x0002,
    /// Graceful disconnect
    Goodbye = 0x0003,
    /// Keepalive probe
    Ping = 0x0004,
    /// Keepalive response
    Pong = 0x0005,

    /// Create a new room; the server assigns the code
    CreateRoom = 0x0101,
    /// Join an existing room by code
    JoinRoom = 0x0102,
    /// Leave a room
    LeaveRoom = 0x0103,
    /// Flip the sender's ready flag
    ToggleReady = 0x0104,
    /// Submit an answer for the active round
    SubmitAnswer = 0x0105,
    /// Request the authoritative room snapshot (reconnection)
    SnapshotRequest = 0x0106,

    /// Full membership snapshot broadcast
    UserList = 0x0201,
    /// A member's ready flag changed
    UserReady = 0x0202,
    /// A round started
    RoundStart = 0x0203,
    /// A round resolved (winner or expiry)
    RoundEnd = 0x0204,
    /// The game ended
    GameEnd = 0x0205,
    /// Authoritative room snapshot, requester-only
    Snapshot = 0x0206,

    /// Error response, requester-only
    Error = 0x00FF,
}

impl Opcode {
    /// Raw u16 value for the frame header.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a raw opcode. `None` if unrecognized.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Hello),
            0x0002 => Some(Self::HelloReply),
            0x0003 => Some(Self::Goodbye),
            0x0004 => Some(Self::Ping),
            0x0005 => Some(Self::Pong),
            0x0101 => Some(Self::CreateRoom),
            0x0102 => Some(Self::JoinRoom),
            0x0103 => Some(Self::LeaveRoom),
            0x0104 => Some(Self::ToggleReady),
            0x0105 => Some(Self::SubmitAnswer),
            0x0106 => Some(Self::SnapshotRequest),
            0x0201 => Some(Self::UserList),
            0x0202 => Some(Self::UserReady),
            0x0203 => Some(Self::RoundStart),
            0x0204 => Some(Self::RoundEnd),
            0x0205 => Some(Self::GameEnd),
            0x0206 => Some(Self::Snapshot),
            0x00FF => Some(Self::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trip() {
        let all = [
            Opcode::Hello,
            Opcode::HelloReply,
            Opcode::Goodbye,
            Opcode::Ping,
            Opcode::Pong,
            Opcode::CreateRoom,
            Opcode::JoinRoom,
            Opcode::LeaveRoom,
            Opcode::ToggleReady,
            Opcode::SubmitAnswer,
            Opcode::SnapshotRequest,
            Opcode::UserList,
            Opcode::UserReady,
            Opcode::RoundStart,
            Opcode::RoundEnd,
            Opcode::GameEnd,
            Opcode::Snapshot,
            Opcode::Error,
        ];

        for opcode in all {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(opcode));
        }
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert_eq!(Opcode::from_u16(0xBEEF), None);
    }
}

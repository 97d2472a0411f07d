//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary, payloads are CBOR. The payload type is
//! determined by the opcode in the frame header, so only the inner struct
//! content is serialized - no variant tag in CBOR. This prevents mismatched
//! opcode/payload pairs and keeps the encoding compact.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Round-trip encoding must produce identical values.

use std::collections::BTreeMap;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
    types::{Participant, RoomSnapshot, Track, UserProfile},
};

/// Client handshake.
///
/// The identity token is required: a Hello without one is an authentication
/// failure and the connection is terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version the client speaks
    pub version: u8,
    /// Identity token resolved by the server's directory
    pub token: Option<String>,
}

/// Server handshake reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Server-assigned session identifier
    pub session_id: u64,
    /// The identity the token resolved to
    pub profile: UserProfile,
}

/// Graceful disconnect notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Human-readable reason
    pub reason: String,
}

/// Room-scoped intent carrying only the room code.
///
/// Used by join, leave, toggle-ready, and snapshot requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRef {
    /// Target room code
    pub room: String,
}

/// Answer submission for the active round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAnswer {
    /// Target room code
    pub room: String,
    /// The guessed title
    pub answer: String,
}

/// Full membership snapshot, broadcast on every membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserList {
    /// Room code
    pub room: String,
    /// Members in join order
    pub users: Vec<Participant>,
    /// Current host
    pub host_id: u64,
}

/// A member's ready flag changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReady {
    /// The member whose flag changed
    pub user_id: u64,
    /// New ready state
    pub ready: bool,
}

/// A round started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStart {
    /// Room code
    pub room: String,
    /// Round number, 1-based
    pub round: u32,
    /// The round's subject
    pub track: Track,
    /// Round start, Unix milliseconds
    pub started_at_ms: u64,
    /// Round end, Unix milliseconds
    pub ends_at_ms: u64,
}

/// A round resolved - by a winning answer or by expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEnd {
    /// Room code
    pub room: String,
    /// Round number, 1-based
    pub round: u32,
    /// The answer that was expected
    pub correct_answer: String,
    /// Winner, `None` when the round expired unanswered
    pub winner_id: Option<u64>,
    /// Scoreboard after the round
    pub scores: BTreeMap<u64, u32>,
}

/// The game ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEnd {
    /// Room code
    pub room: String,
    /// Final scoreboard
    pub scores: BTreeMap<u64, u32>,
    /// Winner: maximal score, ties broken by join order
    pub winner_id: u64,
    /// Rounds that were played
    pub rounds: u32,
}

/// Error payload for error frames, requester-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable error code
    pub code: u16,
    /// Human-readable message
    pub message: String,
}

impl ErrorPayload {
    /// Connection presented no usable identity token.
    pub const AUTH_REQUIRED: u16 = 0x0001;
    /// Room does not exist.
    pub const ROOM_NOT_FOUND: u16 = 0x0002;
    /// Room's game is already in progress.
    pub const GAME_ALREADY_STARTED: u16 = 0x0003;
    /// Room is at capacity.
    pub const ROOM_FULL: u16 = 0x0004;
    /// Payload failed to decode or was the wrong type for its opcode.
    pub const INVALID_PAYLOAD: u16 = 0x0005;

    /// Missing or unresolvable identity token.
    pub fn auth_required() -> Self {
        Self { code: Self::AUTH_REQUIRED, message: "identity token required".to_string() }
    }

    /// Room lookup failed.
    pub fn room_not_found(room: &str) -> Self {
        Self { code: Self::ROOM_NOT_FOUND, message: format!("room not found: {room}") }
    }

    /// Join rejected because the game already started.
    pub fn game_already_started(room: &str) -> Self {
        Self { code: Self::GAME_ALREADY_STARTED, message: format!("game already started: {room}") }
    }

    /// Join rejected because the room is full.
    pub fn room_full(room: &str) -> Self {
        Self { code: Self::ROOM_FULL, message: format!("room full: {room}") }
    }

    /// Malformed or mismatched payload.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into() }
    }
}

/// All possible frame payloads.
///
/// # Invariants
///
/// - Opcode Uniqueness: each variant corresponds to exactly one [`Opcode`].
/// - Serialization Consistency: encoding a `Payload` and decoding it with the
///   same opcode produces an equivalent value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session management
    /// Initial handshake
    Hello(Hello),
    /// Server response to Hello
    HelloReply(HelloReply),
    /// Graceful disconnect
    Goodbye(Goodbye),
    /// Keepalive probe
    Ping,
    /// Keepalive response
    Pong,

    // Room intents (client → server)
    /// Create a room; the server assigns the code
    CreateRoom,
    /// Join a room by code
    JoinRoom(RoomRef),
    /// Leave a room
    LeaveRoom(RoomRef),
    /// Flip the sender's ready flag
    ToggleReady(RoomRef),
    /// Submit an answer for the active round
    SubmitAnswer(SubmitAnswer),
    /// Request the authoritative room snapshot
    SnapshotRequest(RoomRef),

    // Room events (server → client)
    /// Full membership snapshot
    UserList(UserList),
    /// Ready flag change
    UserReady(UserReady),
    /// Round started
    RoundStart(RoundStart),
    /// Round resolved
    RoundEnd(RoundEnd),
    /// Game ended
    GameEnd(GameEnd),
    /// Authoritative room snapshot
    Snapshot(RoomSnapshot),

    /// Error response
    Error(ErrorPayload),
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::CreateRoom => Opcode::CreateRoom,
            Self::JoinRoom(_) => Opcode::JoinRoom,
            Self::LeaveRoom(_) => Opcode::LeaveRoom,
            Self::ToggleReady(_) => Opcode::ToggleReady,
            Self::SubmitAnswer(_) => Opcode::SubmitAnswer,
            Self::SnapshotRequest(_) => Opcode::SnapshotRequest,
            Self::UserList(_) => Opcode::UserList,
            Self::UserReady(_) => Opcode::UserReady,
            Self::RoundStart(_) => Opcode::RoundStart,
            Self::RoundEnd(_) => Opcode::RoundEnd,
            Self::GameEnd(_) => Opcode::GameEnd,
            Self::Snapshot(_) => Opcode::Snapshot,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode the payload into a buffer.
    ///
    /// Serializes only the inner struct, NOT the variant tag - the frame
    /// header's opcode already identifies the payload type.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Hello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HelloReply(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Goodbye(inner) => ciborium::ser::into_writer(inner, &mut writer),
            // Zero-byte payloads
            Self::Ping | Self::Pong | Self::CreateRoom => Ok(()),
            Self::JoinRoom(inner)
            | Self::LeaveRoom(inner)
            | Self::ToggleReady(inner)
            | Self::SnapshotRequest(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::SubmitAnswer(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserList(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserReady(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::RoundStart(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::RoundEnd(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::GameEnd(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Snapshot(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode a payload from bytes based on opcode.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed the protocol limit
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        fn read<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
        }

        let payload = match opcode {
            Opcode::Hello => Self::Hello(read(bytes)?),
            Opcode::HelloReply => Self::HelloReply(read(bytes)?),
            Opcode::Goodbye => Self::Goodbye(read(bytes)?),
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::CreateRoom => Self::CreateRoom,
            Opcode::JoinRoom => Self::JoinRoom(read(bytes)?),
            Opcode::LeaveRoom => Self::LeaveRoom(read(bytes)?),
            Opcode::ToggleReady => Self::ToggleReady(read(bytes)?),
            Opcode::SubmitAnswer => Self::SubmitAnswer(read(bytes)?),
            Opcode::SnapshotRequest => Self::SnapshotRequest(read(bytes)?),
            Opcode::UserList => Self::UserList(read(bytes)?),
            Opcode::UserReady => Self::UserReady(read(bytes)?),
            Opcode::RoundStart => Self::RoundStart(read(bytes)?),
            Opcode::RoundEnd => Self::RoundEnd(read(bytes)?),
            Opcode::GameEnd => Self::GameEnd(read(bytes)?),
            Opcode::Snapshot => Self::Snapshot(read(bytes)?),
            Opcode::Error => Self::Error(read(bytes)?),
        };

        Ok(payload)
    }

    /// Convert the payload into a transport frame.
    ///
    /// Encodes the payload to CBOR, stamps the matching opcode into the
    /// header, and computes the payload size.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Parse a payload from a raw transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if the opcode is unrecognized or CBOR
    ///   deserialization fails
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds the limit
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame.header.opcode_enum().ok_or_else(|| {
            ProtocolError::CborDecode(format!("invalid opcode: {:#06x}", frame.header.opcode()))
        })?;
        Self::decode(opcode, &frame.payload)
    }
}

//! Client events and actions.
//!
//! The caller (UI shell or test harness) is responsible for receiving
//! frames from the network, forwarding application intents, and executing
//! the returned actions.

use songclash_proto::{Frame, Track};

/// Events the caller feeds into the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Frame received from the server
    FrameReceived(Frame),

    /// Application wants to create a room
    CreateRoom,

    /// Application wants to join a room by code
    JoinRoom {
        /// Target room code
        room: String,
    },

    /// Application wants to leave the current room
    LeaveRoom,

    /// Application wants to flip its ready flag
    ToggleReady,

    /// Application wants to submit an answer for the active round
    SubmitAnswer {
        /// The guessed title
        answer: String,
    },

    /// The transport was re-established after a disconnect.
    ///
    /// Triggers a snapshot request for the current room; reconciliation is
    /// purely snapshot-driven, never event replay.
    Reconnected,
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send a frame to the server
    Send(Frame),

    /// Surface a room-state change to the application layer
    Notify(RoomNotice),

    /// Log a message for debugging
    Log {
        /// Log message
        message: String,
    },
}

/// Room-state changes surfaced to the application layer.
///
/// Detail beyond these fields is read from [`Client::room`].
///
/// [`Client::room`]: crate::Client::room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomNotice {
    /// Membership or host changed
    RoomUpdated,

    /// A member's ready flag changed
    ReadyChanged {
        /// The member
        user_id: u64,
        /// New ready state
        ready: bool,
    },

    /// A round started
    RoundStarted {
        /// Round number
        round: u32,
        /// The round's subject
        track: Track,
        /// Round end, Unix milliseconds
        ends_at_ms: u64,
    },

    /// A round resolved
    RoundEnded {
        /// Round number
        round: u32,
        /// The expected answer
        correct_answer: String,
        /// Winner, `None` when the round expired unanswered
        winner_id: Option<u64>,
    },

    /// The game ended
    GameEnded {
        /// Winner by maximal score
        winner_id: u64,
    },

    /// The server reported a room-scoped error
    ServerError {
        /// Stable error code
        code: u16,
        /// Human-readable message
        message: String,
    },

    /// The room is gone or no longer includes this client
    RoomClosed,
}

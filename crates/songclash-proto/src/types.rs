//! Domain types shared between server and client.
//!
//! These are wire types: they appear inside CBOR payloads and double as the
//! client's local view of room state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Externally issued user identity.
///
/// Produced by the identity directory from a connection token; never created
/// by the coordinator itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Stable user identifier
    pub user_id: u64,
    /// Display name
    pub name: String,
    /// Profile icon number
    pub icon: u32,
}

/// A room member as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable user identifier
    pub user_id: u64,
    /// Display name
    pub name: String,
    /// Profile icon number
    pub icon: u32,
    /// Score in the current game
    pub score: u32,
    /// Ready flag for the next game
    pub ready: bool,
    /// Seat index 0..=7, assigned at join
    pub position: u8,
}

impl Participant {
    /// Create a participant from an identity with a seat assignment.
    #[must_use]
    pub fn new(profile: UserProfile, position: u8) -> Self {
        Self {
            user_id: profile.user_id,
            name: profile.name,
            icon: profile.icon,
            score: 0,
            ready: false,
            position,
        }
    }
}

/// A round's subject, drawn from the external song catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Song title; answers are matched against this
    pub title: String,
    /// Playback clip location, if the catalog provides one
    pub preview_url: Option<String>,
}

/// Macro state of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomPhase {
    /// Collecting members and ready votes
    Waiting,
    /// A round is running and accepting answers
    RoundActive,
    /// A round resolved; the next round (or game end) is pending
    RoundResolved,
}

/// The active round as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    /// Round number, 1-based
    pub number: u32,
    /// The round's subject
    pub track: Track,
    /// Round start, Unix milliseconds
    pub started_at_ms: u64,
    /// Round end, Unix milliseconds
    pub ends_at_ms: u64,
}

/// Authoritative room snapshot.
///
/// Sent requester-only in response to a snapshot request; reconnecting
/// clients reconcile purely from this, never by replaying missed events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Room code
    pub room: String,
    /// Current membership in join order
    pub users: Vec<Participant>,
    /// Current host
    pub host_id: u64,
    /// Macro state
    pub phase: RoomPhase,
    /// Current round number, 1-based; 0 while waiting
    pub current_round: u32,
    /// Rounds per game
    pub total_rounds: u32,
    /// The active round, if any
    pub round: Option<RoundInfo>,
    /// Scoreboard keyed by user id
    pub scores: BTreeMap<u64, u32>,
}

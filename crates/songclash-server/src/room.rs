//! Per-room game state machine.
//!
//! A `GameRoom` owns one room's membership, readiness, round progression,
//! answer arbitration, and scoring. It is a pure state machine in the action
//! pattern: mutations take time as parameters and return [`RoomEvent`]s for
//! the driver to fan out. Timers are deadlines stored inside the room and
//! checked on tick - deleting or resetting the room drops its deadlines, so
//! a stale timer can never mutate a reused room slot.
//!
//! # Phases
//!
//! ```text
//! ┌─────────┐ unanimous ready, ≥2 ┌─────────────┐ answer / expiry ┌───────────────┐
//! │ Waiting │────────────────────>│ RoundActive │────────────────>│ RoundResolved │
//! └─────────┘                     └─────────────┘                 └───────────────┘
//!      ↑                                 ↑         5s grace, next round    │
//!      │                                 └──────────────────────────────────┘
//!      │            final round resolved (gameEnd, membership retained)
//!      └────────────────────────────────────────────────────────────────────
//! ```
//!
//! There is no countdown phase: countdown is a client presentation affordance
//! on top of `roundStart`, never a server transition.

use std::{
    collections::BTreeMap,
    ops::Add,
    time::Duration,
};

use songclash_proto::{
    GameEnd, Participant, RoomPhase, RoomSnapshot, RoundEnd, RoundInfo, RoundStart, Track,
    UserList, UserProfile, UserReady,
};
use thiserror::Error;

use crate::collab::TrackSource;

/// Maximum members per room.
pub const MAX_MEMBERS: usize = 8;

/// Grace period between a resolved round and the next round start.
pub const ROUND_GRACE: Duration = Duration::from_secs(5);

/// Per-room game settings.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    /// Rounds per game
    pub total_rounds: u32,
    /// Round length in seconds
    pub round_secs: u64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self { total_rounds: 5, round_secs: 30 }
    }
}

/// Events emitted by room mutations.
///
/// `Membership`, `Ready`, and the round events are room broadcasts; the
/// driver resolves recipients and builds frames.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Full membership snapshot changed
    Membership(UserList),
    /// A member's ready flag changed
    Ready(UserReady),
    /// A round started
    RoundStarted(RoundStart),
    /// A round resolved, by winner or expiry
    RoundEnded(RoundEnd),
    /// The game ended; scores are final
    GameEnded(GameEnd),
}

/// Recoverable room-scoped errors, reported to the requester only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// No room with this code
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Join rejected: the game is in progress
    #[error("game already started: {0}")]
    GameAlreadyStarted(String),

    /// Join rejected: the room is at capacity
    #[error("room full: {0}")]
    RoomFull(String),
}

/// The active round. Replaced wholesale each round.
#[derive(Debug, Clone)]
struct ActiveRound<I> {
    number: u32,
    track: Track,
    started_at_ms: u64,
    ends_at_ms: u64,
    deadline: I,
}

/// One room's authoritative state.
///
/// Generic over `I` (Instant type) to support virtual time in tests.
#[derive(Debug, Clone)]
pub struct GameRoom<I> {
    code: String,
    members: Vec<Participant>,
    host_id: u64,
    phase: RoomPhase,
    current_round: u32,
    settings: RoomSettings,
    answer_locked: bool,
    round: Option<ActiveRound<I>>,
    next_round_at: Option<I>,
}

impl<I> GameRoom<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Create a room with the creator as sole member and host.
    pub fn new(code: String, creator: UserProfile, settings: RoomSettings) -> Self {
        let host_id = creator.user_id;
        Self {
            code,
            members: vec![Participant::new(creator, 0)],
            host_id,
            phase: RoomPhase::Waiting,
            current_round: 1,
            settings,
            answer_locked: false,
            round: None,
            next_round_at: None,
        }
    }

    /// Room code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Current host. Always a member while membership is non-empty.
    #[must_use]
    pub fn host_id(&self) -> u64 {
        self.host_id
    }

    /// Current round number.
    #[must_use]
    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    /// Number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether the user is a member.
    #[must_use]
    pub fn is_member(&self, user_id: u64) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    /// Member user ids in join order.
    pub fn member_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.members.iter().map(|m| m.user_id)
    }

    /// Whether the answer lock is set for the current round.
    #[must_use]
    pub fn answer_locked(&self) -> bool {
        self.answer_locked
    }

    /// Add a member.
    ///
    /// # Errors
    ///
    /// - `RoomError::GameAlreadyStarted` outside the Waiting phase
    /// - `RoomError::RoomFull` at capacity
    pub fn join(&mut self, profile: UserProfile) -> Result<Vec<RoomEvent>, RoomError> {
        if self.phase != RoomPhase::Waiting {
            return Err(RoomError::GameAlreadyStarted(self.code.clone()));
        }

        if self.is_member(profile.user_id) {
            // Rejoin while waiting: refresh the member list for the caller
            return Ok(vec![self.membership_event()]);
        }

        if self.members.len() >= MAX_MEMBERS {
            return Err(RoomError::RoomFull(self.code.clone()));
        }

        let position = self.free_position();
        self.members.push(Participant::new(profile, position));

        Ok(vec![self.membership_event()])
    }

    /// Remove a member, migrating the host role if needed.
    ///
    /// Promotes the first remaining member in join order when the host
    /// leaves. Returns no events when the user was not a member or the room
    /// became empty (the store deletes empty rooms).
    pub fn leave(&mut self, user_id: u64) -> Vec<RoomEvent> {
        let before = self.members.len();
        self.members.retain(|m| m.user_id != user_id);

        if self.members.len() == before {
            return Vec::new();
        }

        if self.host_id == user_id {
            if let Some(next_host) = self.members.first() {
                self.host_id = next_host.user_id;
            }
        }

        if self.members.is_empty() {
            return Vec::new();
        }

        vec![self.membership_event()]
    }

    /// Flip a member's ready flag.
    ///
    /// When every member is ready and at least two are present, the game
    /// starts: this is the sole game-start trigger. Toggles outside the
    /// Waiting phase are ignored.
    pub fn toggle_ready(
        &mut self,
        user_id: u64,
        tracks: &impl TrackSource,
        now: I,
        wall_ms: u64,
    ) -> Vec<RoomEvent> {
        if self.phase != RoomPhase::Waiting {
            return Vec::new();
        }

        let Some(member) = self.members.iter_mut().find(|m| m.user_id == user_id) else {
            return Vec::new();
        };

        member.ready = !member.ready;
        let ready = member.ready;

        let mut events = vec![RoomEvent::Ready(UserReady { user_id, ready })];

        let quorum =
            self.members.len() >= 2 && self.members.iter().all(|m| m.ready);

        if quorum {
            self.current_round = 0;
            events.push(self.start_round(tracks.next_track(), now, wall_ms));
        }

        events
    }

    /// Submit an answer for the active round.
    ///
    /// Silently ignored - not an error - unless the room is in RoundActive
    /// with the answer lock clear and the sender is a member; races here are
    /// expected and harmless. The first matching submission sets the lock,
    /// scores the winner, and resolves the round: the at-most-one-winner
    /// guarantee.
    pub fn submit_answer(&mut self, user_id: u64, answer: &str, now: I) -> Vec<RoomEvent> {
        if self.phase != RoomPhase::RoundActive || self.answer_locked {
            return Vec::new();
        }

        if !self.is_member(user_id) {
            return Vec::new();
        }

        let Some(round) = &self.round else {
            return Vec::new();
        };

        if normalize(answer) != normalize(&round.track.title) {
            return Vec::new();
        }

        self.answer_locked = true;

        if let Some(member) = self.members.iter_mut().find(|m| m.user_id == user_id) {
            member.score += 1;
        }

        self.resolve_round(Some(user_id), now)
    }

    /// Advance room timers.
    ///
    /// Resolves an expired round with no winner, and starts the next round
    /// once the grace period has passed.
    pub fn tick(&mut self, tracks: &impl TrackSource, now: I, wall_ms: u64) -> Vec<RoomEvent> {
        match self.phase {
            RoomPhase::RoundActive => {
                let expired = self.round.as_ref().is_some_and(|r| r.deadline <= now);
                if expired {
                    return self.resolve_round(None, now);
                }
                Vec::new()
            },
            RoomPhase::RoundResolved => {
                let due = self.next_round_at.is_some_and(|at| at <= now);
                if due {
                    self.next_round_at = None;
                    return vec![self.start_round(tracks.next_track(), now, wall_ms)];
                }
                Vec::new()
            },
            RoomPhase::Waiting => Vec::new(),
        }
    }

    /// Authoritative snapshot for reconnection reconcile.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room: self.code.clone(),
            users: self.members.clone(),
            host_id: self.host_id,
            phase: self.phase,
            current_round: self.current_round,
            total_rounds: self.settings.total_rounds,
            round: self.round.as_ref().map(|r| RoundInfo {
                number: r.number,
                track: r.track.clone(),
                started_at_ms: r.started_at_ms,
                ends_at_ms: r.ends_at_ms,
            }),
            scores: self.scoreboard(),
        }
    }

    fn start_round(&mut self, track: Track, now: I, wall_ms: u64) -> RoomEvent {
        self.current_round += 1;
        self.answer_locked = false;
        self.phase = RoomPhase::RoundActive;

        let ends_at_ms = wall_ms + self.settings.round_secs * 1000;
        let deadline = now + Duration::from_secs(self.settings.round_secs);

        let round = ActiveRound {
            number: self.current_round,
            track: track.clone(),
            started_at_ms: wall_ms,
            ends_at_ms,
            deadline,
        };
        self.round = Some(round);

        RoomEvent::RoundStarted(RoundStart {
            room: self.code.clone(),
            round: self.current_round,
            track,
            started_at_ms: wall_ms,
            ends_at_ms,
        })
    }

    fn resolve_round(&mut self, winner_id: Option<u64>, now: I) -> Vec<RoomEvent> {
        let Some(round) = self.round.take() else {
            return Vec::new();
        };

        self.phase = RoomPhase::RoundResolved;

        let mut events = vec![RoomEvent::RoundEnded(RoundEnd {
            room: self.code.clone(),
            round: round.number,
            correct_answer: round.track.title,
            winner_id,
            scores: self.scoreboard(),
        })];

        if self.current_round < self.settings.total_rounds {
            self.next_round_at = Some(now + ROUND_GRACE);
        } else {
            events.extend(self.end_game());
        }

        events
    }

    fn end_game(&mut self) -> Vec<RoomEvent> {
        let Some(first) = self.members.first() else {
            return Vec::new();
        };

        // Maximal score, ties broken by first-encountered in join order
        let mut winner = first;
        for member in &self.members[1..] {
            if member.score > winner.score {
                winner = member;
            }
        }
        let winner_id = winner.user_id;

        let event = RoomEvent::GameEnded(GameEnd {
            room: self.code.clone(),
            scores: self.scoreboard(),
            winner_id,
            rounds: self.settings.total_rounds,
        });

        // Rematch reset: membership is retained, everything else clears
        for member in &mut self.members {
            member.score = 0;
            member.ready = false;
        }
        self.phase = RoomPhase::Waiting;
        self.current_round = 1;
        self.answer_locked = false;
        self.round = None;
        self.next_round_at = None;

        vec![event]
    }

    fn membership_event(&self) -> RoomEvent {
        RoomEvent::Membership(UserList {
            room: self.code.clone(),
            users: self.members.clone(),
            host_id: self.host_id,
        })
    }

    fn scoreboard(&self) -> BTreeMap<u64, u32> {
        self.members.iter().map(|m| (m.user_id, m.score)).collect()
    }

    fn free_position(&self) -> u8 {
        (0..MAX_MEMBERS as u8)
            .find(|p| !self.members.iter().any(|m| m.position == *p))
            .unwrap_or(0)
    }
}

/// Case- and whitespace-insensitive answer form.
fn normalize(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect()
}

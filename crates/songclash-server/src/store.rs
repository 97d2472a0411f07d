//! Authoritative room table.
//!
//! The `RoomStore` owns every room and is the only mutation path: an event
//! reaches exactly one room, so per-room mutual exclusion holds by
//! construction, and a fault in one room's handling can never touch a
//! sibling. Rooms with no members are deleted; deletion drops any pending
//! round deadlines with the room, so late timers cannot resurrect state.

use std::{collections::HashMap, ops::Add, time::Duration};

use songclash_core::env::Environment;
use songclash_proto::{RoomSnapshot, UserProfile};

use crate::{
    collab::TrackSource,
    room::{GameRoom, RoomError, RoomEvent, RoomSettings},
};

/// Room code length. Short enough to type, long enough to avoid collisions
/// at this scale.
const CODE_LEN: usize = 6;

const CODE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Code-keyed table of live rooms.
///
/// Generic over `I` (Instant type) to support virtual time in tests.
#[derive(Debug, Default)]
pub struct RoomStore<I> {
    rooms: HashMap<String, GameRoom<I>>,
    settings: RoomSettings,
}

impl<I> RoomStore<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Create an empty store with default room settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(RoomSettings::default())
    }

    /// Create an empty store with the given room settings.
    #[must_use]
    pub fn with_settings(settings: RoomSettings) -> Self {
        Self { rooms: HashMap::new(), settings }
    }

    /// Number of live rooms. Health surface.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Whether a room exists.
    #[must_use]
    pub fn has_room(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    /// Read access to a room, for snapshots and assertions.
    #[must_use]
    pub fn room(&self, code: &str) -> Option<&GameRoom<I>> {
        self.rooms.get(code)
    }

    /// Create a room with the creator as sole member and host.
    ///
    /// Codes are drawn from the environment RNG and regenerated on
    /// collision, so creation always succeeds.
    pub fn create_room<E: Environment<Instant = I>>(
        &mut self,
        env: &E,
        creator: UserProfile,
    ) -> (String, Vec<RoomEvent>) {
        let code = loop {
            let candidate = room_code(env.random_u64());
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let room = GameRoom::new(code.clone(), creator, self.settings.clone());
        let events = vec![membership_of(&room)];
        self.rooms.insert(code.clone(), room);

        (code, events)
    }

    /// Add a user to a room.
    ///
    /// # Errors
    ///
    /// - `RoomError::RoomNotFound` for an unknown code
    /// - `RoomError::GameAlreadyStarted` outside the Waiting phase
    /// - `RoomError::RoomFull` at capacity
    pub fn join_room(
        &mut self,
        code: &str,
        profile: UserProfile,
    ) -> Result<Vec<RoomEvent>, RoomError> {
        let room =
            self.rooms.get_mut(code).ok_or_else(|| RoomError::RoomNotFound(code.to_string()))?;
        room.join(profile)
    }

    /// Remove a user from a room, deleting the room if it empties.
    ///
    /// # Errors
    ///
    /// - `RoomError::RoomNotFound` for an unknown code
    pub fn leave_room(&mut self, code: &str, user_id: u64) -> Result<Vec<RoomEvent>, RoomError> {
        let room =
            self.rooms.get_mut(code).ok_or_else(|| RoomError::RoomNotFound(code.to_string()))?;
        let events = room.leave(user_id);

        if room.member_count() == 0 {
            self.rooms.remove(code);
        }

        Ok(events)
    }

    /// Remove a user from every room containing them.
    ///
    /// The disconnect path: returns per-room events for broadcasting. Host
    /// migration and room deletion behave exactly as an explicit leave.
    pub fn leave_everywhere(&mut self, user_id: u64) -> Vec<(String, Vec<RoomEvent>)> {
        let codes: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.is_member(user_id))
            .map(|(code, _)| code.clone())
            .collect();

        let mut results = Vec::new();
        for code in codes {
            if let Ok(events) = self.leave_room(&code, user_id) {
                results.push((code, events));
            }
        }
        results
    }

    /// Flip a member's ready flag, possibly starting the game.
    ///
    /// # Errors
    ///
    /// - `RoomError::RoomNotFound` for an unknown code
    pub fn toggle_ready(
        &mut self,
        code: &str,
        user_id: u64,
        tracks: &impl TrackSource,
        now: I,
        wall_ms: u64,
    ) -> Result<Vec<RoomEvent>, RoomError> {
        let room =
            self.rooms.get_mut(code).ok_or_else(|| RoomError::RoomNotFound(code.to_string()))?;
        Ok(room.toggle_ready(user_id, tracks, now, wall_ms))
    }

    /// Submit an answer for a room's active round.
    ///
    /// # Errors
    ///
    /// - `RoomError::RoomNotFound` for an unknown code
    pub fn submit_answer(
        &mut self,
        code: &str,
        user_id: u64,
        answer: &str,
        now: I,
    ) -> Result<Vec<RoomEvent>, RoomError> {
        let room =
            self.rooms.get_mut(code).ok_or_else(|| RoomError::RoomNotFound(code.to_string()))?;
        Ok(room.submit_answer(user_id, answer, now))
    }

    /// Authoritative snapshot of a room.
    ///
    /// # Errors
    ///
    /// - `RoomError::RoomNotFound` for an unknown code
    pub fn snapshot(&self, code: &str) -> Result<RoomSnapshot, RoomError> {
        self.rooms
            .get(code)
            .map(GameRoom::snapshot)
            .ok_or_else(|| RoomError::RoomNotFound(code.to_string()))
    }

    /// Advance every room's timers.
    pub fn tick(
        &mut self,
        tracks: &impl TrackSource,
        now: I,
        wall_ms: u64,
    ) -> Vec<(String, Vec<RoomEvent>)> {
        let mut results = Vec::new();
        for (code, room) in &mut self.rooms {
            let events = room.tick(tracks, now, wall_ms);
            if !events.is_empty() {
                results.push((code.clone(), events));
            }
        }
        results
    }

    /// Delete rooms with no members.
    ///
    /// Idempotent and safe to call redundantly; the explicit leave path
    /// already deletes emptied rooms, so this is a backstop.
    pub fn cleanup(&mut self) {
        self.rooms.retain(|_, room| room.member_count() > 0);
    }
}

/// Render a random value as a 6-character lowercase base-36 code.
fn room_code(mut value: u64) -> String {
    let mut code = String::with_capacity(CODE_LEN);
    for _ in 0..CODE_LEN {
        let index = (value % CODE_ALPHABET.len() as u64) as usize;
        code.push(CODE_ALPHABET[index] as char);
        value /= CODE_ALPHABET.len() as u64;
    }
    code
}

fn membership_of<I>(room: &GameRoom<I>) -> RoomEvent
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    let snapshot = room.snapshot();
    RoomEvent::Membership(songclash_proto::UserList {
        room: snapshot.room,
        users: snapshot.users,
        host_id: snapshot.host_id,
    })
}

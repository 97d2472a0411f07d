//! Client state machine.
//!
//! Holds the local view of the joined room and reconciles it against
//! server-broadcast truth. Round-scoped events all carry their round
//! number; the `RoundLedger` is the single source of truth for duplicate
//! suppression - a `roundEnd` or `gameEnd` whose round was already
//! processed is discarded no matter how it arrived (direct push, replay, or
//! post-reconnect straggler).
//!
//! On reconnect the client never replays history: it requests the
//! authoritative room snapshot and replaces its view wholesale.

use std::collections::{BTreeMap, HashSet};

use songclash_proto::{
    ErrorPayload, Frame, FrameHeader, Participant, Payload, RoomPhase, RoomRef, RoomSnapshot,
    RoundInfo, SubmitAnswer, UserProfile,
};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent, RoomNotice},
};

/// Local view of the joined room.
#[derive(Debug, Clone)]
pub struct LocalRoom {
    /// Room code
    pub code: String,
    /// Members in join order
    pub users: Vec<Participant>,
    /// Current host
    pub host_id: u64,
    /// Macro state
    pub phase: RoomPhase,
    /// Current round number
    pub current_round: u32,
    /// Rounds per game
    pub total_rounds: u32,
    /// The active round, if any
    pub round: Option<RoundInfo>,
    /// Scoreboard keyed by user id
    pub scores: BTreeMap<u64, u32>,
}

impl LocalRoom {
    fn from_snapshot(snapshot: RoomSnapshot) -> Self {
        Self {
            code: snapshot.room,
            users: snapshot.users,
            host_id: snapshot.host_id,
            phase: snapshot.phase,
            current_round: snapshot.current_round,
            total_rounds: snapshot.total_rounds,
            round: snapshot.round,
            scores: snapshot.scores,
        }
    }
}

/// Which room the client is waiting to enter.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    /// createRoom sent; adopt whichever membership list comes back
    Create,
    /// joinRoom sent; adopt only the matching room
    Join(String),
}

/// Per-round processed ledger.
///
/// The sole deduplication mechanism for round-scoped events. Entries for
/// rounds older than the current one are pruned on round start; everything
/// resets when a new game's round 1 begins.
#[derive(Debug, Default)]
struct RoundLedger {
    ends: HashSet<u32>,
    game_end: bool,
}

impl RoundLedger {
    /// Round `number` is starting: prune stale entries, reset on new game.
    fn begin_round(&mut self, number: u32) {
        if number == 1 {
            self.ends.clear();
            self.game_end = false;
        } else {
            self.ends.retain(|r| *r >= number);
        }
    }

    fn end_processed(&self, number: u32) -> bool {
        self.ends.contains(&number)
    }

    fn mark_end(&mut self, number: u32) {
        self.ends.insert(number);
    }

    fn game_end_processed(&self) -> bool {
        self.game_end
    }

    fn mark_game_end(&mut self) {
        self.game_end = true;
    }

    fn reset(&mut self) {
        self.ends.clear();
        self.game_end = false;
    }
}

/// Sans-IO client state machine.
#[derive(Debug, Default)]
pub struct Client {
    profile: Option<UserProfile>,
    session_id: Option<u64>,
    room: Option<LocalRoom>,
    pending: Option<Pending>,
    ledger: RoundLedger,
}

impl Client {
    /// Create a client with no room joined.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity resolved by the server, once the handshake completed.
    #[must_use]
    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    /// Server-assigned session id, once the handshake completed.
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Local view of the joined room.
    #[must_use]
    pub fn room(&self) -> Option<&LocalRoom> {
        self.room.as_ref()
    }

    /// Whether this client is the current host.
    #[must_use]
    pub fn is_host(&self) -> bool {
        match (&self.room, &self.profile) {
            (Some(room), Some(profile)) => room.host_id == profile.user_id,
            _ => false,
        }
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotInRoom` for room intents with no room joined
    /// - `ClientError::InvalidFrame` for undecodable frames
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::FrameReceived(frame) => self.handle_frame(&frame),
            ClientEvent::CreateRoom => {
                self.pending = Some(Pending::Create);
                Ok(vec![send(Payload::CreateRoom)?])
            },
            ClientEvent::JoinRoom { room } => {
                self.pending = Some(Pending::Join(room.clone()));
                Ok(vec![send(Payload::JoinRoom(RoomRef { room }))?])
            },
            ClientEvent::LeaveRoom => {
                let room = self.room.take().ok_or(ClientError::NotInRoom)?;
                self.ledger.reset();
                self.pending = None;
                Ok(vec![send(Payload::LeaveRoom(RoomRef { room: room.code }))?])
            },
            ClientEvent::ToggleReady => {
                let room = self.room.as_ref().ok_or(ClientError::NotInRoom)?;
                Ok(vec![send(Payload::ToggleReady(RoomRef { room: room.code.clone() }))?])
            },
            ClientEvent::SubmitAnswer { answer } => {
                let room = self.room.as_ref().ok_or(ClientError::NotInRoom)?;
                Ok(vec![send(Payload::SubmitAnswer(SubmitAnswer {
                    room: room.code.clone(),
                    answer,
                }))?])
            },
            ClientEvent::Reconnected => {
                let Some(room) = self.room.as_ref() else {
                    return Ok(vec![]);
                };
                Ok(vec![send(Payload::SnapshotRequest(RoomRef { room: room.code.clone() }))?])
            },
        }
    }

    fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<ClientAction>, ClientError> {
        let payload = Payload::from_frame(frame)?;

        match payload {
            Payload::HelloReply(reply) => {
                self.session_id = Some(reply.session_id);
                self.profile = Some(reply.profile);
                Ok(vec![])
            },

            // Server heartbeats are answered here; the rest of the session
            // layer is the transport's concern
            Payload::Ping => Ok(vec![send(Payload::Pong)?]),
            Payload::Hello(_) | Payload::Pong | Payload::Goodbye(_) => Ok(vec![]),

            Payload::UserList(list) => Ok(self.apply_user_list(list)),
            Payload::UserReady(ready) => Ok(self.apply_user_ready(&ready)),
            Payload::RoundStart(start) => Ok(self.apply_round_start(start)),
            Payload::RoundEnd(end) => Ok(self.apply_round_end(end)),
            Payload::GameEnd(end) => Ok(self.apply_game_end(&end)),
            Payload::Snapshot(snapshot) => Ok(self.apply_snapshot(snapshot)),
            Payload::Error(error) => Ok(self.apply_error(&error)),

            // Client-to-server intents echoed back make no sense
            _ => Err(ClientError::InvalidFrame {
                reason: format!("unexpected opcode {:#06x}", frame.header.opcode()),
            }),
        }
    }

    fn apply_user_list(&mut self, list: songclash_proto::UserList) -> Vec<ClientAction> {
        let adopt = match (&self.room, &self.pending) {
            (Some(room), _) => room.code == list.room,
            (None, Some(Pending::Create)) => true,
            (None, Some(Pending::Join(code))) => *code == list.room,
            (None, None) => false,
        };

        if !adopt {
            return vec![ClientAction::Log {
                message: format!("ignoring userList for foreign room {}", list.room),
            }];
        }

        match self.room.as_mut() {
            Some(room) => {
                room.users = list.users;
                room.host_id = list.host_id;
            },
            None => {
                self.pending = None;
                self.ledger.reset();
                self.room = Some(LocalRoom {
                    code: list.room,
                    users: list.users,
                    host_id: list.host_id,
                    phase: RoomPhase::Waiting,
                    current_round: 1,
                    total_rounds: 5,
                    round: None,
                    scores: BTreeMap::new(),
                });
            },
        }

        vec![ClientAction::Notify(RoomNotice::RoomUpdated)]
    }

    fn apply_user_ready(&mut self, ready: &songclash_proto::UserReady) -> Vec<ClientAction> {
        let Some(room) = self.room.as_mut() else {
            return vec![];
        };

        if let Some(user) = room.users.iter_mut().find(|u| u.user_id == ready.user_id) {
            user.ready = ready.ready;
        }

        vec![ClientAction::Notify(RoomNotice::ReadyChanged {
            user_id: ready.user_id,
            ready: ready.ready,
        })]
    }

    fn apply_round_start(&mut self, start: songclash_proto::RoundStart) -> Vec<ClientAction> {
        let Some(room) = self.room.as_mut() else {
            return vec![];
        };
        if room.code != start.room {
            return vec![];
        }

        // A stale start for a round that already ended (or an older round)
        // must not roll the view backwards
        if start.round > 1 && start.round < room.current_round {
            return vec![ClientAction::Log {
                message: format!("discarding stale roundStart for round {}", start.round),
            }];
        }
        if self.ledger.end_processed(start.round) {
            return vec![ClientAction::Log {
                message: format!("discarding roundStart for processed round {}", start.round),
            }];
        }

        self.ledger.begin_round(start.round);

        room.phase = RoomPhase::RoundActive;
        room.current_round = start.round;
        room.round = Some(RoundInfo {
            number: start.round,
            track: start.track.clone(),
            started_at_ms: start.started_at_ms,
            ends_at_ms: start.ends_at_ms,
        });

        vec![ClientAction::Notify(RoomNotice::RoundStarted {
            round: start.round,
            track: start.track,
            ends_at_ms: start.ends_at_ms,
        })]
    }

    fn apply_round_end(&mut self, end: songclash_proto::RoundEnd) -> Vec<ClientAction> {
        let Some(room) = self.room.as_mut() else {
            return vec![];
        };
        if room.code != end.room {
            return vec![];
        }

        // Stale result for a round the view has already moved past
        if end.round < room.current_round {
            return vec![ClientAction::Log {
                message: format!("discarding stale roundEnd for round {}", end.round),
            }];
        }

        if self.ledger.end_processed(end.round) {
            return vec![ClientAction::Log {
                message: format!("discarding duplicate roundEnd for round {}", end.round),
            }];
        }
        self.ledger.mark_end(end.round);

        room.phase = RoomPhase::RoundResolved;
        room.current_round = end.round;
        room.round = None;
        for user in &mut room.users {
            if let Some(score) = end.scores.get(&user.user_id) {
                user.score = *score;
            }
        }
        room.scores = end.scores;

        vec![ClientAction::Notify(RoomNotice::RoundEnded {
            round: end.round,
            correct_answer: end.correct_answer,
            winner_id: end.winner_id,
        })]
    }

    fn apply_game_end(&mut self, end: &songclash_proto::GameEnd) -> Vec<ClientAction> {
        let Some(room) = self.room.as_mut() else {
            return vec![];
        };
        if room.code != end.room {
            return vec![];
        }

        if self.ledger.game_end_processed() {
            return vec![ClientAction::Log {
                message: "discarding duplicate gameEnd".to_string(),
            }];
        }
        self.ledger.mark_game_end();

        room.phase = RoomPhase::Waiting;
        room.current_round = 1;
        room.round = None;
        room.scores = end.scores.clone();
        for user in &mut room.users {
            user.ready = false;
        }

        vec![ClientAction::Notify(RoomNotice::GameEnded { winner_id: end.winner_id })]
    }

    /// Reconcile wholesale from the authoritative snapshot.
    ///
    /// Never diffs events: the snapshot replaces the local view. When the
    /// snapshot shows this client is no longer a member, the room is gone
    /// from our perspective.
    fn apply_snapshot(&mut self, snapshot: RoomSnapshot) -> Vec<ClientAction> {
        let relevant = self.room.as_ref().is_some_and(|room| room.code == snapshot.room);
        if !relevant {
            return vec![];
        }

        let still_member = self
            .profile
            .as_ref()
            .is_some_and(|p| snapshot.users.iter().any(|u| u.user_id == p.user_id));

        if !still_member {
            self.room = None;
            self.ledger.reset();
            return vec![ClientAction::Notify(RoomNotice::RoomClosed)];
        }

        // A snapshot taken after the round resolved already reflects its
        // outcome; suppress a late replay of that roundEnd
        if snapshot.phase == RoomPhase::RoundResolved {
            self.ledger.mark_end(snapshot.current_round);
        }

        self.room = Some(LocalRoom::from_snapshot(snapshot));

        vec![ClientAction::Notify(RoomNotice::RoomUpdated)]
    }

    fn apply_error(&mut self, error: &ErrorPayload) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        if error.code == ErrorPayload::ROOM_NOT_FOUND {
            self.pending = None;

            // Only one room is ever tracked; if the server no longer knows
            // it, the local view is stale
            if self.room.take().is_some() {
                self.ledger.reset();
                actions.push(ClientAction::Notify(RoomNotice::RoomClosed));
            }
        }

        actions.push(ClientAction::Notify(RoomNotice::ServerError {
            code: error.code,
            message: error.message.clone(),
        }));

        actions
    }
}

fn send(payload: Payload) -> Result<ClientAction, ClientError> {
    let opcode = payload.opcode();
    let frame = payload.into_frame(FrameHeader::new(opcode))?;
    Ok(ClientAction::Send(frame))
}

//! Server driver.
//!
//! Ties together the session state machines, the `ConnectionRegistry`, and
//! the `RoomStore`. Sans-IO: the driver processes one [`ServerEvent`] at a
//! time and returns [`ServerAction`]s for the runtime to execute. All state
//! lives here and every mutation is serialized through `process_event`, so
//! per-room mutual exclusion holds by construction and no I/O ever happens
//! under the driver's control.
//!
//! Broadcast actions carry their resolved recipient sessions, so the
//! executor needs no further access to the driver - sends happen strictly
//! after the driver releases control and cannot block the state machine.

use std::collections::HashMap;

use songclash_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, env::Environment,
};
use songclash_proto::{ErrorPayload, Frame, FrameHeader, Hello, Opcode, Payload};

use crate::{
    collab::{Directory, ScoreSink, TrackSource},
    error::ServerError,
    registry::ConnectionRegistry,
    room::{RoomError, RoomEvent},
    store::RoomStore,
};

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Session-layer configuration (timeouts, heartbeat interval)
    pub connection: ConnectionConfig,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { connection: ConnectionConfig::default(), max_connections: 10_000 }
    }
}

/// Events the server driver processes.
///
/// Produced by the runtime (production transport or simulation harness).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique session id assigned by the runtime
        session_id: u64,
    },

    /// A frame was received from a connection
    FrameReceived {
        /// Session that sent the frame
        session_id: u64,
        /// The received frame
        frame: Frame,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Session that was closed
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Periodic tick driving timeouts and room timers
    Tick,
}

/// Actions the server driver produces.
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Send a frame to a specific session
    SendToSession {
        /// Target session id
        session_id: u64,
        /// Frame to send
        frame: Frame,
    },

    /// Send a frame to every listed session.
    ///
    /// Recipients are resolved by the driver; delivery is best-effort and
    /// not retried - a dropped connection reconciles via the snapshot path.
    Broadcast {
        /// Resolved recipient sessions
        sessions: Vec<u64>,
        /// Frame to send
        frame: Frame,
    },

    /// Close a connection
    CloseConnection {
        /// Session to close
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for driver actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based server driver.
///
/// Generic over the environment (virtual time in tests) and the three
/// external collaborators: identity directory, track source, score sink.
pub struct ServerDriver<E, D, T, K>
where
    E: Environment,
    D: Directory,
    T: TrackSource,
    K: ScoreSink,
{
    /// Session state machines (session id → connection)
    connections: HashMap<u64, Connection<E::Instant>>,
    /// Session/identity registry
    registry: ConnectionRegistry,
    /// Authoritative room table
    store: RoomStore<E::Instant>,
    /// Identity lookup
    directory: D,
    /// Round subjects
    tracks: T,
    /// Score persistence, invoked once per participant at game end
    scores: K,
    /// Environment (time, RNG)
    env: E,
    /// Driver configuration
    config: ServerConfig,
}

impl<E, D, T, K> ServerDriver<E, D, T, K>
where
    E: Environment,
    D: Directory,
    T: TrackSource,
    K: ScoreSink,
{
    /// Create a new server driver.
    pub fn new(env: E, directory: D, tracks: T, scores: K, config: ServerConfig) -> Self {
        Self {
            connections: HashMap::new(),
            registry: ConnectionRegistry::new(),
            store: RoomStore::new(),
            directory,
            tracks,
            scores,
            env,
            config,
        }
    }

    /// Process a server event and return actions to execute.
    ///
    /// The main entry point; the runtime feeds every event through here.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                Ok(self.handle_connection_accepted(session_id))
            },
            ServerEvent::FrameReceived { session_id, frame } => {
                self.handle_frame_received(session_id, frame)
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                Ok(self.handle_connection_closed(session_id, &reason))
            },
            ServerEvent::Tick => Ok(self.handle_tick()),
        }
    }

    /// Number of active connections. Health surface.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live rooms. Health surface.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.store.room_count()
    }

    /// Whether a room exists.
    #[must_use]
    pub fn has_room(&self, code: &str) -> bool {
        self.store.has_room(code)
    }

    /// Read access to the room table, for tests and assertions.
    #[must_use]
    pub fn store(&self) -> &RoomStore<E::Instant> {
        &self.store
    }

    /// Session id for a user, if connected and authenticated.
    #[must_use]
    pub fn session_for_user(&self, user_id: u64) -> Option<u64> {
        self.registry.session_for_user(user_id)
    }

    fn handle_connection_accepted(&mut self, session_id: u64) -> Vec<ServerAction> {
        if self.connections.len() >= self.config.max_connections {
            return vec![ServerAction::CloseConnection {
                session_id,
                reason: "max connections exceeded".to_string(),
            }];
        }

        let now = self.env.now();
        let mut conn = Connection::new(now, self.config.connection.clone());
        conn.set_session_id(session_id);

        self.connections.insert(session_id, conn);
        self.registry.register(session_id);

        vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("connection accepted, session_id={session_id}"),
        }]
    }

    fn handle_frame_received(
        &mut self,
        session_id: u64,
        frame: Frame,
    ) -> Result<Vec<ServerAction>, ServerError> {
        if !self.connections.contains_key(&session_id) {
            return Err(ServerError::SessionNotFound(session_id));
        }

        match frame.header.opcode_enum() {
            Some(Opcode::Hello) => Ok(self.handle_hello(session_id, &frame)),

            Some(Opcode::Ping | Opcode::Pong | Opcode::Goodbye | Opcode::HelloReply) => {
                Ok(self.handle_session_frame(session_id, &frame))
            },

            Some(
                Opcode::CreateRoom
                | Opcode::JoinRoom
                | Opcode::LeaveRoom
                | Opcode::ToggleReady
                | Opcode::SubmitAnswer
                | Opcode::SnapshotRequest,
            ) => Ok(self.handle_room_intent(session_id, &frame)),

            Some(_) => {
                // Server-to-client opcodes from a client: reject, keep the
                // connection
                Ok(vec![
                    self.error_to(session_id, &ErrorPayload::invalid_payload("unexpected opcode")),
                    ServerAction::Log {
                        level: LogLevel::Warn,
                        message: format!(
                            "session {session_id} sent server-side opcode {:#06x}",
                            frame.header.opcode()
                        ),
                    },
                ])
            },

            None => Ok(vec![ServerAction::CloseConnection {
                session_id,
                reason: format!("unknown opcode {:#06x}", frame.header.opcode()),
            }]),
        }
    }

    /// Handshake: resolve the identity token and reply.
    ///
    /// A missing or unresolvable token is fatal to the connection: the
    /// requester gets an auth error frame and is disconnected.
    fn handle_hello(&mut self, session_id: u64, frame: &Frame) -> Vec<ServerAction> {
        let now = self.env.now();

        let hello: Hello = match Payload::from_frame(frame) {
            Ok(Payload::Hello(hello)) => hello,
            Ok(_) | Err(_) => {
                return vec![
                    self.error_to(session_id, &ErrorPayload::invalid_payload("malformed Hello")),
                    ServerAction::CloseConnection {
                        session_id,
                        reason: "malformed Hello".to_string(),
                    },
                ];
            },
        };

        if hello.version != FrameHeader::VERSION {
            return vec![ServerAction::CloseConnection {
                session_id,
                reason: format!("unsupported protocol version {}", hello.version),
            }];
        }

        let profile = hello.token.as_deref().and_then(|token| self.directory.resolve(token));

        let Some(profile) = profile else {
            return vec![
                self.error_to(session_id, &ErrorPayload::auth_required()),
                ServerAction::CloseConnection {
                    session_id,
                    reason: "authentication required".to_string(),
                },
            ];
        };

        let Some(conn) = self.connections.get_mut(&session_id) else {
            return Vec::new();
        };

        if let Err(e) = conn.authenticate(now) {
            return vec![ServerAction::CloseConnection { session_id, reason: e.to_string() }];
        }

        self.registry.authenticate(session_id, profile.clone());

        let user_id = profile.user_id;
        let reply = Payload::HelloReply(songclash_proto::HelloReply { session_id, profile });

        let mut actions = Vec::new();
        match reply.into_frame(FrameHeader::new(Opcode::HelloReply)) {
            Ok(frame) => actions.push(ServerAction::SendToSession { session_id, frame }),
            Err(e) => actions.push(ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode HelloReply: {e}"),
            }),
        }

        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("session {session_id} authenticated as user {user_id}"),
        });

        actions
    }

    fn handle_session_frame(&mut self, session_id: u64, frame: &Frame) -> Vec<ServerAction> {
        let now = self.env.now();

        let Some(conn) = self.connections.get_mut(&session_id) else {
            return Vec::new();
        };

        match conn.handle_frame(frame, now) {
            Ok(conn_actions) => map_connection_actions(session_id, conn_actions),
            Err(e) => vec![ServerAction::CloseConnection { session_id, reason: e.to_string() }],
        }
    }

    fn handle_room_intent(&mut self, session_id: u64, frame: &Frame) -> Vec<ServerAction> {
        let now = self.env.now();
        let wall_ms = self.env.wall_clock_ms();

        let Some(conn) = self.connections.get_mut(&session_id) else {
            return Vec::new();
        };

        if conn.state() != ConnectionState::Authenticated {
            return vec![ServerAction::CloseConnection {
                session_id,
                reason: "room intent before handshake".to_string(),
            }];
        }
        conn.update_activity(now);

        let Some(profile) = self.registry.session(session_id).and_then(|i| i.profile.clone())
        else {
            return vec![ServerAction::CloseConnection {
                session_id,
                reason: "no identity bound to session".to_string(),
            }];
        };

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => {
                return vec![
                    self.error_to(session_id, &ErrorPayload::invalid_payload(e.to_string())),
                    ServerAction::Log {
                        level: LogLevel::Warn,
                        message: format!("session {session_id} sent undecodable intent: {e}"),
                    },
                ];
            },
        };

        let user_id = profile.user_id;

        match payload {
            Payload::CreateRoom => {
                let (code, events) = self.store.create_room(&self.env, profile);
                let mut actions = self.room_actions(&code, &events);
                actions.push(ServerAction::Log {
                    level: LogLevel::Info,
                    message: format!("room {code} created by user {user_id}"),
                });
                actions
            },

            Payload::JoinRoom(room_ref) => {
                match self.store.join_room(&room_ref.room, profile) {
                    Ok(events) => self.room_actions(&room_ref.room, &events),
                    Err(e) => self.room_error_to(session_id, &e),
                }
            },

            Payload::LeaveRoom(room_ref) => {
                match self.store.leave_room(&room_ref.room, user_id) {
                    Ok(events) => self.room_actions(&room_ref.room, &events),
                    Err(e) => self.room_error_to(session_id, &e),
                }
            },

            Payload::ToggleReady(room_ref) => {
                match self.store.toggle_ready(&room_ref.room, user_id, &self.tracks, now, wall_ms)
                {
                    Ok(events) => self.room_actions(&room_ref.room, &events),
                    Err(e) => self.room_error_to(session_id, &e),
                }
            },

            Payload::SubmitAnswer(submit) => {
                match self.store.submit_answer(&submit.room, user_id, &submit.answer, now) {
                    Ok(events) => self.room_actions(&submit.room, &events),
                    Err(e) => self.room_error_to(session_id, &e),
                }
            },

            Payload::SnapshotRequest(room_ref) => match self.store.snapshot(&room_ref.room) {
                Ok(snapshot) => {
                    send_payload_to(session_id, Payload::Snapshot(snapshot), Opcode::Snapshot)
                },
                Err(e) => self.room_error_to(session_id, &e),
            },

            _ => vec![
                self.error_to(session_id, &ErrorPayload::invalid_payload("unexpected payload")),
            ],
        }
    }

    fn handle_connection_closed(&mut self, session_id: u64, reason: &str) -> Vec<ServerAction> {
        let mut actions = Vec::new();

        if let Some(mut conn) = self.connections.remove(&session_id) {
            conn.close();
        }

        // Idempotent: a repeated close notification finds no registry entry
        // and runs no membership cleanup
        let Some(info) = self.registry.unregister(session_id) else {
            return vec![ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("session {session_id} already unregistered"),
            }];
        };

        if let Some(user_id) = info.user_id() {
            let departures = self.store.leave_everywhere(user_id);
            for (code, events) in &departures {
                actions.extend(self.room_actions(code, events));
            }
        }
        self.store.cleanup();

        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("session {session_id} closed: {reason}"),
        });

        actions
    }

    fn handle_tick(&mut self) -> Vec<ServerAction> {
        let now = self.env.now();
        let wall_ms = self.env.wall_clock_ms();
        let mut actions = Vec::new();

        for (session_id, conn) in &mut self.connections {
            let conn_actions = conn.tick(now);
            actions.extend(map_connection_actions(*session_id, conn_actions));
        }

        let due = self.store.tick(&self.tracks, now, wall_ms);
        for (code, events) in &due {
            actions.extend(self.room_actions(code, events));
        }

        actions
    }

    /// Turn room events into broadcast actions.
    ///
    /// Recipients are the room's current members with a live session,
    /// resolved now so the executor never needs the driver. Game-end events
    /// also feed the score sink, once per participant.
    fn room_actions(&self, code: &str, events: &[RoomEvent]) -> Vec<ServerAction> {
        if events.is_empty() {
            return Vec::new();
        }

        let sessions: Vec<u64> = self
            .store
            .room(code)
            .map(|room| {
                room.member_ids().filter_map(|uid| self.registry.session_for_user(uid)).collect()
            })
            .unwrap_or_default();

        let mut actions = Vec::new();

        for event in events {
            let payload = match event {
                RoomEvent::Membership(list) => Payload::UserList(list.clone()),
                RoomEvent::Ready(ready) => Payload::UserReady(ready.clone()),
                RoomEvent::RoundStarted(start) => Payload::RoundStart(start.clone()),
                RoomEvent::RoundEnded(end) => Payload::RoundEnd(end.clone()),
                RoomEvent::GameEnded(end) => {
                    for (user_id, score) in &end.scores {
                        self.scores.record(*user_id, *score);
                    }
                    Payload::GameEnd(end.clone())
                },
            };

            let opcode = payload.opcode();
            match payload.into_frame(FrameHeader::new(opcode)) {
                Ok(frame) => {
                    actions.push(ServerAction::Broadcast { sessions: sessions.clone(), frame });
                },
                Err(e) => actions.push(ServerAction::Log {
                    level: LogLevel::Error,
                    message: format!("failed to encode {opcode:?} broadcast: {e}"),
                }),
            }
        }

        actions
    }

    fn error_to(&self, session_id: u64, error: &ErrorPayload) -> ServerAction {
        let payload = Payload::Error(error.clone());
        match payload.into_frame(FrameHeader::new(Opcode::Error)) {
            Ok(frame) => ServerAction::SendToSession { session_id, frame },
            Err(e) => ServerAction::Log {
                level: LogLevel::Error,
                message: format!("failed to encode error response: {e}"),
            },
        }
    }

    /// Map a room error to a requester-only error frame. The room itself is
    /// untouched and no other session hears about it.
    fn room_error_to(&self, session_id: u64, error: &RoomError) -> Vec<ServerAction> {
        let payload = match error {
            RoomError::RoomNotFound(code) => ErrorPayload::room_not_found(code),
            RoomError::GameAlreadyStarted(code) => ErrorPayload::game_already_started(code),
            RoomError::RoomFull(code) => ErrorPayload::room_full(code),
        };

        vec![self.error_to(session_id, &payload), ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("session {session_id}: {error}"),
        }]
    }
}

impl<E, D, T, K> std::fmt::Debug for ServerDriver<E, D, T, K>
where
    E: Environment,
    D: Directory,
    T: TrackSource,
    K: ScoreSink,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("connection_count", &self.connections.len())
            .field("room_count", &self.store.room_count())
            .finish()
    }
}

fn map_connection_actions(session_id: u64, actions: Vec<ConnectionAction>) -> Vec<ServerAction> {
    actions
        .into_iter()
        .map(|action| match action {
            ConnectionAction::SendFrame(frame) => ServerAction::SendToSession { session_id, frame },
            ConnectionAction::Close { reason } => {
                ServerAction::CloseConnection { session_id, reason }
            },
        })
        .collect()
}

fn send_payload_to(session_id: u64, payload: Payload, opcode: Opcode) -> Vec<ServerAction> {
    match payload.into_frame(FrameHeader::new(opcode)) {
        Ok(frame) => vec![ServerAction::SendToSession { session_id, frame }],
        Err(e) => vec![ServerAction::Log {
            level: LogLevel::Error,
            message: format!("failed to encode {opcode:?}: {e}"),
        }],
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use songclash_proto::{RoomRef, UserProfile};

    use super::*;
    use crate::collab::{MemoryDirectory, MemoryScoreSink, NullScoreSink, PlaylistSource};

    /// Test environment with a manually advanced clock shared between the
    /// test and the driver's clone.
    #[derive(Clone)]
    struct TestEnv {
        start: Instant,
        offset_ms: std::sync::Arc<std::sync::atomic::AtomicU64>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                offset_ms: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0)),
            }
        }

        fn advance(&self, duration: Duration) {
            self.offset_ms
                .fetch_add(duration.as_millis() as u64, std::sync::atomic::Ordering::SeqCst);
        }

        fn offset(&self) -> u64 {
            self.offset_ms.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.start + Duration::from_millis(self.offset())
        }

        fn wall_clock_ms(&self) -> u64 {
            1_700_000_000_000 + self.offset()
        }

        fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            // Deterministic for tests
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = i as u8 + 7;
            }
        }
    }

    type TestDriver = ServerDriver<TestEnv, MemoryDirectory, PlaylistSource, NullScoreSink>;

    fn driver() -> TestDriver {
        let directory = MemoryDirectory::new()
            .with_user("tok-a", profile(1))
            .with_user("tok-b", profile(2));
        ServerDriver::new(
            TestEnv::new(),
            directory,
            PlaylistSource::demo(),
            NullScoreSink,
            ServerConfig::default(),
        )
    }

    fn profile(id: u64) -> UserProfile {
        UserProfile { user_id: id, name: format!("user-{id}"), icon: 0 }
    }

    fn hello_frame(token: &str) -> Frame {
        Payload::Hello(Hello { version: FrameHeader::VERSION, token: Some(token.to_string()) })
            .into_frame(FrameHeader::new(Opcode::Hello))
            .unwrap()
    }

    fn connect_and_auth<K: ScoreSink>(
        driver: &mut ServerDriver<TestEnv, MemoryDirectory, PlaylistSource, K>,
        session_id: u64,
        token: &str,
    ) {
        driver.process_event(ServerEvent::ConnectionAccepted { session_id }).unwrap();
        let actions = driver
            .process_event(ServerEvent::FrameReceived { session_id, frame: hello_frame(token) })
            .unwrap();
        assert!(
            actions.iter().any(|a| matches!(a, ServerAction::SendToSession { frame, .. }
                if frame.header.opcode_enum() == Some(Opcode::HelloReply))),
            "expected HelloReply, got {actions:?}"
        );
    }

    /// Create a room through the driver and return its code.
    fn create_room<K: ScoreSink>(
        driver: &mut ServerDriver<TestEnv, MemoryDirectory, PlaylistSource, K>,
        session_id: u64,
    ) -> String {
        let frame =
            Payload::CreateRoom.into_frame(FrameHeader::new(Opcode::CreateRoom)).unwrap();
        let actions =
            driver.process_event(ServerEvent::FrameReceived { session_id, frame }).unwrap();

        actions
            .iter()
            .find_map(|a| match a {
                ServerAction::Broadcast { frame, .. } => match Payload::from_frame(frame) {
                    Ok(Payload::UserList(list)) => Some(list.room),
                    _ => None,
                },
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn accepts_and_counts_connections() {
        let mut driver = driver();

        driver.process_event(ServerEvent::ConnectionAccepted { session_id: 1 }).unwrap();
        assert_eq!(driver.connection_count(), 1);

        driver
            .process_event(ServerEvent::ConnectionClosed {
                session_id: 1,
                reason: "client disconnect".to_string(),
            })
            .unwrap();
        assert_eq!(driver.connection_count(), 0);
    }

    #[test]
    fn rejects_when_max_connections_exceeded() {
        let directory = MemoryDirectory::new();
        let config = ServerConfig { max_connections: 2, ..Default::default() };
        let mut driver = ServerDriver::new(
            TestEnv::new(),
            directory,
            PlaylistSource::demo(),
            NullScoreSink,
            config,
        );

        driver.process_event(ServerEvent::ConnectionAccepted { session_id: 1 }).unwrap();
        driver.process_event(ServerEvent::ConnectionAccepted { session_id: 2 }).unwrap();

        let actions =
            driver.process_event(ServerEvent::ConnectionAccepted { session_id: 3 }).unwrap();
        assert_eq!(driver.connection_count(), 2);
        assert!(matches!(actions[0], ServerAction::CloseConnection { session_id: 3, .. }));
    }

    #[test]
    fn hello_without_token_is_fatal() {
        let mut driver = driver();
        driver.process_event(ServerEvent::ConnectionAccepted { session_id: 1 }).unwrap();

        let frame = Payload::Hello(Hello { version: FrameHeader::VERSION, token: None })
            .into_frame(FrameHeader::new(Opcode::Hello))
            .unwrap();
        let actions =
            driver.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();

        // Auth error to the requester, then the connection is closed
        assert!(actions.iter().any(|a| matches!(a, ServerAction::SendToSession { frame, .. }
            if frame.header.opcode_enum() == Some(Opcode::Error))));
        assert!(
            actions.iter().any(|a| matches!(a, ServerAction::CloseConnection { .. })),
            "missing token must terminate the connection"
        );
    }

    #[test]
    fn hello_with_unknown_token_is_fatal() {
        let mut driver = driver();
        driver.process_event(ServerEvent::ConnectionAccepted { session_id: 1 }).unwrap();

        let actions = driver
            .process_event(ServerEvent::FrameReceived {
                session_id: 1,
                frame: hello_frame("tok-unknown"),
            })
            .unwrap();
        assert!(actions.iter().any(|a| matches!(a, ServerAction::CloseConnection { .. })));
    }

    #[test]
    fn hello_resolves_identity_and_replies() {
        let mut driver = driver();
        connect_and_auth(&mut driver, 1, "tok-a");
        assert_eq!(driver.session_for_user(1), Some(1));
    }

    #[test]
    fn room_intent_before_handshake_closes_connection() {
        let mut driver = driver();
        driver.process_event(ServerEvent::ConnectionAccepted { session_id: 1 }).unwrap();

        let frame =
            Payload::CreateRoom.into_frame(FrameHeader::new(Opcode::CreateRoom)).unwrap();
        let actions =
            driver.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();

        assert!(matches!(actions[0], ServerAction::CloseConnection { .. }));
    }

    #[test]
    fn frame_from_unknown_session_errors() {
        let mut driver = driver();
        let frame = Payload::Ping.into_frame(FrameHeader::new(Opcode::Ping)).unwrap();

        let result = driver.process_event(ServerEvent::FrameReceived { session_id: 99, frame });
        assert!(matches!(result, Err(ServerError::SessionNotFound(99))));
    }

    #[test]
    fn create_room_broadcasts_membership() {
        let mut driver = driver();
        connect_and_auth(&mut driver, 1, "tok-a");

        let code = create_room(&mut driver, 1);
        assert!(driver.has_room(&code));
        assert_eq!(driver.room_count(), 1);
    }

    #[test]
    fn join_unknown_room_errors_requester_only() {
        let mut driver = driver();
        connect_and_auth(&mut driver, 1, "tok-a");

        let frame = Payload::JoinRoom(RoomRef { room: "zzzzzz".to_string() })
            .into_frame(FrameHeader::new(Opcode::JoinRoom))
            .unwrap();
        let actions =
            driver.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();

        let error_sends: Vec<_> = actions
            .iter()
            .filter(|a| matches!(a, ServerAction::SendToSession { session_id: 1, frame }
                if frame.header.opcode_enum() == Some(Opcode::Error)))
            .collect();
        assert_eq!(error_sends.len(), 1);
        assert!(!actions.iter().any(|a| matches!(a, ServerAction::Broadcast { .. })));
    }

    #[test]
    fn disconnect_twice_runs_cleanup_once() {
        let mut driver = driver();
        connect_and_auth(&mut driver, 1, "tok-a");
        connect_and_auth(&mut driver, 2, "tok-b");

        let code = create_room(&mut driver, 1);
        let join = Payload::JoinRoom(RoomRef { room: code.clone() })
            .into_frame(FrameHeader::new(Opcode::JoinRoom))
            .unwrap();
        driver.process_event(ServerEvent::FrameReceived { session_id: 2, frame: join }).unwrap();

        let first = driver
            .process_event(ServerEvent::ConnectionClosed {
                session_id: 1,
                reason: "drop".to_string(),
            })
            .unwrap();
        assert!(
            first.iter().any(|a| matches!(a, ServerAction::Broadcast { .. })),
            "departure must broadcast membership"
        );
        assert_eq!(driver.store().room(&code).unwrap().host_id(), 2, "host migrated");

        let second = driver
            .process_event(ServerEvent::ConnectionClosed {
                session_id: 1,
                reason: "drop again".to_string(),
            })
            .unwrap();
        assert!(
            !second.iter().any(|a| matches!(a, ServerAction::Broadcast { .. })),
            "repeated disconnect must be a no-op"
        );
        assert_eq!(driver.store().room(&code).unwrap().host_id(), 2);
    }

    #[test]
    fn snapshot_request_is_requester_only() {
        let mut driver = driver();
        connect_and_auth(&mut driver, 1, "tok-a");
        let code = create_room(&mut driver, 1);

        let frame = Payload::SnapshotRequest(RoomRef { room: code.clone() })
            .into_frame(FrameHeader::new(Opcode::SnapshotRequest))
            .unwrap();
        let actions =
            driver.process_event(ServerEvent::FrameReceived { session_id: 1, frame }).unwrap();

        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ServerAction::SendToSession { session_id: 1, frame } => {
                match Payload::from_frame(frame).unwrap() {
                    Payload::Snapshot(snapshot) => assert_eq!(snapshot.room, code),
                    other => unreachable!("expected Snapshot, got {other:?}"),
                }
            },
            other => unreachable!("expected SendToSession, got {other:?}"),
        }
    }

    #[test]
    fn game_end_feeds_score_sink_once_per_participant() {
        let directory = MemoryDirectory::new()
            .with_user("tok-a", profile(1))
            .with_user("tok-b", profile(2));
        let sink = std::sync::Arc::new(MemoryScoreSink::new());

        struct SharedSink(std::sync::Arc<MemoryScoreSink>);
        impl ScoreSink for SharedSink {
            fn record(&self, user_id: u64, score: u32) {
                self.0.record(user_id, score);
            }
        }

        let env = TestEnv::new();
        let tracks = PlaylistSource::new(vec![songclash_proto::Track {
            title: "Only Song".to_string(),
            preview_url: None,
        }]);
        let mut driver = ServerDriver::new(
            env.clone(),
            directory,
            tracks,
            SharedSink(std::sync::Arc::clone(&sink)),
            ServerConfig::default(),
        );

        connect_and_auth(&mut driver, 1, "tok-a");
        connect_and_auth(&mut driver, 2, "tok-b");
        let code = create_room(&mut driver, 1);

        let send = |driver: &mut TestSinkDriver, session_id: u64, payload: Payload| {
            let opcode = payload.opcode();
            let frame = payload.into_frame(FrameHeader::new(opcode)).unwrap();
            driver.process_event(ServerEvent::FrameReceived { session_id, frame }).unwrap()
        };
        type TestSinkDriver = ServerDriver<TestEnv, MemoryDirectory, PlaylistSource, SharedSink>;

        send(&mut driver, 2, Payload::JoinRoom(RoomRef { room: code.clone() }));
        send(&mut driver, 1, Payload::ToggleReady(RoomRef { room: code.clone() }));
        send(&mut driver, 2, Payload::ToggleReady(RoomRef { room: code.clone() }));

        // Session 2 wins all five rounds, advancing the grace timer by tick
        for round in 1..=5u32 {
            send(&mut driver, 2, Payload::SubmitAnswer(songclash_proto::SubmitAnswer {
                room: code.clone(),
                answer: "only song".to_string(),
            }));

            if round < 5 {
                env.advance(crate::room::ROUND_GRACE);
                driver.process_event(ServerEvent::Tick).unwrap();
            }
        }

        let records = sink.recorded();
        assert_eq!(records.len(), 2, "exactly one record per participant");
        assert!(records.contains(&(1, 0)));
        assert!(records.contains(&(2, 5)));
    }
}

//! Session layer state machine.
//!
//! Manages connection lifecycle, heartbeats, timeouts, and graceful
//! shutdown. Uses the action pattern: methods take time as input and return
//! actions for the driver to execute, which keeps the machine pure (no I/O)
//! and makes testing straightforward.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  Hello{token}  ┌─────────┐   HelloReply    ┌───────────────┐
//! │ Init │───────────────>│ Pending │────────────────>│ Authenticated │
//! └──────┘    (client)    └─────────┘    (client)     └───────────────┘
//!     │                        │                              │
//!     │ authenticate (server,  │ Timeout                      │ Goodbye/Timeout
//!     │ after token lookup)    ↓                              ↓
//!     │                   ┌────────┐                     ┌────────┐
//!     └──────────────────>│ Closed │<────────────────────│ Closed │
//!                         └────────┘                     └────────┘
//! ```
//!
//! The server does not complete the handshake inside this machine: identity
//! tokens are resolved by the driver's directory, which then calls
//! [`Connection::authenticate`]. Room-level frames (intents, events, errors)
//! are not session frames and pass through untouched.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use songclash_proto::{Frame, FrameHeader, Hello, Opcode, Payload};

use crate::error::ConnectionError;

/// Time allowed to complete the Hello/HelloReply handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time without any activity before the connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval at which Ping frames are sent while authenticated.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Close the connection with this reason
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handshake started
    Init,
    /// Hello sent, waiting for HelloReply (client only)
    Pending,
    /// Handshake complete
    Authenticated,
    /// Closed, gracefully or by error
    Closed,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for completing the handshake
    pub handshake_timeout: Duration,
    /// Idle timeout before disconnecting
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be well under `idle_timeout`)
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Session state machine for a single connection.
///
/// Pure state machine: no I/O, no environment storage. Time is passed as a
/// parameter. Generic over `Instant` to support virtual time in tests.
#[derive(Debug, Clone)]
pub struct Connection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: ConnectionState,
    config: ConnectionConfig,
    last_activity: I,
    last_heartbeat: Option<I>,
    session_id: Option<u64>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new connection in [`ConnectionState::Init`].
    pub fn new(now: I, config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Init,
            config,
            last_activity: now,
            last_heartbeat: None,
            session_id: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Session id. Assigned by the server; learned from HelloReply on the
    /// client. `None` before the handshake completes.
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Assign the session id (server use, before authentication).
    pub fn set_session_id(&mut self, session_id: u64) {
        self.session_id = Some(session_id);
    }

    /// Initiate the handshake (client use).
    ///
    /// Transitions to Pending and returns the Hello frame carrying the
    /// identity token.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in Init state
    pub fn send_hello(
        &mut self,
        token: Option<String>,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Init {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "send_hello",
            });
        }

        self.state = ConnectionState::Pending;
        self.last_activity = now;

        let hello = Payload::Hello(Hello { version: FrameHeader::VERSION, token });
        let frame = hello.into_frame(FrameHeader::new(Opcode::Hello))?;

        Ok(vec![ConnectionAction::SendFrame(frame)])
    }

    /// Complete the handshake (server use, after the identity token has been
    /// resolved by the driver's directory).
    ///
    /// The driver builds and sends the HelloReply itself, since the resolved
    /// profile lives outside this machine.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in Init state
    /// - `ConnectionError::Protocol` if no session id was assigned
    pub fn authenticate(&mut self, now: I) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Init {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "authenticate",
            });
        }

        if self.session_id.is_none() {
            return Err(ConnectionError::Protocol(
                "server must assign session_id before authenticating".to_string(),
            ));
        }

        self.state = ConnectionState::Authenticated;
        self.last_activity = now;

        Ok(())
    }

    /// Mark the connection as closed.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Mark the connection as active (call when receiving room frames).
    pub fn update_activity(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Elapsed time since last activity, if the timeout was exceeded.
    #[must_use]
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        let elapsed = now - self.last_activity;

        let timeout = match self.state {
            ConnectionState::Init | ConnectionState::Pending => self.config.handshake_timeout,
            ConnectionState::Authenticated => self.config.idle_timeout,
            ConnectionState::Closed => return None,
        };

        if elapsed > timeout { Some(elapsed) } else { None }
    }

    /// Periodic maintenance: timeout detection and heartbeat sending.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(elapsed) = self.check_timeout(now) {
            let reason = match self.state {
                ConnectionState::Authenticated => format!("idle timeout after {elapsed:?}"),
                _ => format!("handshake timeout after {elapsed:?}"),
            };

            self.close();
            actions.push(ConnectionAction::Close { reason });
            return actions;
        }

        if self.state == ConnectionState::Authenticated {
            let due = match self.last_heartbeat {
                None => true,
                Some(last) => now - last >= self.config.heartbeat_interval,
            };

            if due {
                let ping = Frame::new(FrameHeader::new(Opcode::Ping), Vec::new());
                actions.push(ConnectionAction::SendFrame(ping));
                self.last_heartbeat = Some(now);
            }
        }

        actions
    }

    /// Whether a frame belongs to the session layer.
    ///
    /// Room intents, room events, and error frames are not session frames;
    /// the driver routes them itself after calling
    /// [`Connection::update_activity`].
    #[must_use]
    pub fn is_session_frame(frame: &Frame) -> bool {
        matches!(
            frame.header.opcode_enum(),
            Some(
                Opcode::Hello | Opcode::HelloReply | Opcode::Goodbye | Opcode::Ping | Opcode::Pong
            )
        )
    }

    /// Process an incoming session frame and update state.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::UnexpectedFrame` if the opcode is invalid for the
    ///   current state
    /// - `ConnectionError::InvalidPayload` if deserialization fails
    /// - `ConnectionError::UnsupportedVersion` on a Hello version mismatch
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.last_activity = now;

        let Some(opcode) = frame.header.opcode_enum() else {
            return Err(ConnectionError::UnexpectedFrame {
                state: self.state,
                opcode: frame.header.opcode(),
            });
        };

        match (self.state, opcode) {
            // Client: receive HelloReply in Pending state
            (ConnectionState::Pending, Opcode::HelloReply) => {
                let payload = Payload::from_frame(frame)?;

                match payload {
                    Payload::HelloReply(reply) => {
                        self.state = ConnectionState::Authenticated;
                        self.session_id = Some(reply.session_id);

                        Ok(vec![])
                    },
                    _ => Err(ConnectionError::InvalidPayload {
                        expected: "HelloReply",
                        opcode: Opcode::HelloReply.to_u16(),
                    }),
                }
            },

            // Both: Ping when Authenticated
            (ConnectionState::Authenticated, Opcode::Ping) => {
                let pong = Frame::new(FrameHeader::new(Opcode::Pong), Vec::new());
                Ok(vec![ConnectionAction::SendFrame(pong)])
            },

            // Both: Pong when Authenticated - activity already updated
            (ConnectionState::Authenticated, Opcode::Pong) => Ok(vec![]),

            // Both: Goodbye in any state except Closed
            (state, Opcode::Goodbye) if state != ConnectionState::Closed => {
                let payload = Payload::from_frame(frame)?;

                let reason = match payload {
                    Payload::Goodbye(goodbye) => goodbye.reason,
                    _ => {
                        return Err(ConnectionError::InvalidPayload {
                            expected: "Goodbye",
                            opcode: Opcode::Goodbye.to_u16(),
                        });
                    },
                };

                self.state = ConnectionState::Closed;

                Ok(vec![ConnectionAction::Close { reason: format!("peer goodbye: {reason}") }])
            },

            (state, opcode) => {
                Err(ConnectionError::UnexpectedFrame { state, opcode: opcode.to_u16() })
            },
        }
    }
}

//! Simulation server and client/server coupling.
//!
//! `SimServer` wraps the Sans-IO `ServerDriver` and executes its actions
//! into per-session outboxes. `SimHarness` additionally owns client state
//! machines and shuttles frames both ways until the system is quiescent,
//! with time driven explicitly through [`SimEnv`].

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use songclash_client::{Client, ClientAction, ClientError, ClientEvent, RoomNotice};
use songclash_proto::{Frame, FrameHeader, Hello, Opcode, Payload};
use songclash_server::{
    ServerAction, ServerConfig, ServerDriver, ServerError, ServerEvent,
    collab::{MemoryDirectory, MemoryScoreSink, PlaylistSource},
};

use crate::SimEnv;

type SimDriver = ServerDriver<SimEnv, MemoryDirectory, PlaylistSource, Arc<MemoryScoreSink>>;

/// Server driver with in-memory action execution.
pub struct SimServer {
    driver: SimDriver,
    scores: Arc<MemoryScoreSink>,
    outboxes: HashMap<u64, VecDeque<Frame>>,
    next_session: u64,
}

impl SimServer {
    /// Create a simulation server.
    #[must_use]
    pub fn new(env: SimEnv, directory: MemoryDirectory, tracks: PlaylistSource) -> Self {
        let scores = Arc::new(MemoryScoreSink::new());
        let driver = ServerDriver::new(
            env,
            directory,
            tracks,
            Arc::clone(&scores),
            ServerConfig::default(),
        );

        Self { driver, scores, outboxes: HashMap::new(), next_session: 1 }
    }

    /// The score sink, for end-of-game assertions.
    #[must_use]
    pub fn scores(&self) -> &MemoryScoreSink {
        &self.scores
    }

    /// The underlying driver, for assertions.
    #[must_use]
    pub fn driver(&self) -> &SimDriver {
        &self.driver
    }

    /// Accept a new connection and return its session id.
    pub fn connect(&mut self) -> Result<u64, ServerError> {
        let session_id = self.next_session;
        self.next_session += 1;

        self.outboxes.insert(session_id, VecDeque::new());
        let actions = self.driver.process_event(ServerEvent::ConnectionAccepted { session_id })?;
        self.route(actions)?;

        Ok(session_id)
    }

    /// Close a connection (transport loss or client goodbye).
    pub fn disconnect(&mut self, session_id: u64, reason: &str) -> Result<(), ServerError> {
        self.outboxes.remove(&session_id);
        let actions = self.driver.process_event(ServerEvent::ConnectionClosed {
            session_id,
            reason: reason.to_string(),
        })?;
        self.route(actions)
    }

    /// Deliver a frame from a session to the server.
    pub fn deliver(&mut self, session_id: u64, frame: Frame) -> Result<(), ServerError> {
        let actions =
            self.driver.process_event(ServerEvent::FrameReceived { session_id, frame })?;
        self.route(actions)
    }

    /// Advance timers (round expiry, grace periods, heartbeats).
    pub fn tick(&mut self) -> Result<(), ServerError> {
        let actions = self.driver.process_event(ServerEvent::Tick)?;
        self.route(actions)
    }

    /// Take everything queued for a session.
    pub fn drain(&mut self, session_id: u64) -> Vec<Frame> {
        self.outboxes.get_mut(&session_id).map(|q| q.drain(..).collect()).unwrap_or_default()
    }

    /// Execute driver actions into outboxes; closes cascade as disconnect
    /// events exactly as the production runtime produces them.
    fn route(&mut self, actions: Vec<ServerAction>) -> Result<(), ServerError> {
        let mut closed = Vec::new();

        for action in actions {
            match action {
                ServerAction::SendToSession { session_id, frame } => {
                    if let Some(outbox) = self.outboxes.get_mut(&session_id) {
                        outbox.push_back(frame);
                    }
                },
                ServerAction::Broadcast { sessions, frame } => {
                    for session_id in sessions {
                        if let Some(outbox) = self.outboxes.get_mut(&session_id) {
                            outbox.push_back(frame.clone());
                        }
                    }
                },
                ServerAction::CloseConnection { session_id, reason } => {
                    closed.push((session_id, reason));
                },
                ServerAction::Log { .. } => {},
            }
        }

        for (session_id, reason) in closed {
            if self.outboxes.remove(&session_id).is_some() {
                let actions = self.driver.process_event(ServerEvent::ConnectionClosed {
                    session_id,
                    reason,
                })?;
                self.route(actions)?;
            }
        }

        Ok(())
    }
}

/// Harness faults: either side of the coupling failed.
#[derive(Debug)]
pub enum SimError {
    /// Server driver error
    Server(ServerError),
    /// Client state machine error
    Client(ClientError),
}

impl From<ServerError> for SimError {
    fn from(err: ServerError) -> Self {
        Self::Server(err)
    }
}

impl From<ClientError> for SimError {
    fn from(err: ClientError) -> Self {
        Self::Client(err)
    }
}

struct SimPeer {
    session_id: u64,
    token: String,
    client: Client,
    notices: Vec<RoomNotice>,
    connected: bool,
}

/// Clients coupled to a [`SimServer`] through in-memory queues.
pub struct SimHarness {
    /// The shared virtual environment
    pub env: SimEnv,
    server: SimServer,
    peers: Vec<SimPeer>,
}

impl SimHarness {
    /// Create a harness over the given directory and playlist.
    #[must_use]
    pub fn new(env: SimEnv, directory: MemoryDirectory, tracks: PlaylistSource) -> Self {
        let server = SimServer::new(env.clone(), directory, tracks);
        Self { env, server, peers: Vec::new() }
    }

    /// The simulation server, for assertions.
    #[must_use]
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    /// A peer's client state machine, for assertions.
    #[must_use]
    pub fn client(&self, peer: usize) -> &Client {
        &self.peers[peer].client
    }

    /// Take a peer's accumulated notices.
    pub fn take_notices(&mut self, peer: usize) -> Vec<RoomNotice> {
        std::mem::take(&mut self.peers[peer].notices)
    }

    /// Connect a new client and complete its handshake. Returns the peer
    /// index.
    pub fn add_client(&mut self, token: &str) -> Result<usize, SimError> {
        let session_id = self.server.connect()?;
        self.deliver_hello(session_id, token)?;

        self.peers.push(SimPeer {
            session_id,
            token: token.to_string(),
            client: Client::new(),
            notices: Vec::new(),
            connected: true,
        });

        let peer = self.peers.len() - 1;
        self.pump()?;
        Ok(peer)
    }

    /// Feed an application intent into a peer's client.
    pub fn intent(&mut self, peer: usize, event: ClientEvent) -> Result<(), SimError> {
        let actions = self.peers[peer].client.handle(event)?;
        self.execute_client_actions(peer, actions)?;
        self.pump()
    }

    /// Drop a peer's transport without a goodbye.
    ///
    /// The server reaps membership; the peer keeps its local view until it
    /// reconciles after reconnecting.
    pub fn drop_transport(&mut self, peer: usize) -> Result<(), SimError> {
        let session_id = self.peers[peer].session_id;
        self.peers[peer].connected = false;
        self.server.disconnect(session_id, "transport lost")?;
        self.pump()
    }

    /// Reconnect a dropped peer: fresh session, fresh handshake, then the
    /// client's snapshot-driven reconcile.
    pub fn reconnect(&mut self, peer: usize) -> Result<(), SimError> {
        let token = self.peers[peer].token.clone();
        let session_id = self.server.connect()?;
        self.deliver_hello(session_id, &token)?;

        self.peers[peer].session_id = session_id;
        self.peers[peer].connected = true;
        self.pump()?;

        let actions = self.peers[peer].client.handle(ClientEvent::Reconnected)?;
        self.execute_client_actions(peer, actions)?;
        self.pump()
    }

    /// Advance virtual time and fire the server tick.
    pub fn advance(&mut self, duration: Duration) -> Result<(), SimError> {
        self.env.advance(duration);
        self.server.tick()?;
        self.pump()
    }

    /// Shuttle frames until no queue moves.
    pub fn pump(&mut self) -> Result<(), SimError> {
        loop {
            let mut moved = false;

            for index in 0..self.peers.len() {
                if !self.peers[index].connected {
                    // Frames for a dead transport are lost, as on the wire
                    let session_id = self.peers[index].session_id;
                    self.server.drain(session_id);
                    continue;
                }

                let session_id = self.peers[index].session_id;
                for frame in self.server.drain(session_id) {
                    moved = true;
                    let actions =
                        self.peers[index].client.handle(ClientEvent::FrameReceived(frame))?;
                    self.execute_client_actions(index, actions)?;
                }
            }

            if !moved {
                return Ok(());
            }
        }
    }

    fn deliver_hello(&mut self, session_id: u64, token: &str) -> Result<(), SimError> {
        let hello = Payload::Hello(Hello {
            version: FrameHeader::VERSION,
            token: Some(token.to_string()),
        })
        .into_frame(FrameHeader::new(Opcode::Hello))
        .map_err(|e| SimError::Server(ServerError::Protocol(e.to_string())))?;

        self.server.deliver(session_id, hello)?;
        Ok(())
    }

    fn execute_client_actions(
        &mut self,
        peer: usize,
        actions: Vec<ClientAction>,
    ) -> Result<(), SimError> {
        for action in actions {
            match action {
                ClientAction::Send(frame) => {
                    if self.peers[peer].connected {
                        let session_id = self.peers[peer].session_id;
                        self.server.deliver(session_id, frame)?;
                    }
                },
                ClientAction::Notify(notice) => self.peers[peer].notices.push(notice),
                ClientAction::Log { .. } => {},
            }
        }
        Ok(())
    }
}

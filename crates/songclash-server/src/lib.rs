//! Songclash production server.
//!
//! Production runtime wrapping the Sans-IO [`ServerDriver`] with Quinn QUIC
//! transport, Tokio, system time, and OS randomness.
//!
//! # Architecture
//!
//! - [`ServerDriver`]: action-based orchestrator (pure logic, no I/O)
//! - [`Server`]: runtime that feeds it events and executes its actions
//! - [`QuinnTransport`]: QUIC endpoint
//! - [`SystemEnv`]: production environment
//!
//! Each client opens one bidirectional stream and writes intent frames on
//! it in order; the server pushes events on one unidirectional stream per
//! session. Action execution only enqueues frames into per-session send
//! queues - a slow client's queue fills and drops frames rather than ever
//! blocking the state machine (the client reconciles via the snapshot
//! path).

pub mod collab;
mod driver;
mod error;
mod registry;
pub mod room;
pub mod store;
mod system_env;
mod transport;

use std::{collections::HashMap, sync::Arc};

use bytes::BytesMut;
pub use driver::{LogLevel, ServerAction, ServerConfig, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use registry::{ConnectionRegistry, SessionInfo};
use songclash_core::env::Environment;
use songclash_proto::{Frame, FrameHeader};
pub use system_env::SystemEnv;
use tokio::sync::{RwLock, mpsc};
pub use transport::{QuinnConnection, QuinnTransport};

use crate::collab::{Directory, ScoreSink, TrackSource};

/// Per-session send queue depth. A client that cannot drain 64 room events
/// is effectively gone; further frames are dropped until it reconciles.
const SEND_QUEUE_DEPTH: usize = 64;

/// Interval between driver ticks (round timers, heartbeats, idle timeouts).
const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);

/// Ticks between health log lines (every 60 s at the tick interval).
const STATS_EVERY_TICKS: u64 = 240;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Driver configuration (timeouts, limits)
    pub driver: ServerConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            driver: ServerConfig::default(),
        }
    }
}

/// Shared per-session transport state.
struct SharedState {
    /// Session id → QUIC connection (for closing)
    connections: RwLock<HashMap<u64, QuinnConnection>>,
    /// Session id → ordered outbound frame queue
    outbound: RwLock<HashMap<u64, mpsc::Sender<Frame>>>,
}

/// Production Songclash server.
pub struct Server<D, T, K>
where
    D: Directory,
    T: TrackSource,
    K: ScoreSink,
{
    driver: Arc<tokio::sync::Mutex<ServerDriver<SystemEnv, D, T, K>>>,
    transport: QuinnTransport,
    env: SystemEnv,
    shared: Arc<SharedState>,
}

impl<D, T, K> Server<D, T, K>
where
    D: Directory,
    T: TrackSource,
    K: ScoreSink,
{
    /// Create and bind a new server with the given collaborators.
    pub fn bind(
        config: ServerRuntimeConfig,
        directory: D,
        tracks: T,
        scores: K,
    ) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let driver = ServerDriver::new(env.clone(), directory, tracks, scores, config.driver);

        let transport =
            QuinnTransport::bind(&config.bind_address, config.cert_path, config.key_path)?;

        Ok(Self {
            driver: Arc::new(tokio::sync::Mutex::new(driver)),
            transport,
            env,
            shared: Arc::new(SharedState {
                connections: RwLock::new(HashMap::new()),
                outbound: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the server: periodic ticks plus the accept loop.
    ///
    /// Runs until the endpoint is closed or an unrecoverable transport
    /// error occurs.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("server listening on {}", self.transport.local_addr()?);

        let tick_driver = Arc::clone(&self.driver);
        let tick_shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            let mut ticks: u64 = 0;
            loop {
                interval.tick().await;
                ticks += 1;

                let mut driver = tick_driver.lock().await;
                match driver.process_event(ServerEvent::Tick) {
                    Ok(actions) => execute_actions(actions, &tick_shared).await,
                    Err(e) => tracing::error!("tick processing failed: {e}"),
                }

                // Polling-friendly health surface
                if ticks % STATS_EVERY_TICKS == 0 {
                    tracing::info!(
                        connections = driver.connection_count(),
                        rooms = driver.room_count(),
                        "coordinator health"
                    );
                }
            }
        });

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let driver = Arc::clone(&self.driver);
                    let shared = Arc::clone(&self.shared);
                    let env = self.env.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, driver, shared, &env).await {
                            tracing::debug!("connection ended: {e}");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {e}");
                },
            }
        }
    }
}

/// Handle a single QUIC connection for its whole lifetime.
async fn handle_connection<D, T, K>(
    conn: QuinnConnection,
    driver: Arc<tokio::sync::Mutex<ServerDriver<SystemEnv, D, T, K>>>,
    shared: Arc<SharedState>,
    env: &SystemEnv,
) -> Result<(), ServerError>
where
    D: Directory,
    T: TrackSource,
    K: ScoreSink,
{
    let session_id = env.random_u64();
    tracing::debug!(session_id, peer = %conn.remote_addr(), "new connection");

    // One ordered outbound stream per session; a writer task drains the
    // send queue so action execution never does I/O
    let mut event_stream = conn.open_uni().await?;
    let (tx, mut rx) = mpsc::channel::<Frame>(SEND_QUEUE_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let mut buf = Vec::with_capacity(frame.encoded_len());
            if frame.encode(&mut buf).is_err() {
                continue;
            }
            if let Err(e) = event_stream.write_all(&buf).await {
                tracing::debug!("outbound stream closed: {e}");
                break;
            }
        }
    });

    shared.connections.write().await.insert(session_id, conn.clone());
    shared.outbound.write().await.insert(session_id, tx);

    {
        let mut driver = driver.lock().await;
        match driver.process_event(ServerEvent::ConnectionAccepted { session_id }) {
            Ok(actions) => execute_actions(actions, &shared).await,
            Err(e) => tracing::error!(session_id, "accept processing failed: {e}"),
        }
    }

    // The client sends all intents on a single bidirectional stream,
    // preserving intent order
    let read_result = async {
        let (send, mut recv) = conn.accept_bi().await?;
        drop(send);

        while let Some(frame) = read_frame(&mut recv).await? {
            let mut driver = driver.lock().await;
            match driver.process_event(ServerEvent::FrameReceived { session_id, frame }) {
                Ok(actions) => execute_actions(actions, &shared).await,
                Err(e) => tracing::warn!(session_id, "frame processing failed: {e}"),
            }
        }

        Ok::<(), ServerError>(())
    }
    .await;

    shared.connections.write().await.remove(&session_id);
    shared.outbound.write().await.remove(&session_id);
    writer.abort();

    {
        let mut driver = driver.lock().await;
        match driver.process_event(ServerEvent::ConnectionClosed {
            session_id,
            reason: "connection closed".to_string(),
        }) {
            Ok(actions) => execute_actions(actions, &shared).await,
            Err(e) => tracing::error!(session_id, "close processing failed: {e}"),
        }
    }

    read_result
}

/// Read one length-framed frame from a stream. `None` on clean end.
async fn read_frame(recv: &mut quinn::RecvStream) -> Result<Option<Frame>, ServerError> {
    let mut buf = BytesMut::zeroed(FrameHeader::SIZE);

    if recv.read_exact(&mut buf).await.is_err() {
        return Ok(None);
    }

    let payload_size = FrameHeader::from_bytes(&buf)
        .map_err(|e| ServerError::Protocol(e.to_string()))?
        .payload_size() as usize;

    if payload_size > 0 {
        buf.resize(FrameHeader::SIZE + payload_size, 0);
        if recv.read_exact(&mut buf[FrameHeader::SIZE..]).await.is_err() {
            return Ok(None);
        }
    }

    let frame = Frame::decode(&buf).map_err(|e| ServerError::Protocol(e.to_string()))?;
    Ok(Some(frame))
}

/// Execute driver actions.
///
/// Sends only enqueue into per-session queues; full queues drop the frame
/// (best-effort delivery - the client reconciles via snapshot).
async fn execute_actions(actions: Vec<ServerAction>, shared: &SharedState) {
    for action in actions {
        match action {
            ServerAction::SendToSession { session_id, frame } => {
                enqueue(shared, session_id, frame).await;
            },

            ServerAction::Broadcast { sessions, frame } => {
                for session_id in sessions {
                    enqueue(shared, session_id, frame.clone()).await;
                }
            },

            ServerAction::CloseConnection { session_id, reason } => {
                tracing::info!(session_id, "closing connection: {reason}");
                shared.outbound.write().await.remove(&session_id);
                if let Some(conn) = shared.connections.write().await.remove(&session_id) {
                    conn.close(0u32.into(), reason.as_bytes());
                }
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            },
        }
    }
}

async fn enqueue(shared: &SharedState, session_id: u64, frame: Frame) {
    let outbound = shared.outbound.read().await;
    let Some(tx) = outbound.get(&session_id) else {
        tracing::debug!(session_id, "send to unknown session");
        return;
    };

    match tx.try_send(frame) {
        Ok(()) => {},
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(session_id, "send queue full - frame dropped");
        },
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(session_id, "send queue closed");
        },
    }
}

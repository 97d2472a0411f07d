//! Server error types.
//!
//! `ServerError` covers driver- and transport-level failures. Room-scoped
//! error conditions (`RoomError`) are not here - they are recoverable,
//! reported to the requesting connection only, and never escalate past the
//! driver.

use thiserror::Error;

/// Errors from server driver and runtime operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Frame arrived for a session the driver doesn't know.
    ///
    /// May be transient: the session may have just disconnected.
    #[error("session not found: {0}")]
    SessionNotFound(u64),

    /// Invalid configuration (bind address, TLS material).
    #[error("config error: {0}")]
    Config(String),

    /// Transport-level failure (bind, accept, stream I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// Frame encoding/decoding failure at the driver boundary.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invariant violation inside the runtime.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<songclash_proto::ProtocolError> for ServerError {
    fn from(err: songclash_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<songclash_core::ConnectionError> for ServerError {
    fn from(err: songclash_core::ConnectionError) -> Self {
        Self::Protocol(err.to_string())
    }
}

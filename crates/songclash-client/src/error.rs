//! Client error types.

use thiserror::Error;

/// Errors from the client state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// A room intent was issued with no room joined
    #[error("not in a room")]
    NotInRoom,

    /// A received frame could not be interpreted
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong with it
        reason: String,
    },
}

impl From<songclash_proto::ProtocolError> for ClientError {
    fn from(err: songclash_proto::ProtocolError) -> Self {
        Self::InvalidFrame { reason: err.to_string() }
    }
}

//! Sans-IO building blocks shared by the Songclash server and client.
//!
//! This crate holds the [`Environment`](env::Environment) abstraction (time
//! and randomness, generic over the Instant type so tests can use virtual
//! time) and the session-layer [`Connection`](connection::Connection) state
//! machine. Both follow the action pattern: methods take time as input and
//! return actions for a driver to execute, keeping the logic pure and
//! directly testable.

pub mod connection;
pub mod env;
pub mod error;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState};
pub use env::Environment;
pub use error::ConnectionError;

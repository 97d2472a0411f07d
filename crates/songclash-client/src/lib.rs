//! Songclash client library.
//!
//! The [`Client`] is a Sans-IO state machine holding the local view of the
//! joined room, reconciled purely from server broadcasts and authoritative
//! snapshots - never by replaying missed history. A per-round processed
//! ledger suppresses duplicate round results regardless of delivery path.
//!
//! The [`ReconnectSupervisor`](reconnect::ReconnectSupervisor) is the single
//! owner of reconnection state: bounded retries with capped exponential
//! backoff, at most one attempt in flight, explicit cancellation on
//! teardown.
//!
//! With the `transport` feature enabled, [`transport::connect`] provides the
//! QUIC dial and frame pump used by real clients.

mod client;
mod error;
pub mod event;
pub mod reconnect;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::{Client, LocalRoom};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent, RoomNotice};
pub use reconnect::{ReconnectAction, ReconnectPolicy, ReconnectState, ReconnectSupervisor};

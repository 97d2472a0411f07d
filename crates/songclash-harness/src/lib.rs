//! Deterministic simulation harness for Songclash testing.
//!
//! [`SimEnv`] provides a manually advanced virtual clock and a seeded RNG,
//! so every run is reproducible. [`SimServer`] drives the Sans-IO
//! [`ServerDriver`](songclash_server::ServerDriver) directly, delivering its
//! actions into per-session outboxes. [`SimHarness`] couples client state
//! machines to the server through in-memory frame queues and pumps them to
//! quiescence - no sockets, no real time.

pub mod sim_env;
pub mod sim_server;

pub use sim_env::{SimEnv, SimInstant};
pub use sim_server::{SimError, SimHarness, SimServer};

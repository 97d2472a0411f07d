//! Production Environment implementation.
//!
//! Real monotonic time, tokio sleeping, and OS cryptographic randomness.
//! Non-deterministic by nature - deterministic runs come from the simulation
//! harness, not from here.

use std::time::Duration;

use songclash_core::env::Environment;

/// Production environment using system time and getrandom.
///
/// # Panics
///
/// Panics if the OS RNG fails. Intentional: session ids and room codes come
/// from this source, and a server without working entropy should not limp
/// along.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn wall_clock_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after the Unix epoch")
            .as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

//! Simulated environment: virtual clock plus seeded RNG.

use std::{
    ops::{Add, Sub},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use songclash_core::env::Environment;

/// Wall-clock base the virtual clock starts at (2023-11-14T22:13:20Z).
const WALL_BASE_MS: u64 = 1_700_000_000_000;

/// A point on the virtual clock.
///
/// Plain milliseconds since simulation start, with the arithmetic the
/// [`Environment`] Instant bound requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimInstant(u64);

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(rhs.0))
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.as_millis() as u64)
    }
}

struct SimEnvInner {
    now_ms: AtomicU64,
    rng: Mutex<ChaCha8Rng>,
}

/// Deterministic environment: the clock only moves when a test advances it,
/// and the RNG sequence is fixed by the seed.
#[derive(Clone)]
pub struct SimEnv {
    inner: Arc<SimEnvInner>,
}

impl SimEnv {
    /// Create an environment with the given RNG seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(SimEnvInner {
                now_ms: AtomicU64::new(0),
                rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            }),
        }
    }

    /// Create an environment with a fixed default seed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, duration: Duration) {
        self.inner.now_ms.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Milliseconds since simulation start.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.inner.now_ms.load(Ordering::SeqCst)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed_ms())
    }

    fn wall_clock_ms(&self) -> u64 {
        WALL_BASE_MS + self.elapsed_ms()
    }

    fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
        // Virtual time: sleeping is a no-op, tests advance the clock
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut rng = self.inner.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_only_moves_on_advance() {
        let env = SimEnv::new();
        let t0 = env.now();
        let t1 = env.now();
        assert_eq!(t0, t1);

        env.advance(Duration::from_secs(5));
        let t2 = env.now();
        assert_eq!(t2 - t0, Duration::from_secs(5));
        assert_eq!(env.wall_clock_ms(), WALL_BASE_MS + 5_000);
    }

    #[test]
    fn clones_share_the_clock() {
        let env = SimEnv::new();
        let other = env.clone();

        env.advance(Duration::from_secs(1));
        assert_eq!(other.elapsed_ms(), 1_000);
    }

    #[test]
    fn same_seed_same_randomness() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);

        let mut buf_a = [0u8; 16];
        let mut buf_b = [0u8; 16];
        a.random_bytes(&mut buf_a);
        b.random_bytes(&mut buf_b);

        assert_eq!(buf_a, buf_b);

        let c = SimEnv::with_seed(8);
        let mut buf_c = [0u8; 16];
        c.random_bytes(&mut buf_c);
        assert_ne!(buf_a, buf_c);
    }

    #[test]
    fn instant_arithmetic() {
        let t0 = SimInstant(1_000);
        let t1 = t0 + Duration::from_millis(500);

        assert!(t1 > t0);
        assert_eq!(t1 - t0, Duration::from_millis(500));
    }
}

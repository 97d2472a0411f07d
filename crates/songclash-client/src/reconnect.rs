//! Reconnect supervisor.
//!
//! One state machine owns all reconnection concerns: bounded retries with
//! capped exponential backoff, at most one attempt in flight, explicit
//! cancellation on teardown, and a user-visible notice when retries are
//! exhausted. The caller drives it with ticks and reports attempt outcomes;
//! the supervisor never performs I/O itself.
//!
//! ```text
//! ┌───────────┐ connection_lost ┌─────────┐ tick (due) ┌──────────┐
//! │ Connected │────────────────>│ Waiting │───────────>│ InFlight │
//! └───────────┘                 └─────────┘            └──────────┘
//!       ↑                            ↑   attempt_failed     │
//!       │ attempt_succeeded          └──────────────────────┤
//!       │                                                   │ attempts
//!       └───────────────────────────────────────────────────┤ exhausted
//!                                                           ↓
//!                                                     ┌───────────┐
//!                                                     │ Exhausted │
//!                                                     └───────────┘
//! ```

use std::{
    ops::{Add, Sub},
    time::Duration,
};

/// Reconnection policy: attempt budget and backoff schedule.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles each failure
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay before the given attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self.base_delay.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        doubled.min(self.max_delay)
    }
}

/// Supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// Transport is up
    Connected,
    /// Waiting for the backoff deadline before the next attempt
    Waiting {
        /// Attempt number about to run (1-based)
        attempt: u32,
    },
    /// An attempt is running; no other attempt may start
    InFlight {
        /// Attempt number currently running
        attempt: u32,
    },
    /// Attempt budget spent; the user must intervene
    Exhausted,
    /// Torn down; no further attempts ever
    Stopped,
}

/// Actions the supervisor asks the caller to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Begin one reconnection attempt
    StartAttempt,
    /// Retries exhausted: surface a reconnect affordance to the user
    GiveUp,
}

/// Tick-driven reconnect state machine.
///
/// Generic over `I` (Instant type) to support virtual time in tests.
#[derive(Debug)]
pub struct ReconnectSupervisor<I> {
    policy: ReconnectPolicy,
    state: ReconnectState,
    next_attempt_at: Option<I>,
}

impl<I> ReconnectSupervisor<I>
where
    I: Copy + Ord + Add<Duration, Output = I> + Sub<Output = Duration>,
{
    /// Create a supervisor in the Connected state.
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, state: ReconnectState::Connected, next_attempt_at: None }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// The transport dropped: schedule the first attempt.
    ///
    /// Ignored while an attempt is already pending or running - losing the
    /// connection twice must not pile up attempts.
    pub fn connection_lost(&mut self, now: I) {
        match self.state {
            ReconnectState::Connected => {
                self.state = ReconnectState::Waiting { attempt: 1 };
                self.next_attempt_at = Some(now + self.policy.delay_for(1));
            },
            ReconnectState::Waiting { .. }
            | ReconnectState::InFlight { .. }
            | ReconnectState::Exhausted
            | ReconnectState::Stopped => {},
        }
    }

    /// Drive time forward. Returns an action when the backoff deadline has
    /// passed and no attempt is in flight.
    pub fn tick(&mut self, now: I) -> Option<ReconnectAction> {
        let ReconnectState::Waiting { attempt } = self.state else {
            return None;
        };

        let due = self.next_attempt_at.is_some_and(|at| at <= now);
        if !due {
            return None;
        }

        self.state = ReconnectState::InFlight { attempt };
        self.next_attempt_at = None;
        Some(ReconnectAction::StartAttempt)
    }

    /// The in-flight attempt failed: back off or give up.
    pub fn attempt_failed(&mut self, now: I) -> Option<ReconnectAction> {
        let ReconnectState::InFlight { attempt } = self.state else {
            return None;
        };

        if attempt >= self.policy.max_attempts {
            self.state = ReconnectState::Exhausted;
            return Some(ReconnectAction::GiveUp);
        }

        let next = attempt + 1;
        self.state = ReconnectState::Waiting { attempt: next };
        self.next_attempt_at = Some(now + self.policy.delay_for(next));
        None
    }

    /// The in-flight attempt succeeded: back to Connected, budget reset.
    pub fn attempt_succeeded(&mut self) {
        if matches!(self.state, ReconnectState::InFlight { .. }) {
            self.state = ReconnectState::Connected;
            self.next_attempt_at = None;
        }
    }

    /// Clean teardown: cancel any pending attempt permanently.
    pub fn shutdown(&mut self) {
        self.state = ReconnectState::Stopped;
        self.next_attempt_at = None;
    }

    /// Reset an exhausted supervisor (user pressed "reconnect").
    pub fn reset(&mut self, now: I) {
        if self.state == ReconnectState::Exhausted {
            self.state = ReconnectState::Waiting { attempt: 1 };
            self.next_attempt_at = Some(now + self.policy.delay_for(1));
        }
    }
}

impl<I> Default for ReconnectSupervisor<I>
where
    I: Copy + Ord + Add<Duration, Output = I> + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

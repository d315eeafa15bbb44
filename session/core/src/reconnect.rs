//! Reconnection Scheduler
//!
//! Backoff state machine deciding when, and whether, to re-acquire a
//! connection after the active one dropped. It owns no timers; the session
//! driver sleeps for the delays it hands out and reports outcomes back.
//!
//! # States
//!
//! ```text
//!            connection lost            delay elapsed
//!   Idle ───────────────────► Scheduled ─────────────► Attempting
//!    ▲                            ▲                        │
//!    │ connected                  │ failed, budget left    │
//!    └────────────────────────────┴────────────────────────┤
//!                                                          │ failed, budget spent
//!                                                          ▼
//!                                                      Exhausted
//! ```
//!
//! Attempt `n` (1-indexed) waits `base_delay * 2^(n-1)`. A loss reported
//! while already `Scheduled` or `Attempting` is ignored, so two attempts
//! never overlap. `Exhausted` is left only through [`ReconnectScheduler::reset`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before the first reconnection attempt
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default attempt budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Reconnection configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before attempt 1, in milliseconds; doubles per attempt
    pub base_delay_ms: u64,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for attempt `attempt` (1-indexed)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = 1u64 << exponent;
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Scheduler phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectPhase {
    /// Nothing pending
    Idle,
    /// Waiting for the backoff delay of `attempt`
    Scheduled {
        /// Attempt that will run (1-indexed)
        attempt: u32,
        /// Delay before it runs
        delay: Duration,
    },
    /// A selector run is in flight
    Attempting {
        /// Attempt being made (1-indexed)
        attempt: u32,
        /// Triggered by the network coming back; does not consume budget
        immediate: bool,
    },
    /// Budget spent; only a reset leaves this state
    Exhausted,
}

/// What the driver should do after reporting an outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Sleep for `delay`, then call [`ReconnectScheduler::begin_attempt`]
    Schedule {
        /// Attempt that will run (1-indexed)
        attempt: u32,
        /// Delay before it runs
        delay: Duration,
    },
    /// Budget spent; report the failure once
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
    /// Duplicate or late report; nothing to do
    Ignored,
}

/// Snapshot of the scheduler's counters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectState {
    /// Failed attempts since the last successful open
    pub attempt: u32,
    /// Delay the next attempt would wait
    pub next_delay: Duration,
    /// Attempt budget
    pub max_attempts: u32,
    /// Current phase
    pub phase: ReconnectPhase,
}

/// Reconnection backoff state machine
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    phase: ReconnectPhase,
    attempts: u32,
}

impl ReconnectScheduler {
    /// Create an idle scheduler
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            phase: ReconnectPhase::Idle,
            attempts: 0,
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    /// Failed attempts since the last successful open
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the budget is spent
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.phase == ReconnectPhase::Exhausted
    }

    /// Counter snapshot
    #[must_use]
    pub fn state(&self) -> ReconnectState {
        ReconnectState {
            attempt: self.attempts,
            next_delay: self.config.delay_for(self.attempts + 1),
            max_attempts: self.config.max_attempts,
            phase: self.phase,
        }
    }

    /// The active connection closed or failed unexpectedly
    pub fn on_connection_lost(&mut self) -> ReconnectDecision {
        match self.phase {
            ReconnectPhase::Idle => self.schedule_next(),
            _ => {
                tracing::debug!(phase = ?self.phase, "Ignoring duplicate connection loss");
                ReconnectDecision::Ignored
            }
        }
    }

    /// The scheduled delay elapsed; returns the attempt to run
    ///
    /// Only valid from `Scheduled`; anything else yields `None`.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        match self.phase {
            ReconnectPhase::Scheduled { attempt, .. } => {
                self.phase = ReconnectPhase::Attempting {
                    attempt,
                    immediate: false,
                };
                Some(attempt)
            }
            _ => None,
        }
    }

    /// Run one attempt now, outside the backoff schedule
    ///
    /// Used when the network comes back. Cancels a pending delay. The
    /// attempt does not consume budget.
    pub fn begin_immediate(&mut self) -> Option<u32> {
        match self.phase {
            ReconnectPhase::Idle | ReconnectPhase::Scheduled { .. } => {
                let attempt = self.attempts + 1;
                self.phase = ReconnectPhase::Attempting {
                    attempt,
                    immediate: true,
                };
                Some(attempt)
            }
            _ => None,
        }
    }

    /// The in-flight attempt failed
    pub fn on_attempt_failed(&mut self) -> ReconnectDecision {
        let ReconnectPhase::Attempting { attempt, immediate } = self.phase else {
            return ReconnectDecision::Ignored;
        };
        if !immediate {
            self.attempts = attempt;
        }

        if self.attempts >= self.config.max_attempts {
            self.phase = ReconnectPhase::Exhausted;
            tracing::error!(attempts = self.attempts, "Reconnection attempts exhausted");
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.phase = ReconnectPhase::Idle;
        self.schedule_next()
    }

    /// A connection reached open; budget restored
    pub fn on_connected(&mut self) {
        self.phase = ReconnectPhase::Idle;
        self.attempts = 0;
    }

    /// The network went offline; cancel any pending attempt without using budget
    pub fn suspend(&mut self) {
        if matches!(
            self.phase,
            ReconnectPhase::Scheduled { .. } | ReconnectPhase::Attempting { .. }
        ) {
            self.phase = ReconnectPhase::Idle;
        }
    }

    /// Forget everything; the only way out of `Exhausted`
    pub fn reset(&mut self) {
        self.phase = ReconnectPhase::Idle;
        self.attempts = 0;
    }

    fn schedule_next(&mut self) -> ReconnectDecision {
        if self.attempts >= self.config.max_attempts {
            self.phase = ReconnectPhase::Exhausted;
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        let attempt = self.attempts + 1;
        let delay = self.config.delay_for(attempt);
        self.phase = ReconnectPhase::Scheduled { attempt, delay };
        tracing::info!(
            attempt,
            max_attempts = self.config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnection scheduled"
        );
        ReconnectDecision::Schedule { attempt, delay }
    }
}

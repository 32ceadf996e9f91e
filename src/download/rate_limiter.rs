//! Adaptive, globally shared request pacing.
//!
//! This module provides the [`RateController`] which spaces request *starts*
//! across every concurrent worker and adapts the spacing to how the origin
//! reacts: blocked responses widen the gap, sustained success narrows it.
//!
//! # Overview
//!
//! One controller is shared (via `Arc`) by every fetch made for a gallery run.
//! Before each request a worker calls [`RateController::acquire`], which reserves
//! the next free start slot and sleeps until it arrives. Outcomes are reported
//! back with [`RateController::record_success`] and
//! [`RateController::record_blocked`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wgrabber::download::{RateConfig, RateController};
//!
//! # async fn example() {
//! let limiter = Arc::new(RateController::new(RateConfig::default()));
//!
//! // First request proceeds immediately
//! limiter.acquire().await;
//!
//! // Second request waits for the current delay (3s by default)
//! limiter.acquire().await;
//! limiter.record_success();
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{
    DEFAULT_DECAY_EVERY, DEFAULT_DECAY_FACTOR, DEFAULT_GROWTH_FACTOR, DEFAULT_INITIAL_DELAY,
    DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY,
};

/// Tuning for the adaptive delay.
///
/// # Default Values
///
/// - `min_delay`: 2 seconds
/// - `max_delay`: 15 seconds
/// - `initial_delay`: 3 seconds
/// - `decay_every`: 5 consecutive successes
/// - `decay_factor`: 0.9
/// - `growth_factor`: 1.5
#[derive(Debug, Clone, PartialEq)]
pub struct RateConfig {
    /// Floor for the delay between request starts.
    pub min_delay: Duration,
    /// Cap for the delay between request starts.
    pub max_delay: Duration,
    /// Delay used before any outcome has been reported.
    pub initial_delay: Duration,
    /// Number of consecutive successes that triggers one decay step.
    pub decay_every: u32,
    /// Multiplier applied on a decay step.
    pub decay_factor: f64,
    /// Multiplier applied on every blocked response.
    pub growth_factor: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            initial_delay: DEFAULT_INITIAL_DELAY,
            decay_every: DEFAULT_DECAY_EVERY,
            decay_factor: DEFAULT_DECAY_FACTOR,
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

impl RateConfig {
    /// Returns a config with the given bounds and starting delay, keeping the
    /// default decay and growth factors.
    ///
    /// A `max_delay` below `min_delay` is raised to `min_delay`.
    #[must_use]
    pub fn with_bounds(min_delay: Duration, max_delay: Duration, initial_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            initial_delay,
            ..Self::default()
        }
    }

    fn clamp(&self, delay: Duration) -> Duration {
        delay.clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }
}

/// Point-in-time copy of the controller state, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    /// Current delay between request starts.
    pub current_delay: Duration,
    /// Blocked responses since the last success (or session refresh).
    pub consecutive_failures: u32,
    /// Successes since the last block or decay step.
    pub consecutive_successes: u32,
}

/// Mutable pacing state; only touched under the controller's lock.
#[derive(Debug)]
struct RateState {
    current_delay: Duration,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Start time reserved by the most recent `acquire`.
    /// `None` means nothing has been requested yet (first request is immediate).
    last_request: Option<Instant>,
}

/// Adaptive rate controller shared by all workers of a gallery run.
///
/// All counters, the adaptive delay and the last-request timestamp live behind
/// one mutex. The lock is never held across an `.await`: [`acquire`](Self::acquire)
/// reserves its slot under the lock and sleeps after releasing it.
///
/// # Thread Safety
///
/// `RateController` is `Send + Sync`, making it safe to use with `Arc` and share
/// across spawned Tokio tasks.
#[derive(Debug)]
pub struct RateController {
    config: RateConfig,
    /// Whether pacing is disabled (tests, `--no-delay`). Counters are still tracked.
    disabled: bool,
    state: Mutex<RateState>,
}

impl RateController {
    /// Creates a controller starting at `config.initial_delay` (clamped to the bounds).
    #[must_use]
    #[instrument(skip_all, fields(initial_ms = config.initial_delay.as_millis()))]
    pub fn new(config: RateConfig) -> Self {
        debug!("creating rate controller");
        let current_delay = config.clamp(config.initial_delay);
        Self {
            config,
            disabled: false,
            state: Mutex::new(RateState {
                current_delay,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_request: None,
            }),
        }
    }

    /// Creates a controller that never sleeps but still tracks outcomes.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::new(RateConfig::default())
        }
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configuration this controller was built with.
    #[must_use]
    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, RateState> {
        // Counters stay meaningful even if a holder panicked mid-update.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for this worker's turn to start a request.
    ///
    /// Request starts are spaced at least `current_delay` apart across all
    /// callers. The first request proceeds immediately.
    pub async fn acquire(&self) {
        if self.disabled {
            return;
        }

        let (start_at, delay) = {
            let mut state = self.lock();
            let now = Instant::now();
            let start_at = match state.last_request {
                Some(last) => (last + state.current_delay).max(now),
                None => now,
            };
            state.last_request = Some(start_at);
            (start_at, start_at.saturating_duration_since(now))
        };

        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis(), "pacing request");
            tokio::time::sleep_until(start_at).await;
        }
    }

    /// Records a successful response.
    ///
    /// Every `decay_every` consecutive successes the delay shrinks by
    /// `decay_factor`, never below `min_delay`.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;
        if state.consecutive_successes >= self.config.decay_every {
            let decayed = self
                .config
                .clamp(state.current_delay.mul_f64(self.config.decay_factor));
            if decayed != state.current_delay {
                debug!(
                    from_ms = state.current_delay.as_millis(),
                    to_ms = decayed.as_millis(),
                    "easing request delay"
                );
            }
            state.current_delay = decayed;
            state.consecutive_successes = 0;
        }
    }

    /// Records a blocked or rate-limited response and returns the number of
    /// consecutive blocks seen so far.
    ///
    /// The delay grows by `growth_factor`, never above `max_delay`.
    pub fn record_blocked(&self) -> u32 {
        let mut state = self.lock();
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;
        state.current_delay = self
            .config
            .clamp(state.current_delay.mul_f64(self.config.growth_factor));
        if state.current_delay == self.config.max_delay {
            warn!(
                delay_secs = state.current_delay.as_secs_f64(),
                failures = state.consecutive_failures,
                "request delay at maximum - origin keeps blocking"
            );
        } else {
            debug!(
                delay_ms = state.current_delay.as_millis(),
                failures = state.consecutive_failures,
                "backing off request delay"
            );
        }
        state.consecutive_failures
    }

    /// Clears the consecutive failure count, e.g. after a session refresh.
    pub fn reset_failures(&self) {
        self.lock().consecutive_failures = 0;
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> RateSnapshot {
        let state = self.lock();
        RateSnapshot {
            current_delay: state.current_delay,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
        }
    }
}

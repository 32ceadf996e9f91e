//! Constants for the download module (timeouts, pacing, worker pool).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (2 minutes; pages are single images).
pub const READ_TIMEOUT_SECS: u64 = 120;

/// Lower bound for the adaptive inter-request delay.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(2);

/// Upper bound for the adaptive inter-request delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(15);

/// Starting inter-request delay.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(3);

/// Consecutive successes needed before the delay decays.
pub const DEFAULT_DECAY_EVERY: u32 = 5;

/// Delay multiplier applied after a run of successes.
pub const DEFAULT_DECAY_FACTOR: f64 = 0.9;

/// Delay multiplier applied after a blocked response.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;

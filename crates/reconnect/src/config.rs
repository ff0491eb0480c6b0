//! Reconnect configuration with defaults.

use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ACTIVE: bool = true;

/// Seconds after startup during which reconnect is allowed; negative means forever
pub const DEFAULT_RECONNECT_WINDOW_SECONDS: i64 = -1;

/// Fraction of neighbors that must report this node behind
pub const DEFAULT_FALLEN_BEHIND_THRESHOLD: f64 = 0.5;

/// Socket timeout while a state is being transferred (5 minutes)
pub const DEFAULT_ASYNC_STREAM_TIMEOUT_SECS: u64 = 300;

/// Delay between reconnect attempts, also the per-learner teaching cooldown (10 minutes)
pub const DEFAULT_MINIMUM_TIME_BETWEEN_RECONNECTS_SECS: u64 = 600;

pub const DEFAULT_MAXIMUM_RECONNECT_FAILURES_BEFORE_SHUTDOWN: u32 = 10;

pub const DEFAULT_MAX_CONCURRENT_TEACHERS: usize = 1;

/// The share of roster weight whose signatures make a state trustworthy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningThreshold {
    /// At least a third
    #[default]
    StrongMinority,
    /// More than half
    Majority,
    /// More than two thirds
    SuperMajority,
}

impl SigningThreshold {
    #[must_use]
    pub fn is_satisfied_by(self, part: u64, whole: u64) -> bool {
        let (part, whole) = (u128::from(part), u128::from(whole));

        match self {
            Self::StrongMinority => part.saturating_mul(3) >= whole,
            Self::Majority => part.saturating_mul(2) > whole,
            Self::SuperMajority => part.saturating_mul(3) > whole.saturating_mul(2),
        }
    }
}

impl fmt::Display for SigningThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StrongMinority => "strong minority",
            Self::Majority => "majority",
            Self::SuperMajority => "super majority",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectConfig {
    /// Whether a node that fell behind may reconnect at all; if not it shuts down.
    pub active: bool,

    /// How long after startup reconnect stays allowed, `None` when unlimited.
    pub reconnect_window: Option<Duration>,

    pub fallen_behind_threshold: f64,

    pub async_stream_timeout: Duration,

    pub minimum_time_between_reconnects: Duration,

    pub maximum_reconnect_failures_before_shutdown: u32,

    pub max_concurrent_teachers: usize,

    pub signing_threshold: SigningThreshold,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            active: DEFAULT_ACTIVE,
            reconnect_window: window_from_seconds(DEFAULT_RECONNECT_WINDOW_SECONDS),
            fallen_behind_threshold: DEFAULT_FALLEN_BEHIND_THRESHOLD,
            async_stream_timeout: Duration::from_secs(DEFAULT_ASYNC_STREAM_TIMEOUT_SECS),
            minimum_time_between_reconnects: Duration::from_secs(
                DEFAULT_MINIMUM_TIME_BETWEEN_RECONNECTS_SECS,
            ),
            maximum_reconnect_failures_before_shutdown:
                DEFAULT_MAXIMUM_RECONNECT_FAILURES_BEFORE_SHUTDOWN,
            max_concurrent_teachers: DEFAULT_MAX_CONCURRENT_TEACHERS,
            signing_threshold: SigningThreshold::default(),
        }
    }
}

/// Maps the on-disk encoding of the reconnect window, where a negative value means unlimited.
#[must_use]
pub fn window_from_seconds(seconds: i64) -> Option<Duration> {
    u64::try_from(seconds).ok().map(Duration::from_secs)
}

/// Inverse of [`window_from_seconds`].
#[must_use]
pub fn window_to_seconds(window: Option<Duration>) -> i64 {
    window.map_or(-1, |window| {
        i64::try_from(window.as_secs()).unwrap_or(i64::MAX)
    })
}

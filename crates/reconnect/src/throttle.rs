//! Limits on how often and how many reconnects this node teaches.

use core::fmt;
use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use skein_primitives::clock::Clock;
use skein_primitives::node::NodeId;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Sessions {
    active: usize,
    last_by_learner: HashMap<NodeId, Instant>,
}

/// Bounds concurrent teaching sessions and spaces out sessions with the same learner.
pub struct TeacherThrottle {
    max_concurrent: usize,
    minimum_time_between: Duration,
    clock: Arc<dyn Clock>,
    sessions: Mutex<Sessions>,
}

impl TeacherThrottle {
    #[must_use]
    pub fn new(max_concurrent: usize, minimum_time_between: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_concurrent,
            minimum_time_between,
            clock,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Starts a session with `learner` if allowed. A `true` must be paired with
    /// [`Self::reconnect_attempt_finished`].
    pub fn initiate_reconnect(&self, learner: NodeId) -> bool {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();

        if sessions.active >= self.max_concurrent {
            debug!(%learner, active = sessions.active, "Too many teaching sessions");
            return false;
        }

        if let Some(last) = sessions.last_by_learner.get(&learner) {
            if now.saturating_duration_since(*last) < self.minimum_time_between {
                debug!(%learner, "Taught this learner too recently");
                return false;
            }
        }

        sessions.active = sessions.active.saturating_add(1);
        let _ignored = sessions.last_by_learner.insert(learner, now);

        true
    }

    pub fn reconnect_attempt_finished(&self) {
        let mut sessions = self.sessions.lock();

        match sessions.active.checked_sub(1) {
            Some(active) => sessions.active = active,
            None => warn!("Teaching session finished without having started"),
        }
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.sessions.lock().active
    }
}

impl fmt::Debug for TeacherThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeacherThrottle")
            .field("max_concurrent", &self.max_concurrent)
            .field("minimum_time_between", &self.minimum_time_between)
            .field("sessions", &*self.sessions.lock())
            .finish_non_exhaustive()
    }
}

/// Lets through at most one log line per key and period.
pub struct RateLimitedLogger {
    period: Duration,
    clock: Arc<dyn Clock>,
    last: Mutex<HashMap<&'static str, Instant>>,
}

impl RateLimitedLogger {
    #[must_use]
    pub fn new(period: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            period,
            clock,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a line for `key` may be written now; if so the period restarts.
    pub fn should_log(&self, key: &'static str) -> bool {
        let now = self.clock.now();
        let mut last = self.last.lock();

        match last.get(key) {
            Some(at) if now.saturating_duration_since(*at) < self.period => false,
            _ => {
                let _ignored = last.insert(key, now);
                true
            }
        }
    }
}

impl fmt::Debug for RateLimitedLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedLogger")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use skein_primitives::clock::FakeClock;

    use super::*;

    #[test]
    fn test_concurrency_limit() {
        let throttle = TeacherThrottle::new(1, Duration::ZERO, Arc::new(FakeClock::new()));

        assert!(throttle.initiate_reconnect(NodeId::new(1)), "first");
        assert!(!throttle.initiate_reconnect(NodeId::new(2)), "limit reached");

        throttle.reconnect_attempt_finished();
        assert!(throttle.initiate_reconnect(NodeId::new(2)), "slot freed");
        assert_eq!(throttle.active(), 1, "one session");
    }

    #[test]
    fn test_same_learner_cooldown() {
        let clock = Arc::new(FakeClock::new());
        let throttle = TeacherThrottle::new(2, Duration::from_secs(60), Arc::clone(&clock) as _);

        assert!(throttle.initiate_reconnect(NodeId::new(1)), "first");
        throttle.reconnect_attempt_finished();

        assert!(!throttle.initiate_reconnect(NodeId::new(1)), "too soon");
        assert!(throttle.initiate_reconnect(NodeId::new(2)), "other learner");
        throttle.reconnect_attempt_finished();

        clock.advance(Duration::from_secs(60));
        assert!(throttle.initiate_reconnect(NodeId::new(1)), "cooled down");
    }

    #[test]
    fn test_rate_limited_logger() {
        let clock = Arc::new(FakeClock::new());
        let logger = RateLimitedLogger::new(Duration::from_secs(10), Arc::clone(&clock) as _);

        assert!(logger.should_log("behind"), "first line");
        assert!(!logger.should_log("behind"), "suppressed");
        assert!(logger.should_log("not active"), "keys are independent");

        clock.advance(Duration::from_secs(10));
        assert!(logger.should_log("behind"), "period over");
    }
}

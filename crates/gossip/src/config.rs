//! Gossip synchronization configuration with defaults.
//!
//! All tunables are named constants so the TOML layer and tests share a single source of truth.

use core::time::Duration;

/// Pause after a finished RPC sync before the same peer is synced again (5 ms)
pub const DEFAULT_RPC_SLEEP_AFTER_SYNC_MS: u64 = 5;

/// Events sent to one peer in a single sync; `0` lifts the limit
pub const DEFAULT_MAX_SYNC_EVENT_COUNT: usize = 5000;

/// Upper bound on the event streaming phase of a blocking sync (1 minute)
pub const DEFAULT_MAX_SYNC_TIME_SECS: u64 = 60;

/// Keepalive cadence while a blocking sync waits for the peer to finish (500 ms)
pub const DEFAULT_SYNC_KEEPALIVE_PERIOD_MS: u64 = 500;

pub const DEFAULT_FILTER_LIKELY_DUPLICATES: bool = true;

/// Age after which a non-ancestor event is sent even though the peer probably has it (3 seconds)
pub const DEFAULT_NON_ANCESTOR_FILTER_THRESHOLD_SECS: u64 = 3;

pub const DEFAULT_BROADCAST: bool = false;

/// Tick of the per-peer RPC dispatch loop when no message arrives (5 ms)
pub const DEFAULT_RPC_IDLE_DISPATCH_POLL_TIMEOUT_MS: u64 = 5;

/// Fair sync limit; negative disables, `(0, 1]` is a fraction of the roster, above 1 a count
pub const DEFAULT_FAIR_MAX_CONCURRENT_SYNCS: f64 = -1.0;

/// Distinct peers that must be synced before one may be synced again, same encoding
pub const DEFAULT_FAIR_MINIMAL_ROUND_ROBIN_SIZE: f64 = 0.3;

/// Concurrent blocking syncs
pub const DEFAULT_SYNC_PROTOCOL_PERMIT_COUNT: usize = 17;

/// Gossip synchronization configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyncConfig {
    pub rpc_sleep_after_sync: Duration,

    /// Maximum events per sync, `0` meaning unbounded. Read through [`SyncConfig::event_limit`].
    pub max_sync_event_count: usize,

    pub max_sync_time: Duration,

    pub sync_keepalive_period: Duration,

    pub filter_likely_duplicates: bool,

    pub non_ancestor_filter_threshold: Duration,

    /// Push self events to every RPC peer as soon as they are created
    pub broadcast: bool,

    pub rpc_idle_dispatch_poll_timeout: Duration,

    pub fair_max_concurrent_syncs: f64,

    pub fair_minimal_round_robin_size: f64,

    pub sync_protocol_permit_count: usize,
}

impl SyncConfig {
    /// The event cap, `None` when unbounded.
    #[must_use]
    pub const fn event_limit(&self) -> Option<usize> {
        match self.max_sync_event_count {
            0 => None,
            limit => Some(limit),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rpc_sleep_after_sync: Duration::from_millis(DEFAULT_RPC_SLEEP_AFTER_SYNC_MS),
            max_sync_event_count: DEFAULT_MAX_SYNC_EVENT_COUNT,
            max_sync_time: Duration::from_secs(DEFAULT_MAX_SYNC_TIME_SECS),
            sync_keepalive_period: Duration::from_millis(DEFAULT_SYNC_KEEPALIVE_PERIOD_MS),
            filter_likely_duplicates: DEFAULT_FILTER_LIKELY_DUPLICATES,
            non_ancestor_filter_threshold: Duration::from_secs(
                DEFAULT_NON_ANCESTOR_FILTER_THRESHOLD_SECS,
            ),
            broadcast: DEFAULT_BROADCAST,
            rpc_idle_dispatch_poll_timeout: Duration::from_millis(
                DEFAULT_RPC_IDLE_DISPATCH_POLL_TIMEOUT_MS,
            ),
            fair_max_concurrent_syncs: DEFAULT_FAIR_MAX_CONCURRENT_SYNCS,
            fair_minimal_round_robin_size: DEFAULT_FAIR_MINIMAL_ROUND_ROBIN_SIZE,
            sync_protocol_permit_count: DEFAULT_SYNC_PROTOCOL_PERMIT_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_event_count_is_unbounded() {
        let config = SyncConfig {
            max_sync_event_count: 0,
            ..SyncConfig::default()
        };

        assert_eq!(config.event_limit(), None, "zero is the unbounded sentinel");
        assert_eq!(
            SyncConfig::default().event_limit(),
            Some(DEFAULT_MAX_SYNC_EVENT_COUNT),
            "default is bounded"
        );
    }
}

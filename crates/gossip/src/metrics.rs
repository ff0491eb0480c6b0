//! Prometheus metrics for gossip synchronization.
//!
//! - `gossip_syncs_started` / `gossip_syncs_finished` / `gossip_syncs_aborted`
//! - `gossip_events_sent` / `gossip_events_received`
//! - `gossip_broadcast_events_sent`
//! - `gossip_did_not_sync{reason}`: periodic checks that decided not to start a sync
//! - `gossip_fallen_behind{status}`: non-trivial fallen-behind verdicts
//! - `gossip_sync_phase{peer}`: current RPC phase per peer, as [`SyncPhase::ordinal`]
//! - `gossip_known_set_size`, `gossip_tips_per_sync`, `gossip_send_list_seconds`,
//!   `gossip_sync_duration_seconds`: histograms
//!
//! [`SyncPhase::ordinal`]: crate::rpc::SyncPhase::ordinal

use std::sync::atomic::{AtomicI64, AtomicU64};
use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use skein_primitives::node::NodeId;

use crate::rpc::SyncPhase;
use crate::sync::SyncFallenBehindStatus;

/// Why a periodic check did not start a sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DidNotSyncReason {
    Cooldown,
    PeerBehind,
    PeerStillSending,
    IntakeBacklog,
    FairSelector,
    AlreadyStarted,
    Unhealthy,
}

impl DidNotSyncReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cooldown => "cooldown",
            Self::PeerBehind => "peer_behind",
            Self::PeerStillSending => "peer_still_sending",
            Self::IntakeBacklog => "intake_backlog",
            Self::FairSelector => "fair_selector",
            Self::AlreadyStarted => "already_started",
            Self::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReasonLabels {
    reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PeerLabels {
    peer: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StatusLabels {
    status: String,
}

#[derive(Debug)]
pub struct SyncMetrics {
    syncs_started: Counter<u64, AtomicU64>,
    syncs_finished: Counter<u64, AtomicU64>,
    syncs_aborted: Counter<u64, AtomicU64>,
    events_sent: Counter<u64, AtomicU64>,
    events_received: Counter<u64, AtomicU64>,
    broadcast_events_sent: Counter<u64, AtomicU64>,
    did_not_sync: Family<ReasonLabels, Counter>,
    fallen_behind: Family<StatusLabels, Counter>,
    sync_phase: Family<PeerLabels, Gauge<i64, AtomicI64>>,
    known_set_size: Histogram,
    tips_per_sync: Histogram,
    send_list_seconds: Histogram,
    sync_duration_seconds: Histogram,
}

impl SyncMetrics {
    /// Creates the metrics and registers them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::unregistered();

        registry.register(
            "gossip_syncs_started",
            "Syncs this node started",
            metrics.syncs_started.clone(),
        );
        registry.register(
            "gossip_syncs_finished",
            "Sync rounds completed in both directions",
            metrics.syncs_finished.clone(),
        );
        registry.register(
            "gossip_syncs_aborted",
            "Syncs abandoned because of a transport or protocol failure",
            metrics.syncs_aborted.clone(),
        );
        registry.register(
            "gossip_events_sent",
            "Events sent to peers during syncs",
            metrics.events_sent.clone(),
        );
        registry.register(
            "gossip_events_received",
            "Events received from peers during syncs",
            metrics.events_received.clone(),
        );
        registry.register(
            "gossip_broadcast_events_sent",
            "Self events pushed to peers out of band",
            metrics.broadcast_events_sent.clone(),
        );
        registry.register(
            "gossip_did_not_sync",
            "Periodic checks that did not start a sync, by reason",
            metrics.did_not_sync.clone(),
        );
        registry.register(
            "gossip_fallen_behind",
            "Syncs ending with one side fallen behind",
            metrics.fallen_behind.clone(),
        );
        registry.register(
            "gossip_sync_phase",
            "Current RPC sync phase per peer",
            metrics.sync_phase.clone(),
        );
        registry.register(
            "gossip_known_set_size",
            "Events the peer is known to have, ancestors included, at send list construction",
            metrics.known_set_size.clone(),
        );
        registry.register(
            "gossip_tips_per_sync",
            "Tips advertised by this node per sync",
            metrics.tips_per_sync.clone(),
        );
        registry.register(
            "gossip_send_list_seconds",
            "Time spent building send lists",
            metrics.send_list_seconds.clone(),
        );
        registry.register(
            "gossip_sync_duration_seconds",
            "Duration of completed sync rounds",
            metrics.sync_duration_seconds.clone(),
        );

        metrics
    }

    /// Metrics that are recorded but never exported.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            syncs_started: Counter::default(),
            syncs_finished: Counter::default(),
            syncs_aborted: Counter::default(),
            events_sent: Counter::default(),
            events_received: Counter::default(),
            broadcast_events_sent: Counter::default(),
            did_not_sync: Family::default(),
            fallen_behind: Family::default(),
            sync_phase: Family::default(),
            // 1 to ~16k events
            known_set_size: Histogram::new(exponential_buckets(1.0, 2.0, 15)),
            tips_per_sync: Histogram::new(exponential_buckets(1.0, 2.0, 10)),
            // 10us to ~160ms
            send_list_seconds: Histogram::new(exponential_buckets(0.000_01, 2.0, 15)),
            // 1ms to ~16s
            sync_duration_seconds: Histogram::new(exponential_buckets(0.001, 2.0, 15)),
        }
    }

    pub fn sync_started(&self, tips: usize) {
        let _ = self.syncs_started.inc();
        self.tips_per_sync.observe(tips as f64);
    }

    pub fn sync_finished(&self, duration: Duration) {
        let _ = self.syncs_finished.inc();
        self.sync_duration_seconds.observe(duration.as_secs_f64());
    }

    pub fn sync_aborted(&self) {
        let _ = self.syncs_aborted.inc();
    }

    pub fn events_sent(&self, count: usize) {
        let _ = self.events_sent.inc_by(count as u64);
    }

    pub fn events_received(&self, count: usize) {
        let _ = self.events_received.inc_by(count as u64);
    }

    pub fn broadcast_event_sent(&self) {
        let _ = self.broadcast_events_sent.inc();
    }

    pub fn did_not_sync(&self, reason: DidNotSyncReason) {
        let labels = ReasonLabels {
            reason: reason.as_str().to_owned(),
        };
        let _ = self.did_not_sync.get_or_create(&labels).inc();
    }

    pub fn fallen_behind(&self, status: SyncFallenBehindStatus) {
        let labels = StatusLabels {
            status: status.to_string(),
        };
        let _ = self.fallen_behind.get_or_create(&labels).inc();
    }

    pub fn report_phase(&self, peer: NodeId, phase: SyncPhase) {
        let labels = PeerLabels {
            peer: peer.to_string(),
        };
        let _ = self.sync_phase.get_or_create(&labels).set(phase.ordinal());
    }

    pub fn forget_peer(&self, peer: NodeId) {
        let labels = PeerLabels {
            peer: peer.to_string(),
        };
        let _ = self.sync_phase.remove(&labels);
    }

    pub fn known_set_size(&self, size: usize) {
        self.known_set_size.observe(size as f64);
    }

    pub fn send_list_time(&self, elapsed: Duration) {
        self.send_list_seconds.observe(elapsed.as_secs_f64());
    }

    #[must_use]
    pub fn finished_count(&self) -> u64 {
        self.syncs_finished.get()
    }

    #[must_use]
    pub fn aborted_count(&self) -> u64 {
        self.syncs_aborted.get()
    }

    #[must_use]
    pub fn events_sent_count(&self) -> u64 {
        self.events_sent.get()
    }

    #[must_use]
    pub fn broadcast_count(&self) -> u64 {
        self.broadcast_events_sent.get()
    }

    #[must_use]
    pub fn did_not_sync_count(&self, reason: DidNotSyncReason) -> u64 {
        let labels = ReasonLabels {
            reason: reason.as_str().to_owned(),
        };
        self.did_not_sync.get_or_create(&labels).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_registered() {
        let mut registry = Registry::default();
        let metrics = SyncMetrics::new(&mut registry);

        metrics.sync_started(3);
        metrics.did_not_sync(DidNotSyncReason::Cooldown);
        metrics.report_phase(NodeId::new(2), SyncPhase::ExchangingTips);

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &registry).expect("encodable");

        assert!(buffer.contains("gossip_syncs_started"), "counter exported");
        assert!(buffer.contains("reason=\"cooldown\""), "labelled counter exported");
        assert!(buffer.contains("peer=\"node2\""), "phase gauge exported");
    }

    #[test]
    fn test_metrics_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncMetrics>();
    }

    #[test]
    fn test_counters_read_back() {
        let metrics = SyncMetrics::unregistered();

        metrics.events_sent(4);
        metrics.sync_finished(Duration::from_millis(3));
        metrics.did_not_sync(DidNotSyncReason::PeerBehind);

        assert_eq!(metrics.events_sent_count(), 4, "inc_by");
        assert_eq!(metrics.finished_count(), 1, "inc");
        assert_eq!(
            metrics.did_not_sync_count(DidNotSyncReason::PeerBehind),
            1,
            "by reason"
        );
    }
}

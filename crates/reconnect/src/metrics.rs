//! Prometheus metrics for reconnect.
//!
//! - `reconnect_rejections{peer}`: teacher role refused, per learner
//! - `reconnect_learner_started` / `reconnect_learner_finished`
//! - `reconnect_teacher_started` / `reconnect_teacher_finished`
//! - `reconnect_failures`: failed attempts as seen by the controller

use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use skein_primitives::node::NodeId;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PeerLabels {
    peer: String,
}

#[derive(Debug)]
pub struct ReconnectMetrics {
    rejections: Family<PeerLabels, Counter>,
    learner_started: Counter<u64, AtomicU64>,
    learner_finished: Counter<u64, AtomicU64>,
    teacher_started: Counter<u64, AtomicU64>,
    teacher_finished: Counter<u64, AtomicU64>,
    failures: Counter<u64, AtomicU64>,
}

impl ReconnectMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::unregistered();

        registry.register(
            "reconnect_rejections",
            "Reconnect requests refused in the teacher role",
            metrics.rejections.clone(),
        );
        registry.register(
            "reconnect_learner_started",
            "State transfers started as learner",
            metrics.learner_started.clone(),
        );
        registry.register(
            "reconnect_learner_finished",
            "State transfers received and validated as learner",
            metrics.learner_finished.clone(),
        );
        registry.register(
            "reconnect_teacher_started",
            "State transfers started as teacher",
            metrics.teacher_started.clone(),
        );
        registry.register(
            "reconnect_teacher_finished",
            "State transfers completed as teacher",
            metrics.teacher_finished.clone(),
        );
        registry.register(
            "reconnect_failures",
            "Reconnect attempts that did not load a state",
            metrics.failures.clone(),
        );

        metrics
    }

    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            rejections: Family::default(),
            learner_started: Counter::default(),
            learner_finished: Counter::default(),
            teacher_started: Counter::default(),
            teacher_finished: Counter::default(),
            failures: Counter::default(),
        }
    }

    pub fn rejected(&self, peer: NodeId) {
        let _ = self.rejections.get_or_create(&peer_labels(peer)).inc();
    }

    pub fn learner_started(&self) {
        let _ = self.learner_started.inc();
    }

    pub fn learner_finished(&self) {
        let _ = self.learner_finished.inc();
    }

    pub fn teacher_started(&self) {
        let _ = self.teacher_started.inc();
    }

    pub fn teacher_finished(&self) {
        let _ = self.teacher_finished.inc();
    }

    pub fn failed(&self) {
        let _ = self.failures.inc();
    }

    #[must_use]
    pub fn rejection_count(&self, peer: NodeId) -> u64 {
        self.rejections.get_or_create(&peer_labels(peer)).get()
    }

    #[must_use]
    pub fn learner_finished_count(&self) -> u64 {
        self.learner_finished.get()
    }

    #[must_use]
    pub fn teacher_finished_count(&self) -> u64 {
        self.teacher_finished.get()
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.get()
    }
}

fn peer_labels(peer: NodeId) -> PeerLabels {
    PeerLabels {
        peer: peer.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_labelled_by_peer() {
        let mut registry = Registry::default();
        let metrics = ReconnectMetrics::new(&mut registry);

        metrics.rejected(NodeId::new(4));
        metrics.rejected(NodeId::new(4));
        metrics.failed();

        assert_eq!(metrics.rejection_count(NodeId::new(4)), 2, "counted");
        assert_eq!(metrics.rejection_count(NodeId::new(5)), 0, "other peer");

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &registry).expect("encodable");

        assert!(buffer.contains("reconnect_failures"), "exported");
        assert!(buffer.contains("peer=\"node4\""), "labelled");
    }
}

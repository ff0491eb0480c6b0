//! Quorum based detection of this node having fallen behind its neighbors.

use core::fmt;
use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use skein_primitives::node::NodeId;
use skein_primitives::status::{StatusAction, StatusActionSubmitter};
use tracing::{info, warn};

/// Kicks off the reconnect procedure. Must return promptly.
pub trait ReconnectStarter: Send + Sync {
    fn start_reconnect(&self);
}

#[derive(Debug, Default)]
struct Reports {
    peers: HashSet<NodeId>,
    previously_fallen_behind: bool,
}

/// Collects "you are behind" verdicts from peers.
///
/// This node counts as fallen behind once strictly more than `neighbors * threshold` distinct
/// peers reported it. The first crossing submits [`StatusAction::FallenBehind`] and starts the
/// reconnect; further reports are recorded but trigger nothing until [`Self::reset`].
pub struct FallenBehindMonitor {
    neighbors: usize,
    threshold: f64,
    status: Arc<dyn StatusActionSubmitter>,
    reconnect: OnceCell<Arc<dyn ReconnectStarter>>,
    reports: Mutex<Reports>,
}

impl FallenBehindMonitor {
    #[must_use]
    pub fn new(neighbors: usize, threshold: f64, status: Arc<dyn StatusActionSubmitter>) -> Self {
        Self {
            neighbors,
            threshold,
            status,
            reconnect: OnceCell::new(),
            reports: Mutex::new(Reports::default()),
        }
    }

    /// Wires in the reconnect procedure; later calls are ignored.
    pub fn set_reconnect_starter(&self, starter: Arc<dyn ReconnectStarter>) {
        if self.reconnect.set(starter).is_err() {
            warn!("Reconnect starter already set, ignoring");
        }
    }

    /// Records that `peer` considers this node behind.
    pub fn report(&self, peer: NodeId) {
        let crossed = {
            let mut reports = self.reports.lock();
            let _ = reports.peers.insert(peer);

            let crossed =
                !reports.previously_fallen_behind && self.quorum_reached(reports.peers.len());
            if crossed {
                reports.previously_fallen_behind = true;
            }
            crossed
        };

        if !crossed {
            return;
        }

        info!(%peer, neighbors = self.neighbors, "Fallen behind, starting reconnect");

        self.status.submit_status_action(StatusAction::FallenBehind);

        match self.reconnect.get() {
            Some(starter) => starter.start_reconnect(),
            None => warn!("Fallen behind but no reconnect starter is wired"),
        }
    }

    /// Withdraws `peer`'s report, if any.
    pub fn clear(&self, peer: NodeId) {
        let _ = self.reports.lock().peers.remove(&peer);
    }

    #[must_use]
    pub fn has_fallen_behind(&self) -> bool {
        self.quorum_reached(self.reports.lock().peers.len())
    }

    /// Whether reconnecting from `peer` is endorsed: we are behind and `peer` said so too.
    #[must_use]
    pub fn should_reconnect_from(&self, peer: NodeId) -> bool {
        let reports = self.reports.lock();

        self.quorum_reached(reports.peers.len()) && reports.peers.contains(&peer)
    }

    /// Forgets every report, typically after a successful reconnect.
    pub fn reset(&self) {
        let mut reports = self.reports.lock();
        reports.peers.clear();
        reports.previously_fallen_behind = false;
    }

    #[must_use]
    pub fn reported_size(&self) -> usize {
        self.reports.lock().peers.len()
    }

    fn quorum_reached(&self, reported: usize) -> bool {
        (self.neighbors as f64) * self.threshold < reported as f64
    }
}

impl fmt::Debug for FallenBehindMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallenBehindMonitor")
            .field("neighbors", &self.neighbors)
            .field("threshold", &self.threshold)
            .field("reports", &*self.reports.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use skein_primitives::status::RecordingStatusSubmitter;

    use super::*;

    #[derive(Default)]
    struct CountingStarter(AtomicUsize);

    impl ReconnectStarter for CountingStarter {
        fn start_reconnect(&self) {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn monitor(neighbors: usize) -> (FallenBehindMonitor, Arc<RecordingStatusSubmitter>, Arc<CountingStarter>) {
        let status = Arc::new(RecordingStatusSubmitter::default());
        let starter = Arc::new(CountingStarter::default());
        let monitor = FallenBehindMonitor::new(neighbors, 0.5, Arc::clone(&status) as _);
        monitor.set_reconnect_starter(Arc::clone(&starter) as _);
        (monitor, status, starter)
    }

    #[test]
    fn test_quorum_of_five_neighbors() {
        let (monitor, _, _) = monitor(5);

        for id in 1..=4 {
            monitor.report(NodeId::new(id));
        }
        assert!(monitor.has_fallen_behind(), "4 > 2.5");

        monitor.clear(NodeId::new(3));
        monitor.clear(NodeId::new(4));
        assert_eq!(monitor.reported_size(), 2, "two withdrawn");
        assert!(!monitor.has_fallen_behind(), "2 <= 2.5");
    }

    #[test]
    fn test_boundary_is_strict() {
        for neighbors in 1..=12_usize {
            let (monitor, _, _) = monitor(neighbors);
            let floor = neighbors / 2;

            for id in 0..floor {
                monitor.report(NodeId::new(id as u64));
            }
            assert!(!monitor.has_fallen_behind(), "{floor} reports of {neighbors} is not enough");

            monitor.report(NodeId::new(1000));
            assert!(monitor.has_fallen_behind(), "{} reports of {neighbors} is", floor + 1);
        }
    }

    #[test]
    fn test_first_crossing_fires_once() {
        let (monitor, status, starter) = monitor(4);

        for id in 1..=4 {
            monitor.report(NodeId::new(id));
        }

        assert_eq!(status.actions(), vec![StatusAction::FallenBehind], "one status action");
        assert_eq!(starter.0.load(Ordering::SeqCst), 1, "one reconnect start");

        monitor.reset();
        assert!(!monitor.has_fallen_behind(), "reset clears reports");

        for id in 1..=3 {
            monitor.report(NodeId::new(id));
        }
        assert_eq!(starter.0.load(Ordering::SeqCst), 2, "fires again after reset");
    }

    #[test]
    fn test_should_reconnect_only_from_reporters() {
        let (monitor, _, _) = monitor(2);

        monitor.report(NodeId::new(1));
        assert!(
            !monitor.should_reconnect_from(NodeId::new(1)),
            "1 of 2 is not a quorum"
        );

        monitor.report(NodeId::new(2));
        assert!(monitor.should_reconnect_from(NodeId::new(2)), "reporter");
        assert!(!monitor.should_reconnect_from(NodeId::new(9)), "not a reporter");
    }

    #[test]
    fn test_duplicate_reports_count_once() {
        let (monitor, _, _) = monitor(4);

        for _ in 0..5 {
            monitor.report(NodeId::new(1));
        }

        assert_eq!(monitor.reported_size(), 1, "a set of peers");
        assert!(!monitor.has_fallen_behind(), "one peer is not a quorum");
    }
}

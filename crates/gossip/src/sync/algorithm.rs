use core::fmt;
use std::collections::HashSet;
use std::sync::Arc;

use skein_primitives::clock::Clock;
use skein_primitives::event::PlatformEvent;
use skein_primitives::node::NodeId;
use skein_primitives::window::EventWindow;
use skein_shadowgraph::{ShadowEvent, Shadowgraph};
use tracing::{debug, info};

use super::status::SyncFallenBehindStatus;
use super::utils::{filter_likely_duplicates, sort_for_sending, unknown_non_ancient};
use crate::config::SyncConfig;
use crate::fallen_behind::FallenBehindMonitor;
use crate::metrics::SyncMetrics;

/// The transport independent part of a sync, shared by the blocking and RPC synchronizers.
pub struct SyncAlgorithm {
    self_id: NodeId,
    shadowgraph: Shadowgraph,
    fallen_behind: Arc<FallenBehindMonitor>,
    clock: Arc<dyn Clock>,
    metrics: Arc<SyncMetrics>,
    filter_likely_duplicates: bool,
    non_ancestor_filter_threshold: core::time::Duration,
    event_limit: Option<usize>,
}

impl SyncAlgorithm {
    #[must_use]
    pub fn new(
        self_id: NodeId,
        shadowgraph: Shadowgraph,
        fallen_behind: Arc<FallenBehindMonitor>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SyncMetrics>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            self_id,
            shadowgraph,
            fallen_behind,
            clock,
            metrics,
            filter_likely_duplicates: config.filter_likely_duplicates,
            non_ancestor_filter_threshold: config.non_ancestor_filter_threshold,
            event_limit: config.event_limit(),
        }
    }

    #[must_use]
    pub const fn self_id(&self) -> NodeId {
        self.self_id
    }

    #[must_use]
    pub const fn shadowgraph(&self) -> &Shadowgraph {
        &self.shadowgraph
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    #[must_use]
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn fallen_behind(&self) -> &FallenBehindMonitor {
        &self.fallen_behind
    }

    /// Compares windows and records the peer's verdict about us with the fallen-behind monitor.
    pub fn has_fallen_behind(
        &self,
        self_window: &EventWindow,
        other_window: &EventWindow,
        peer: NodeId,
    ) -> SyncFallenBehindStatus {
        let status = SyncFallenBehindStatus::get_status(self_window, other_window);

        if status == SyncFallenBehindStatus::SelfFallenBehind {
            self.fallen_behind.report(peer);
        } else {
            self.fallen_behind.clear(peer);
        }

        if status != SyncFallenBehindStatus::None {
            info!(
                %peer,
                %status,
                self_window = %self_window,
                other_window = %other_window,
                "Sync aborted, one side has fallen behind"
            );
            self.metrics.fallen_behind(status);
        }

        status
    }

    /// Events to send to a peer known to have every event in `known_set`.
    ///
    /// Nothing in the ancestor closure of `known_set` is ever returned. The result is sorted so
    /// that parents precede children, optionally thinned by the likely duplicate filter and
    /// capped at the configured event limit.
    pub fn create_send_list(
        &self,
        known_set: &HashSet<Arc<ShadowEvent>>,
        my_window: &EventWindow,
        their_window: &EventWindow,
    ) -> Vec<PlatformEvent> {
        let start = self.clock.now();

        let mut known_ancestors = self.shadowgraph.find_ancestors(
            known_set,
            unknown_non_ancient(known_set, my_window, their_window),
        );
        known_ancestors.extend(known_set.iter().cloned());

        self.metrics.known_set_size(known_ancestors.len());

        // tips may have moved since the reservation was taken
        let unknown = unknown_non_ancient(&known_ancestors, my_window, their_window);
        let unknown_tips: Vec<Arc<ShadowEvent>> = self
            .shadowgraph
            .tips()
            .into_iter()
            .filter(|tip| unknown(tip))
            .collect();

        let mut send_set = self.shadowgraph.find_ancestors(&unknown_tips, &unknown);
        send_set.extend(unknown_tips);

        let mut send_list: Vec<PlatformEvent> =
            send_set.iter().map(|shadow| shadow.event().clone()).collect();
        sort_for_sending(&mut send_list);

        if self.filter_likely_duplicates {
            send_list = filter_likely_duplicates(
                self.self_id,
                self.non_ancestor_filter_threshold,
                self.clock.now(),
                send_list,
            );
        }

        if let Some(limit) = self.event_limit {
            if send_list.len() > limit {
                debug!(dropped = send_list.len().saturating_sub(limit), limit, "Truncated send list");
                send_list.truncate(limit);
            }
        }

        self.metrics
            .send_list_time(self.clock.now().saturating_duration_since(start));

        send_list
    }
}

impl fmt::Debug for SyncAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncAlgorithm")
            .field("self_id", &self.self_id)
            .field("filter_likely_duplicates", &self.filter_likely_duplicates)
            .field("event_limit", &self.event_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use skein_primitives::clock::FakeClock;
    use skein_primitives::event::GossipEvent;
    use skein_primitives::hash::Hash;
    use prometheus_client::registry::Registry;
    use skein_primitives::status::RecordingStatusSubmitter;

    use super::*;

    struct Node {
        algorithm: SyncAlgorithm,
        clock: Arc<FakeClock>,
    }

    fn node(self_id: u64, config: SyncConfig) -> Node {
        node_with_metrics(self_id, config, SyncMetrics::unregistered())
    }

    fn node_with_metrics(self_id: u64, config: SyncConfig, metrics: SyncMetrics) -> Node {
        let clock = Arc::new(FakeClock::new());
        let monitor = Arc::new(FallenBehindMonitor::new(
            4,
            0.5,
            Arc::new(RecordingStatusSubmitter::default()),
        ));

        Node {
            algorithm: SyncAlgorithm::new(
                NodeId::new(self_id),
                Shadowgraph::new(),
                monitor,
                Arc::clone(&clock) as _,
                Arc::new(metrics),
                &config,
            ),
            clock,
        }
    }

    fn unfiltered() -> SyncConfig {
        SyncConfig {
            filter_likely_duplicates: false,
            ..SyncConfig::default()
        }
    }

    fn add(node: &Node, creator: u64, birth_round: u64, parents: &[&PlatformEvent]) -> PlatformEvent {
        let parents = parents.iter().map(|parent| *parent.descriptor()).collect();
        let event = PlatformEvent::new(
            GossipEvent::new(NodeId::new(creator), birth_round, parents, vec![]),
            node.clock.now(),
        );
        let _ = node.algorithm.shadowgraph().add_event(event.clone());
        event
    }

    fn hashes(events: &[PlatformEvent]) -> HashSet<Hash> {
        events.iter().map(PlatformEvent::hash).collect()
    }

    fn known(node: &Node, events: &[&PlatformEvent]) -> HashSet<Arc<ShadowEvent>> {
        events
            .iter()
            .filter_map(|event| node.algorithm.shadowgraph().shadow(&event.hash()))
            .collect()
    }

    #[test]
    fn test_disjoint_tips_are_exchanged() {
        let a = node(1, unfiltered());
        let b = node(2, unfiltered());

        // shared history
        let root = add(&a, 9, 1, &[]);
        let _ = b.algorithm.shadowgraph().add_event(root.clone());

        let a_only: Vec<_> = (0..3).map(|i| add(&a, 10 + i, 1, &[&root])).collect();
        let b_only: Vec<_> = (0..3).map(|i| add(&b, 20 + i, 1, &[&root])).collect();

        let window = EventWindow::genesis();

        // each side knows the root, the common ancestor
        let a_list = a
            .algorithm
            .create_send_list(&known(&a, &[&root]), &window, &window);
        let b_list = b
            .algorithm
            .create_send_list(&known(&b, &[&root]), &window, &window);

        assert_eq!(hashes(&a_list), hashes(&a_only), "a sends exactly its 3 events");
        assert_eq!(hashes(&b_list), hashes(&b_only), "b sends exactly its 3 events");
    }

    #[test]
    fn test_known_ancestors_are_never_sent() {
        let a = node(1, unfiltered());

        let e1 = add(&a, 1, 1, &[]);
        let e2 = add(&a, 2, 1, &[&e1]);
        let e3 = add(&a, 1, 2, &[&e2]);
        let side = add(&a, 3, 2, &[&e1]);
        let tip = add(&a, 1, 3, &[&e3, &side]);

        let window = EventWindow::genesis();
        let list = a.algorithm.create_send_list(&known(&a, &[&e3]), &window, &window);

        assert_eq!(
            hashes(&list),
            HashSet::from([side.hash(), tip.hash()]),
            "e1, e2, e3 are implied by e3"
        );
        assert_eq!(list.last().map(PlatformEvent::hash), Some(tip.hash()), "parents first");
    }

    #[test]
    fn test_ancient_events_are_not_sent() {
        let a = node(1, unfiltered());

        let old = add(&a, 2, 1, &[]);
        let new = add(&a, 2, 5, &[&old]);

        let mine = EventWindow::new(6, 7, 3, 1);
        let theirs = EventWindow::new(6, 7, 3, 1);
        let list = a.algorithm.create_send_list(&HashSet::new(), &mine, &theirs);

        assert_eq!(hashes(&list), HashSet::from([new.hash()]), "round 1 is ancient");
    }

    #[test]
    fn test_zero_limit_is_unbounded_and_positive_limit_truncates() {
        let unbounded = node(
            1,
            SyncConfig {
                max_sync_event_count: 0,
                ..unfiltered()
            },
        );
        let capped = node(
            1,
            SyncConfig {
                max_sync_event_count: 2,
                ..unfiltered()
            },
        );

        for n in [&unbounded, &capped] {
            let mut parent = add(n, 1, 1, &[]);
            for _ in 0..4 {
                parent = add(n, 1, 1, &[&parent]);
            }
        }

        let window = EventWindow::genesis();
        assert_eq!(
            unbounded
                .algorithm
                .create_send_list(&HashSet::new(), &window, &window)
                .len(),
            5,
            "everything"
        );

        let truncated = capped
            .algorithm
            .create_send_list(&HashSet::new(), &window, &window);
        assert_eq!(truncated.len(), 2, "capped");
        assert!(
            truncated.iter().all(|event| event.generation() <= 2),
            "oldest kept so parents precede children"
        );
    }

    #[test]
    fn test_duplicate_filter_waits_for_threshold() {
        let a = node(1, SyncConfig::default());

        let foreign = add(&a, 5, 1, &[]);
        let window = EventWindow::genesis();

        let early = a.algorithm.create_send_list(&HashSet::new(), &window, &window);
        assert!(early.is_empty(), "young non-self event withheld");

        a.clock.advance(Duration::from_secs(4));
        let late = a.algorithm.create_send_list(&HashSet::new(), &window, &window);
        assert_eq!(hashes(&late), HashSet::from([foreign.hash()]), "eligible once old");

        let own = add(&a, 1, 1, &[]);
        let with_own = a.algorithm.create_send_list(&HashSet::new(), &window, &window);
        assert!(hashes(&with_own).contains(&own.hash()), "self events always sent");
    }

    #[test]
    fn test_has_fallen_behind_reports_to_monitor() {
        let a = node(1, unfiltered());
        let peer = NodeId::new(2);

        let status = a.algorithm.has_fallen_behind(
            &EventWindow::genesis(),
            &EventWindow::new(100, 101, 1000, 800),
            peer,
        );
        assert_eq!(status, SyncFallenBehindStatus::SelfFallenBehind, "genesis is behind");
        assert_eq!(a.algorithm.fallen_behind().reported_size(), 1, "reported");

        let status = a.algorithm.has_fallen_behind(
            &EventWindow::genesis(),
            &EventWindow::genesis(),
            peer,
        );
        assert_eq!(status, SyncFallenBehindStatus::None, "caught up");
        assert_eq!(a.algorithm.fallen_behind().reported_size(), 0, "cleared");
    }

    #[test]
    fn test_send_list_ignores_instant_skew() {
        let a = node(1, SyncConfig::default());
        let future = PlatformEvent::new(
            GossipEvent::new(NodeId::new(7), 1, vec![], vec![]),
            Instant::now() + Duration::from_secs(3600),
        );
        let _ = a.algorithm.shadowgraph().add_event(future);

        let window = EventWindow::genesis();
        let list = a.algorithm.create_send_list(&HashSet::new(), &window, &window);

        assert!(list.is_empty(), "receipt time in the future counts as young");
    }

    #[test]
    fn test_known_set_metric_counts_known_ancestors() {
        let mut registry = Registry::default();
        let a = node_with_metrics(1, unfiltered(), SyncMetrics::new(&mut registry));

        let e1 = add(&a, 1, 1, &[]);
        let e2 = add(&a, 2, 1, &[&e1]);
        let e3 = add(&a, 1, 2, &[&e2]);

        let window = EventWindow::genesis();
        let list = a.algorithm.create_send_list(&known(&a, &[&e3]), &window, &window);
        assert!(list.is_empty(), "the peer has everything");

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &registry).expect("encodable");

        assert!(
            buffer.contains("gossip_known_set_size_sum 3.0"),
            "e3 implies e1 and e2:\n{buffer}"
        );
    }
}

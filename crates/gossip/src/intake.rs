//! Hand-off of received events to intake, and the per-peer backlog counter gossip uses for
//! backpressure.

use core::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use skein_primitives::event::PlatformEvent;
use skein_primitives::node::NodeId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Counts events each peer sent us that intake has not finished with yet.
pub trait IntakeEventCounter: Debug + Send + Sync {
    fn has_unprocessed_events(&self, peer: NodeId) -> bool;

    fn event_entered_intake_pipeline(&self, peer: NodeId);

    /// Called by intake when an event leaves the pipeline, whatever the outcome.
    fn event_exited_intake_pipeline(&self, peer: Option<NodeId>);

    fn reset(&self);
}

#[derive(Debug, Default)]
pub struct DefaultIntakeEventCounter {
    unprocessed: DashMap<NodeId, AtomicUsize>,
}

impl DefaultIntakeEventCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn unprocessed(&self, peer: NodeId) -> usize {
        self.unprocessed
            .get(&peer)
            .map_or(0, |count| count.load(Ordering::Acquire))
    }
}

impl IntakeEventCounter for DefaultIntakeEventCounter {
    fn has_unprocessed_events(&self, peer: NodeId) -> bool {
        self.unprocessed(peer) > 0
    }

    fn event_entered_intake_pipeline(&self, peer: NodeId) {
        let _ = self
            .unprocessed
            .entry(peer)
            .or_default()
            .fetch_add(1, Ordering::AcqRel);
    }

    fn event_exited_intake_pipeline(&self, peer: Option<NodeId>) {
        let Some(peer) = peer else {
            return;
        };

        let Some(count) = self.unprocessed.get(&peer) else {
            warn!(%peer, "Event left intake without having entered it");
            return;
        };

        if count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
        {
            warn!(%peer, "Intake counter would drop below zero");
        }
    }

    fn reset(&self) {
        self.unprocessed.clear();
    }
}

/// Counter for deployments without backpressure.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpIntakeEventCounter;

impl IntakeEventCounter for NoOpIntakeEventCounter {
    fn has_unprocessed_events(&self, _peer: NodeId) -> bool {
        false
    }

    fn event_entered_intake_pipeline(&self, _peer: NodeId) {}

    fn event_exited_intake_pipeline(&self, _peer: Option<NodeId>) {}

    fn reset(&self) {}
}

/// Where synchronizers deliver received events. Must not block.
pub trait EventSink: Send + Sync {
    fn accept(&self, event: PlatformEvent);
}

impl EventSink for mpsc::UnboundedSender<PlatformEvent> {
    fn accept(&self, event: PlatformEvent) {
        if let Err(err) = self.send(event) {
            debug!(hash = %err.0.hash(), "Intake is gone, dropping event");
        }
    }
}

use core::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use skein_primitives::clock::Clock;
use skein_primitives::connection::Connection;
use skein_primitives::node::NodeId;
use skein_primitives::protocol::PeerProtocol;
use tracing::trace;

use super::blocking::ShadowgraphSynchronizer;
use crate::controller::{SyncGate, SyncPermitProvider};
use crate::error::SyncError;
use crate::intake::IntakeEventCounter;

/// Negotiates blocking syncs with a single peer.
pub struct SyncPeerProtocol {
    peer: NodeId,
    synchronizer: Arc<ShadowgraphSynchronizer>,
    gate: Arc<SyncGate>,
    permits: Arc<SyncPermitProvider>,
    intake: Arc<dyn IntakeEventCounter>,
    clock: Arc<dyn Clock>,
    sleep_after_sync: Duration,
    last_sync: Option<Instant>,
}

impl SyncPeerProtocol {
    #[must_use]
    pub fn new(
        peer: NodeId,
        synchronizer: Arc<ShadowgraphSynchronizer>,
        gate: Arc<SyncGate>,
        permits: Arc<SyncPermitProvider>,
        intake: Arc<dyn IntakeEventCounter>,
        clock: Arc<dyn Clock>,
        sleep_after_sync: Duration,
    ) -> Self {
        Self {
            peer,
            synchronizer,
            gate,
            permits,
            intake,
            clock,
            sleep_after_sync,
            last_sync: None,
        }
    }

    #[must_use]
    pub const fn peer(&self) -> NodeId {
        self.peer
    }

    fn should_sync(&self) -> bool {
        if !self.gate.is_healthy() {
            trace!(peer = %self.peer, "Not syncing, gossip unhealthy");
            return false;
        }

        if let Some(last_sync) = self.last_sync {
            if self.clock.elapsed_since(last_sync) < self.sleep_after_sync {
                return false;
            }
        }

        if self.intake.has_unprocessed_events(self.peer) {
            trace!(peer = %self.peer, "Not syncing, intake still busy with this peer's events");
            return false;
        }

        true
    }
}

impl<C: Connection> PeerProtocol<C> for SyncPeerProtocol {
    type Error = SyncError;

    fn should_initiate(&mut self) -> bool {
        self.should_sync() && self.permits.try_acquire()
    }

    fn initiate_failed(&mut self) {
        self.permits.release();
    }

    fn should_accept(&mut self) -> bool {
        self.should_sync() && self.permits.try_acquire()
    }

    fn accept_failed(&mut self) {
        self.permits.release();
    }

    fn accept_on_simultaneous_initiate(&self) -> bool {
        true
    }

    fn run_protocol(&mut self, connection: &C) -> Result<(), SyncError> {
        let result = self.synchronizer.synchronize(connection);

        self.permits.release();
        self.last_sync = Some(self.clock.now());

        result.map(|_| ())
    }
}

impl fmt::Debug for SyncPeerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPeerProtocol")
            .field("peer", &self.peer)
            .field("last_sync", &self.last_sync)
            .finish_non_exhaustive()
    }
}

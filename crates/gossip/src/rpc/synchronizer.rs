use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use skein_primitives::event::PlatformEvent;
use skein_primitives::node::NodeId;
use skein_primitives::window::EventWindow;
use skein_shadowgraph::{Insertion, ShadowgraphError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::guard::SyncGuard;
use super::handler::RpcPeerHandler;
use super::message::GossipRpcSender;
use super::state::SyncCompleted;
use crate::config::SyncConfig;
use crate::controller::{GossipController, SyncGate};
use crate::intake::{EventSink, IntakeEventCounter};
use crate::sync::SyncAlgorithm;

/// Flags a handler publishes for readers on other threads.
#[derive(Debug, Default)]
pub(crate) struct PeerFlags {
    /// Advisory: read without synchronization by the broadcaster, a stale value only costs one
    /// redundant or skipped broadcast.
    pub(crate) peer_behind: AtomicBool,
    /// The handler holds a shadowgraph reservation for a round.
    pub(crate) in_round: AtomicBool,
}

/// How long [`GossipController::pause`] waits before breaking conversations again.
const ROUND_DRAIN_POLL: Duration = Duration::from_millis(100);

/// Number of rounds currently holding a shadowgraph reservation.
#[derive(Debug, Default)]
pub(crate) struct ActiveRounds {
    count: Mutex<usize>,
    idle: Condvar,
}

impl ActiveRounds {
    pub(crate) fn begin(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_add(1);
    }

    pub(crate) fn end(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            let _ = self.idle.notify_all();
        }
    }

    fn active(&self) -> usize {
        *self.count.lock()
    }

    /// Returns whether every round ended within `timeout`.
    fn wait_idle(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            let _ = self.idle.wait_for(&mut count, timeout);
        }
        *count == 0
    }
}

struct BroadcastTarget {
    sender: Arc<dyn GossipRpcSender>,
    flags: Arc<PeerFlags>,
}

/// State shared by every [`RpcPeerHandler`] of one node.
pub(crate) struct RpcShared {
    pub(crate) algorithm: Arc<SyncAlgorithm>,
    pub(crate) intake: Arc<dyn IntakeEventCounter>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) guard: Arc<dyn SyncGuard>,
    pub(crate) sleep_after_sync: Duration,
    pub(crate) completions: OnceCell<mpsc::UnboundedSender<SyncCompleted>>,
    pub(crate) gate: Arc<SyncGate>,
    pub(crate) rounds: ActiveRounds,
    broadcast: bool,
    peers: DashMap<NodeId, BroadcastTarget>,
}

impl RpcShared {
    /// Breaks the conversation of every peer in the middle of a round. Returns how many.
    fn break_active_rounds(&self) -> usize {
        let mut broken = 0_usize;

        for target in self.peers.iter() {
            if target.flags.in_round.load(Ordering::Acquire) {
                target.sender.break_conversation();
                broken = broken.saturating_add(1);
            }
        }

        broken
    }

    pub(crate) fn deregister(&self, peer: NodeId, flags: &Arc<PeerFlags>) {
        let removed = self
            .peers
            .remove_if(&peer, |_, target| Arc::ptr_eq(&target.flags, flags))
            .is_some();

        if removed {
            self.algorithm.metrics().forget_peer(peer);
            debug!(%peer, "Deregistered RPC peer");
        }
    }
}

/// Entry point of the RPC flavour of gossip: owns the shared state and hands out one
/// [`RpcPeerHandler`] per connected peer.
pub struct RpcShadowgraphSynchronizer {
    shared: Arc<RpcShared>,
}

impl RpcShadowgraphSynchronizer {
    #[must_use]
    pub fn new(
        algorithm: Arc<SyncAlgorithm>,
        intake: Arc<dyn IntakeEventCounter>,
        sink: Arc<dyn EventSink>,
        guard: Arc<dyn SyncGuard>,
        gate: Arc<SyncGate>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            shared: Arc::new(RpcShared {
                algorithm,
                intake,
                sink,
                guard,
                sleep_after_sync: config.rpc_sleep_after_sync,
                completions: OnceCell::new(),
                gate,
                rounds: ActiveRounds::default(),
                broadcast: config.broadcast,
                peers: DashMap::new(),
            }),
        }
    }

    /// Receives a [`SyncCompleted`] for every finished round; only the first listener is kept.
    pub fn set_completion_listener(&self, listener: mpsc::UnboundedSender<SyncCompleted>) {
        if self.shared.completions.set(listener).is_err() {
            warn!("Sync completion listener already set, ignoring");
        }
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<SyncGate> {
        &self.shared.gate
    }

    #[must_use]
    pub fn algorithm(&self) -> &Arc<SyncAlgorithm> {
        &self.shared.algorithm
    }

    /// Creates and registers the handler for a newly connected peer.
    ///
    /// A handler registered earlier for the same peer stops receiving broadcasts.
    pub fn create_peer_handler(
        &self,
        peer: NodeId,
        sender: Arc<dyn GossipRpcSender>,
    ) -> RpcPeerHandler {
        let flags = Arc::new(PeerFlags::default());

        let previous = self.shared.peers.insert(
            peer,
            BroadcastTarget {
                sender: Arc::clone(&sender),
                flags: Arc::clone(&flags),
            },
        );
        if previous.is_some() {
            debug!(%peer, "Replaced the handler of a reconnected peer");
        }

        RpcPeerHandler::new(peer, Arc::clone(&self.shared), sender, flags)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    /// Inserts an event into the shadowgraph, pushing self events to every peer when broadcast
    /// is enabled.
    pub fn add_event(&self, event: PlatformEvent) -> Insertion {
        let broadcast = (self.shared.broadcast
            && event.creator() == self.shared.algorithm.self_id())
        .then(|| event.gossip_event().clone());

        let insertion = self.shared.algorithm.shadowgraph().add_event(event);

        if let Some(gossip) = broadcast {
            for target in self.shared.peers.iter() {
                if target.flags.peer_behind.load(Ordering::Relaxed) {
                    continue;
                }
                target.sender.send_broadcast_event(gossip.clone());
            }
            self.shared.algorithm.metrics().broadcast_event_sent();
        }

        insertion
    }

    pub fn update_event_window(&self, window: EventWindow) -> Result<usize, ShadowgraphError> {
        self.shared.algorithm.shadowgraph().update_event_window(window)
    }
}

impl GossipController for RpcShadowgraphSynchronizer {
    /// Halts new rounds, then breaks the conversations of peers mid-round and waits until each
    /// of their handlers has released its reservation.
    fn pause(&self) {
        self.shared.gate.halt();

        loop {
            let broken = self.shared.break_active_rounds();
            if self.shared.rounds.wait_idle(ROUND_DRAIN_POLL) {
                break;
            }
            debug!(
                broken,
                active = self.shared.rounds.active(),
                "Waiting for sync rounds to end"
            );
        }

        info!("Gossip paused");
    }

    fn resume(&self) {
        self.shared.intake.reset();
        self.shared.gate.unhalt();
        info!("Gossip resumed");
    }

    fn clear(&self) {
        self.shared.algorithm.shadowgraph().clear();
    }

    fn load_event_window(&self, window: EventWindow) -> Result<(), ShadowgraphError> {
        let evicted = self.update_event_window(window)?;
        info!(%window, evicted, "Gossip moved to the reconnect window");
        Ok(())
    }
}

impl fmt::Debug for RpcShadowgraphSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcShadowgraphSynchronizer")
            .field("peers", &self.shared.peers.len())
            .field("broadcast", &self.shared.broadcast)
            .field("active_rounds", &self.shared.rounds.active())
            .field("gate", &self.shared.gate)
            .finish_non_exhaustive()
    }
}

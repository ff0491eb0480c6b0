use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use skein_primitives::node::NodeId;
use tracing::{debug, error};

use crate::config::SyncConfig;

/// Decides which peers this node may start an RPC sync with.
pub trait SyncGuard: Send + Sync {
    /// Whether a sync we would initiate with `peer` may start; `true` also marks it in progress.
    fn is_sync_allowed(&self, peer: NodeId) -> bool;

    /// The peer started a sync that we are answering regardless of the guard.
    fn on_forced_sync(&self, peer: NodeId);

    fn on_sync_completed(&self, peer: NodeId);

    /// The peer left the network.
    fn remove_peer(&self, _peer: NodeId) {}
}

/// Lets every sync through.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpSyncGuard;

impl SyncGuard for NoOpSyncGuard {
    fn is_sync_allowed(&self, _peer: NodeId) -> bool {
        true
    }

    fn on_forced_sync(&self, _peer: NodeId) {}

    fn on_sync_completed(&self, _peer: NodeId) {}
}

#[derive(Debug, Default)]
struct LruState {
    in_progress: HashSet<NodeId>,
    /// Least recently synced first.
    recent: VecDeque<NodeId>,
}

/// Bounds concurrent outgoing syncs and spreads them round robin over the least recently synced
/// peers.
#[derive(Debug)]
pub struct LruSyncGuard {
    max_concurrent: usize,
    minimal_round_robin: usize,
    state: Mutex<LruState>,
}

impl LruSyncGuard {
    #[must_use]
    pub fn new(max_concurrent: usize, minimal_round_robin: usize) -> Self {
        Self {
            max_concurrent,
            minimal_round_robin,
            state: Mutex::new(LruState::default()),
        }
    }

    #[must_use]
    pub fn in_progress(&self) -> usize {
        self.state.lock().in_progress.len()
    }
}

impl SyncGuard for LruSyncGuard {
    fn is_sync_allowed(&self, peer: NodeId) -> bool {
        let mut state = self.state.lock();

        if state.in_progress.len() >= self.max_concurrent {
            return false;
        }

        if state.in_progress.contains(&peer) {
            error!(%peer, "Peer already holds a sync selector permit");
            return false;
        }

        let Some(index) = state.recent.iter().position(|recent| *recent == peer) else {
            let _ = state.in_progress.insert(peer);
            return true;
        };

        if state.recent.len() < self.minimal_round_robin {
            return false;
        }

        if index < self.max_concurrent {
            let _ = state.in_progress.insert(peer);
            return true;
        }

        false
    }

    fn on_forced_sync(&self, peer: NodeId) {
        if !self.state.lock().in_progress.insert(peer) {
            error!(%peer, "Peer already holds a sync selector permit");
        }
    }

    fn on_sync_completed(&self, peer: NodeId) {
        let mut state = self.state.lock();

        let _ = state.in_progress.remove(&peer);
        state.recent.retain(|recent| *recent != peer);
        // counts as recent even when the peer started it
        state.recent.push_back(peer);
    }

    fn remove_peer(&self, peer: NodeId) {
        let mut state = self.state.lock();

        state.recent.retain(|recent| *recent != peer);
        if state.in_progress.contains(&peer) {
            error!(%peer, "Peer removed while still syncing");
        }
    }
}

/// Resolves a fair selector setting against the roster size.
///
/// Values up to zero disable the setting, values in `(0, 1]` are a fraction of the roster
/// (rounded up) and larger values are an absolute count.
#[must_use]
pub fn resolve_fraction(value: f64, roster_size: usize) -> Option<usize> {
    if value <= 0.0 || value.is_nan() {
        return None;
    }

    let resolved = if value <= 1.0 {
        (value * roster_size as f64).ceil()
    } else {
        value.floor()
    };

    Some(resolved as usize)
}

/// The guard the configuration asks for: [`LruSyncGuard`] when a concurrency limit is set.
#[must_use]
pub fn sync_guard_from_config(config: &SyncConfig, roster_size: usize) -> Arc<dyn SyncGuard> {
    let Some(max_concurrent) = resolve_fraction(config.fair_max_concurrent_syncs, roster_size)
    else {
        debug!("Fair sync selection disabled");
        return Arc::new(NoOpSyncGuard);
    };

    let minimal_round_robin =
        resolve_fraction(config.fair_minimal_round_robin_size, roster_size).unwrap_or(0);

    debug!(max_concurrent, minimal_round_robin, "Fair sync selection enabled");

    Arc::new(LruSyncGuard::new(max_concurrent, minimal_round_robin))
}

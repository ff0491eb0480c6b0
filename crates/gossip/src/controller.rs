//! Global on/off switches for gossip, used by reconnect to quiesce and restart syncing.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use skein_primitives::status::StatusSource;
use skein_primitives::window::EventWindow;
use skein_shadowgraph::{Shadowgraph, ShadowgraphError};
use tracing::{debug, info, warn};

use crate::fallen_behind::FallenBehindMonitor;
use crate::intake::IntakeEventCounter;

/// What reconnect needs from gossip.
pub trait GossipController: Send + Sync {
    /// Stops new syncs and waits for in-flight ones to finish.
    fn pause(&self);

    /// Allows syncing again, forgetting any intake backlog accounted before the pause.
    fn resume(&self);

    /// Forgets every event, returning the shadowgraph to its genesis window.
    fn clear(&self);

    /// Moves the cleared shadowgraph to the window of the state reconnect just loaded.
    fn load_event_window(&self, window: EventWindow) -> Result<(), ShadowgraphError>;
}

/// Whether new syncs may start at all.
pub struct SyncGate {
    halted: AtomicBool,
    status: Arc<dyn StatusSource>,
    fallen_behind: Arc<FallenBehindMonitor>,
}

impl SyncGate {
    #[must_use]
    pub fn new(status: Arc<dyn StatusSource>, fallen_behind: Arc<FallenBehindMonitor>) -> Self {
        Self {
            halted: AtomicBool::new(false),
            status,
            fallen_behind,
        }
    }

    /// Not halted, not fallen behind, and the platform status permits gossip.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.is_halted()
            && !self.fallen_behind.has_fallen_behind()
            && self.status.current_status().permits_gossip()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub fn unhalt(&self) {
        self.halted.store(false, Ordering::Release);
    }
}

impl fmt::Debug for SyncGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncGate")
            .field("halted", &self.is_halted())
            .field("status", &self.status.current_status())
            .finish_non_exhaustive()
    }
}

/// Bounds the number of concurrently running blocking syncs.
#[derive(Debug)]
pub struct SyncPermitProvider {
    total: usize,
    available: Mutex<usize>,
    released: Condvar,
}

impl SyncPermitProvider {
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            available: Mutex::new(total),
            released: Condvar::new(),
        }
    }

    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut available = self.available.lock();

        if *available == 0 {
            return false;
        }

        *available = available.saturating_sub(1);
        true
    }

    pub fn release(&self) {
        let mut available = self.available.lock();

        if *available == self.total {
            warn!(total = self.total, "Released a sync permit that was never acquired");
            return;
        }

        *available = available.saturating_add(1);
        if *available == self.total {
            let _ = self.released.notify_all();
        }
    }

    /// Blocks until every acquired permit is back.
    pub fn wait_for_all_released(&self) {
        let mut available = self.available.lock();

        while *available < self.total {
            debug!(
                outstanding = self.total.saturating_sub(*available),
                "Waiting for syncs to finish"
            );
            self.released.wait(&mut available);
        }
    }

    #[must_use]
    pub fn available(&self) -> usize {
        *self.available.lock()
    }
}

/// [`GossipController`] for the blocking synchronizer.
pub struct BlockingGossipController {
    gate: Arc<SyncGate>,
    permits: Arc<SyncPermitProvider>,
    intake: Arc<dyn IntakeEventCounter>,
    shadowgraph: Shadowgraph,
}

impl BlockingGossipController {
    #[must_use]
    pub fn new(
        gate: Arc<SyncGate>,
        permits: Arc<SyncPermitProvider>,
        intake: Arc<dyn IntakeEventCounter>,
        shadowgraph: Shadowgraph,
    ) -> Self {
        Self {
            gate,
            permits,
            intake,
            shadowgraph,
        }
    }
}

impl GossipController for BlockingGossipController {
    fn pause(&self) {
        self.gate.halt();
        self.permits.wait_for_all_released();
        info!("Gossip paused");
    }

    fn resume(&self) {
        self.intake.reset();
        self.gate.unhalt();
        info!("Gossip resumed");
    }

    fn clear(&self) {
        self.shadowgraph.clear();
    }

    fn load_event_window(&self, window: EventWindow) -> Result<(), ShadowgraphError> {
        let evicted = self.shadowgraph.update_event_window(window)?;
        info!(%window, evicted, "Gossip moved to the reconnect window");
        Ok(())
    }
}

impl fmt::Debug for BlockingGossipController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingGossipController")
            .field("gate", &self.gate)
            .field("permits", &self.permits)
            .finish_non_exhaustive()
    }
}

//! Shadow graph: the in-memory event DAG gossip syncs against
//!
//! The graph mirrors every non-expired event this node knows about, linked to its parents by
//! hash. It is shared by event intake (inserts) and by every concurrent peer sync (tip snapshots,
//! ancestor searches, reservations), so all state sits behind one internal lock and callers
//! never lock anything themselves.
//!
//! ## Core Concepts
//!
//! - **ShadowEvent**: an event plus its parent links, immutable once inserted
//! - **Tip**: an event no currently known event names as a parent
//! - **ReservedEventWindow**: a window + tip snapshot that pins eviction until dropped

use core::fmt;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use skein_primitives::event::{EventDescriptor, PlatformEvent};
use skein_primitives::hash::Hash;
use skein_primitives::window::EventWindow;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// A node of the shadow graph.
pub struct ShadowEvent {
    event: PlatformEvent,
}

impl ShadowEvent {
    #[must_use]
    pub const fn event(&self) -> &PlatformEvent {
        &self.event
    }

    #[must_use]
    pub fn hash(&self) -> Hash {
        self.event.hash()
    }

    #[must_use]
    pub fn descriptor(&self) -> &EventDescriptor {
        self.event.descriptor()
    }

    pub fn parent_hashes(&self) -> impl Iterator<Item = Hash> + '_ {
        self.event.parents().iter().map(|parent| parent.hash)
    }
}

impl PartialEq for ShadowEvent {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for ShadowEvent {}

impl core::hash::Hash for ShadowEvent {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        core::hash::Hash::hash(&self.event.hash(), state);
    }
}

impl fmt::Debug for ShadowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ShadowEvent").field(&self.event).finish()
    }
}

/// What happened to an event handed to [`Shadowgraph::add_event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
    Inserted,
    Duplicate,
    /// Older than the expired threshold, there is nothing to attach it to.
    Expired,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShadowgraphError {
    #[error("event window moved backwards: ancient threshold {current} -> {requested}")]
    WindowRegressed { current: u64, requested: u64 },
}

/// Statistics about the shadow graph
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ShadowgraphStats {
    pub events: usize,
    pub tips: usize,
    pub reservations: usize,
}

#[derive(Debug)]
struct ReservationSlot {
    id: u64,
    window: EventWindow,
    count: usize,
}

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<Hash, Arc<ShadowEvent>>,

    /// Events nothing known points at yet
    tips: HashSet<Hash>,

    /// Hashes some inserted event lists as a parent
    referenced: HashSet<Hash>,

    by_birth_round: BTreeMap<u64, Vec<Hash>>,

    window: EventWindow,

    /// Oldest first, equal consecutive windows share a slot
    reservations: VecDeque<ReservationSlot>,

    next_slot_id: u64,
}

impl Inner {
    fn eviction_bound(&self) -> u64 {
        self.reservations
            .iter()
            .map(|slot| slot.window.expired_threshold)
            .fold(self.window.expired_threshold, u64::min)
    }

    fn expire(&mut self) -> usize {
        let bound = self.eviction_bound();
        let live = self.by_birth_round.split_off(&bound);
        let expired = core::mem::replace(&mut self.by_birth_round, live);

        let mut count = 0_usize;
        for hash in expired.into_values().flatten() {
            if self.events.remove(&hash).is_some() {
                count = count.saturating_add(1);
            }
            let _ = self.tips.remove(&hash);
            let _ = self.referenced.remove(&hash);
        }

        if count > 0 {
            debug!(expired = count, bound, "Expired events from the shadow graph");
        }

        count
    }

    fn sorted_tips(&self) -> Vec<Arc<ShadowEvent>> {
        let mut tips: Vec<_> = self
            .tips
            .iter()
            .filter_map(|hash| self.events.get(hash).cloned())
            .collect();
        tips.sort_by_key(|tip| (tip.descriptor().generation, tip.hash()));
        tips
    }

    fn release(&mut self, slot_id: u64) {
        if let Some(slot) = self.reservations.iter_mut().find(|slot| slot.id == slot_id) {
            slot.count = slot.count.saturating_sub(1);
        }

        while self
            .reservations
            .front()
            .is_some_and(|slot| slot.count == 0)
        {
            let _ = self.reservations.pop_front();
        }

        let _ = self.expire();
    }
}

/// Thread safe event DAG store.
///
/// Cloning yields another handle to the same graph.
#[derive(Clone, Debug, Default)]
pub struct Shadowgraph {
    inner: Arc<RwLock<Inner>>,
}

impl Shadowgraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an event received by intake or created locally.
    ///
    /// Parents of the new event stop being tips. The event becomes a tip unless some already
    /// known event names it as a parent.
    pub fn add_event(&self, event: PlatformEvent) -> Insertion {
        let mut inner = self.inner.write();
        let hash = event.hash();

        if inner.events.contains_key(&hash) {
            return Insertion::Duplicate;
        }

        if inner.window.is_expired_round(event.birth_round()) {
            trace!(%hash, window = %inner.window, "Rejected expired event");
            return Insertion::Expired;
        }

        for parent in event.parents() {
            let _ = inner.tips.remove(&parent.hash);
            let _ = inner.referenced.insert(parent.hash);
        }

        if !inner.referenced.contains(&hash) {
            let _ = inner.tips.insert(hash);
        }

        inner
            .by_birth_round
            .entry(event.birth_round())
            .or_default()
            .push(hash);
        let _ = inner
            .events
            .insert(hash, Arc::new(ShadowEvent { event }));

        Insertion::Inserted
    }

    /// Current tips ordered by (generation, hash).
    #[must_use]
    pub fn tips(&self) -> Vec<Arc<ShadowEvent>> {
        self.inner.read().sorted_tips()
    }

    #[must_use]
    pub fn shadow(&self, hash: &Hash) -> Option<Arc<ShadowEvent>> {
        self.inner.read().events.get(hash).cloned()
    }

    /// Looks up each hash, preserving order; unknown hashes map to `None`.
    #[must_use]
    pub fn shadows(&self, hashes: &[Hash]) -> Vec<Option<Arc<ShadowEvent>>> {
        let inner = self.inner.read();

        hashes
            .iter()
            .map(|hash| inner.events.get(hash).cloned())
            .collect()
    }

    #[must_use]
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().events.contains_key(hash)
    }

    /// Ancestor closure of `start`, walking parent links through events satisfying `predicate`.
    ///
    /// The start events themselves are only part of the result if reached as an ancestor of
    /// another start event. A parent failing the predicate is not traversed further.
    pub fn find_ancestors<'a, I, P>(&self, start: I, predicate: P) -> HashSet<Arc<ShadowEvent>>
    where
        I: IntoIterator<Item = &'a Arc<ShadowEvent>>,
        P: Fn(&ShadowEvent) -> bool,
    {
        let inner = self.inner.read();

        let mut ancestors = HashSet::new();
        let mut queue: VecDeque<Arc<ShadowEvent>> = start.into_iter().cloned().collect();

        while let Some(event) = queue.pop_front() {
            for parent_hash in event.parent_hashes() {
                let Some(parent) = inner.events.get(&parent_hash) else {
                    continue;
                };

                if ancestors.contains(parent) || !predicate(parent) {
                    continue;
                }

                let _ = ancestors.insert(Arc::clone(parent));
                queue.push_back(Arc::clone(parent));
            }
        }

        ancestors
    }

    /// Pins the current window and snapshots the tips.
    ///
    /// Nothing the returned window still considers live is evicted until it is dropped.
    #[must_use]
    pub fn reserve(&self) -> ReservedEventWindow {
        let mut inner = self.inner.write();
        let window = inner.window;

        let slot_id = match inner.reservations.back_mut() {
            Some(slot) if slot.window == window => {
                slot.count = slot.count.saturating_add(1);
                slot.id
            }
            _ => {
                let id = inner.next_slot_id;
                inner.next_slot_id = id.wrapping_add(1);
                inner.reservations.push_back(ReservationSlot {
                    id,
                    window,
                    count: 1,
                });
                id
            }
        };

        let tips = inner.sorted_tips();

        ReservedEventWindow {
            window,
            tips,
            slot_id,
            graph: Arc::clone(&self.inner),
        }
    }

    /// Moves the window forward and evicts what is expired and unpinned.
    ///
    /// Returns the number of events evicted.
    pub fn update_event_window(&self, window: EventWindow) -> Result<usize, ShadowgraphError> {
        let mut inner = self.inner.write();

        if window.ancient_threshold < inner.window.ancient_threshold {
            return Err(ShadowgraphError::WindowRegressed {
                current: inner.window.ancient_threshold,
                requested: window.ancient_threshold,
            });
        }

        inner.window = window;

        Ok(inner.expire())
    }

    #[must_use]
    pub fn event_window(&self) -> EventWindow {
        self.inner.read().window
    }

    /// Drops every event and returns to the genesis window.
    ///
    /// Outstanding reservations stay valid and are released as usual.
    pub fn clear(&self) {
        let mut inner = self.inner.write();

        let dropped = inner.events.len();
        inner.events.clear();
        inner.tips.clear();
        inner.referenced.clear();
        inner.by_birth_round.clear();
        inner.window = EventWindow::genesis();

        warn!(dropped, "Cleared the shadow graph");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> ShadowgraphStats {
        let inner = self.inner.read();

        ShadowgraphStats {
            events: inner.events.len(),
            tips: inner.tips.len(),
            reservations: inner.reservations.iter().map(|slot| slot.count).sum(),
        }
    }
}

/// A pinned window with the tips that were current when it was taken.
///
/// Dropping releases the pin; the snapshot cannot be read afterwards.
pub struct ReservedEventWindow {
    window: EventWindow,
    tips: Vec<Arc<ShadowEvent>>,
    slot_id: u64,
    graph: Arc<RwLock<Inner>>,
}

impl ReservedEventWindow {
    #[must_use]
    pub const fn window(&self) -> &EventWindow {
        &self.window
    }

    #[must_use]
    pub fn tips(&self) -> &[Arc<ShadowEvent>] {
        &self.tips
    }

    #[must_use]
    pub fn tip_hashes(&self) -> Vec<Hash> {
        self.tips.iter().map(|tip| tip.hash()).collect()
    }

    /// Explicit form of dropping.
    pub fn release(self) {}
}

impl Drop for ReservedEventWindow {
    fn drop(&mut self) {
        self.graph.write().release(self.slot_id);
    }
}

impl fmt::Debug for ReservedEventWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservedEventWindow")
            .field("window", &self.window)
            .field("tips", &self.tips.len())
            .finish_non_exhaustive()
    }
}

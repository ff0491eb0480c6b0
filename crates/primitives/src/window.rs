use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::event::EventDescriptor;

/// Birth round of the first events a network ever creates.
pub const ROUND_FIRST: u64 = 1;

/// Snapshot of the thresholds that decide which events are still interesting.
///
/// Events with a birth round below `ancient_threshold` take no further part in consensus and are
/// never gossiped. Events below `expired_threshold` may be dropped from memory altogether.
/// Windows only move forward over a node's lifetime.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct EventWindow {
    pub latest_consensus_round: u64,
    pub new_event_birth_round: u64,
    pub ancient_threshold: u64,
    pub expired_threshold: u64,
}

impl EventWindow {
    #[must_use]
    pub const fn new(
        latest_consensus_round: u64,
        new_event_birth_round: u64,
        ancient_threshold: u64,
        expired_threshold: u64,
    ) -> Self {
        Self {
            latest_consensus_round,
            new_event_birth_round,
            ancient_threshold,
            expired_threshold,
        }
    }

    /// The window of a node that has not reached consensus on anything yet.
    #[must_use]
    pub const fn genesis() -> Self {
        Self::new(0, ROUND_FIRST, ROUND_FIRST, ROUND_FIRST)
    }

    #[must_use]
    pub const fn is_genesis(&self) -> bool {
        self.latest_consensus_round == 0
    }

    #[must_use]
    pub const fn is_ancient(&self, event: &EventDescriptor) -> bool {
        self.is_ancient_round(event.birth_round)
    }

    #[must_use]
    pub const fn is_ancient_round(&self, birth_round: u64) -> bool {
        birth_round < self.ancient_threshold
    }

    #[must_use]
    pub const fn is_expired_round(&self, birth_round: u64) -> bool {
        birth_round < self.expired_threshold
    }
}

impl Default for EventWindow {
    fn default() -> Self {
        Self::genesis()
    }
}

impl fmt::Display for EventWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round={} birth={} ancient={} expired={}",
            self.latest_consensus_round,
            self.new_event_birth_round,
            self.ancient_threshold,
            self.expired_threshold
        )
    }
}

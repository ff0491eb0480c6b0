use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct RosterEntry {
    pub node_id: NodeId,
    pub weight: u64,
}

/// The weighted set of nodes taking part in consensus.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    /// Builds a roster, keeping entries ordered by node id.
    #[must_use]
    pub fn new(mut entries: Vec<RosterEntry>) -> Self {
        entries.sort_by_key(|entry| entry.node_id);
        entries.dedup_by_key(|entry| entry.node_id);

        Self { entries }
    }

    /// A roster where every node has the same weight.
    #[must_use]
    pub fn uniform(node_ids: impl IntoIterator<Item = NodeId>, weight: u64) -> Self {
        Self::new(
            node_ids
                .into_iter()
                .map(|node_id| RosterEntry { node_id, weight })
                .collect(),
        )
    }

    #[must_use]
    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.weight_of(node_id).is_some()
    }

    #[must_use]
    pub fn weight_of(&self, node_id: NodeId) -> Option<u64> {
        self.entries
            .binary_search_by_key(&node_id, |entry| entry.node_id)
            .ok()
            .and_then(|index| self.entries.get(index))
            .map(|entry| entry.weight)
    }

    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.entries
            .iter()
            .fold(0_u64, |total, entry| total.saturating_add(entry.weight))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|entry| entry.node_id)
    }
}

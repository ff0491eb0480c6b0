//! The event model as far as gossip is concerned: a hash, a creator, a birth round, parent
//! references and an opaque transaction batch.

use core::fmt;
use std::sync::Arc;
use std::time::Instant;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use crate::hash::Hash;
use crate::node::NodeId;

/// The identifying part of an event, also used to reference parents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct EventDescriptor {
    pub hash: Hash,
    pub creator: NodeId,
    pub birth_round: u64,
    pub generation: u64,
}

/// An event exactly as it travels between peers.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GossipEvent {
    descriptor: EventDescriptor,
    parents: Vec<EventDescriptor>,
    transactions: Vec<Vec<u8>>,
}

impl GossipEvent {
    /// Builds an event, deriving its generation from its parents and its hash from its content.
    #[must_use]
    pub fn new(
        creator: NodeId,
        birth_round: u64,
        parents: Vec<EventDescriptor>,
        transactions: Vec<Vec<u8>>,
    ) -> Self {
        let generation = parents
            .iter()
            .map(|parent| parent.generation)
            .max()
            .map_or(1, |max| max.saturating_add(1));

        let hash = content_hash(creator, birth_round, generation, &parents, &transactions);

        Self {
            descriptor: EventDescriptor {
                hash,
                creator,
                birth_round,
                generation,
            },
            parents,
            transactions,
        }
    }

    #[must_use]
    pub const fn descriptor(&self) -> &EventDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub const fn hash(&self) -> Hash {
        self.descriptor.hash
    }

    #[must_use]
    pub fn parents(&self) -> &[EventDescriptor] {
        &self.parents
    }

    #[must_use]
    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.transactions
    }

    /// Whether the advertised hash matches the event content.
    #[must_use]
    pub fn is_hash_valid(&self) -> bool {
        let descriptor = &self.descriptor;

        content_hash(
            descriptor.creator,
            descriptor.birth_round,
            descriptor.generation,
            &self.parents,
            &self.transactions,
        ) == descriptor.hash
    }
}

fn content_hash(
    creator: NodeId,
    birth_round: u64,
    generation: u64,
    parents: &[EventDescriptor],
    transactions: &[Vec<u8>],
) -> Hash {
    let mut hasher = Sha256::default();

    hasher.update(creator.get().to_le_bytes());
    hasher.update(birth_round.to_le_bytes());
    hasher.update(generation.to_le_bytes());
    for parent in parents {
        hasher.update(parent.hash.as_bytes());
    }
    for transaction in transactions {
        hasher.update((transaction.len() as u64).to_le_bytes());
        hasher.update(transaction);
    }

    let bytes: [u8; 32] = hasher.finalize().into();

    Hash::from(bytes)
}

/// A gossip event after it entered this node, annotated with local receipt metadata.
///
/// Cloning is cheap, the event body is shared.
#[derive(Clone)]
pub struct PlatformEvent {
    gossip: Arc<GossipEvent>,
    time_received: Instant,
    sender_id: Option<NodeId>,
}

impl PlatformEvent {
    #[must_use]
    pub fn new(gossip: GossipEvent, time_received: Instant) -> Self {
        Self {
            gossip: Arc::new(gossip),
            time_received,
            sender_id: None,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender_id: NodeId) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    #[must_use]
    pub fn gossip_event(&self) -> &GossipEvent {
        &self.gossip
    }

    #[must_use]
    pub fn descriptor(&self) -> &EventDescriptor {
        self.gossip.descriptor()
    }

    #[must_use]
    pub fn hash(&self) -> Hash {
        self.gossip.hash()
    }

    #[must_use]
    pub fn creator(&self) -> NodeId {
        self.gossip.descriptor().creator
    }

    #[must_use]
    pub fn birth_round(&self) -> u64 {
        self.gossip.descriptor().birth_round
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.gossip.descriptor().generation
    }

    #[must_use]
    pub fn parents(&self) -> &[EventDescriptor] {
        self.gossip.parents()
    }

    #[must_use]
    pub const fn time_received(&self) -> Instant {
        self.time_received
    }

    /// The peer this event was received from, `None` for self-created events.
    #[must_use]
    pub const fn sender_id(&self) -> Option<NodeId> {
        self.sender_id
    }
}

impl PartialEq for PlatformEvent {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for PlatformEvent {}

impl fmt::Debug for PlatformEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformEvent")
            .field("hash", &self.hash())
            .field("creator", &self.creator())
            .field("birth_round", &self.birth_round())
            .field("generation", &self.generation())
            .field("sender_id", &self.sender_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_follows_parents() {
        let genesis = GossipEvent::new(NodeId::new(1), 1, vec![], vec![]);
        assert_eq!(genesis.descriptor().generation, 1, "no parents");

        let other = GossipEvent::new(NodeId::new(2), 1, vec![], vec![b"tx".to_vec()]);
        let child = GossipEvent::new(
            NodeId::new(1),
            2,
            vec![*genesis.descriptor(), *other.descriptor()],
            vec![],
        );

        assert_eq!(child.descriptor().generation, 2, "max parent generation plus one");
        assert!(child.is_hash_valid(), "freshly built");
    }

    #[test]
    fn test_hash_covers_transactions() {
        let a = GossipEvent::new(NodeId::new(1), 1, vec![], vec![b"a".to_vec()]);
        let b = GossipEvent::new(NodeId::new(1), 1, vec![], vec![b"b".to_vec()]);

        assert_ne!(a.hash(), b.hash(), "content addressed");
    }

    #[test]
    fn test_tampered_event_fails_hash_check() {
        let event = GossipEvent::new(NodeId::new(3), 4, vec![], vec![b"x".to_vec()]);

        let mut bytes = borsh::to_vec(&event).expect("encodable");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let tampered: GossipEvent = borsh::from_slice(&bytes).expect("still decodable");
        assert!(!tampered.is_hash_valid(), "payload changed under the hash");
    }

    #[test]
    fn test_platform_event_sender() {
        let event = PlatformEvent::new(
            GossipEvent::new(NodeId::new(1), 1, vec![], vec![]),
            Instant::now(),
        );
        assert_eq!(event.sender_id(), None, "self created");

        let received = event.clone().with_sender(NodeId::new(9));
        assert_eq!(received.sender_id(), Some(NodeId::new(9)), "tagged");
        assert_eq!(received, event, "equality is by hash");
    }
}

//! Signed states: the unit reconnect moves between nodes.

use core::fmt;
use core::ops::Deref;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use parking_lot::RwLock;
use skein_primitives::hash::Hash;
use skein_primitives::node::NodeId;
use skein_primitives::roster::Roster;
use skein_primitives::window::EventWindow;
use tracing::debug;

use crate::config::SigningThreshold;

/// The application state as of the end of a round, opaque beyond its metadata.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StateSnapshot {
    pub round: u64,
    pub roster: Roster,
    pub event_window: EventWindow,
    pub payload: Vec<u8>,
}

impl StateSnapshot {
    pub fn hash(&self) -> io::Result<Hash> {
        Hash::hash_borsh(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature(pub Vec<u8>);

/// Checks a node's signature over a state hash.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signer: NodeId, hash: &Hash, signature: &Signature) -> bool;
}

/// Signatures over one state hash, keyed by signer.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SigSet {
    signatures: BTreeMap<NodeId, Signature>,
}

impl SigSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, signer: NodeId, signature: Signature) {
        let _ignored = self.signatures.insert(signer, signature);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn signers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.signatures.keys().copied()
    }
}

/// A state with its hash and the signatures collected for it.
pub struct SignedState {
    snapshot: StateSnapshot,
    hash: Hash,
    sigs: SigSet,
    reservations: AtomicUsize,
}

impl SignedState {
    pub fn new(snapshot: StateSnapshot, sigs: SigSet) -> io::Result<Self> {
        let hash = snapshot.hash()?;

        Ok(Self {
            snapshot,
            hash,
            sigs,
            reservations: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub const fn snapshot(&self) -> &StateSnapshot {
        &self.snapshot
    }

    /// Mutable access for application initialization. The recorded hash is left untouched, see
    /// [`Self::compute_hash`].
    pub fn snapshot_mut(&mut self) -> &mut StateSnapshot {
        &mut self.snapshot
    }

    #[must_use]
    pub const fn round(&self) -> u64 {
        self.snapshot.round
    }

    /// The hash recorded when the state was built, which signatures refer to.
    #[must_use]
    pub const fn hash(&self) -> &Hash {
        &self.hash
    }

    /// Hash of the snapshot as it is now.
    pub fn compute_hash(&self) -> io::Result<Hash> {
        self.snapshot.hash()
    }

    #[must_use]
    pub const fn sigs(&self) -> &SigSet {
        &self.sigs
    }

    /// Total roster weight of the signers. Signers outside `roster` count for nothing.
    #[must_use]
    pub fn signing_weight(&self, roster: &Roster) -> u64 {
        self.sigs
            .signers()
            .filter_map(|signer| roster.weight_of(signer))
            .fold(0_u64, u64::saturating_add)
    }

    /// Whether the signatures carry enough weight to trust the state.
    #[must_use]
    pub fn is_complete(&self, roster: &Roster, threshold: SigningThreshold) -> bool {
        threshold.is_satisfied_by(self.signing_weight(roster), roster.total_weight())
    }

    /// Drops signatures from nodes outside `roster` and those that do not verify. Returns how
    /// many were removed.
    pub fn prune_invalid_signatures(
        &mut self,
        roster: &Roster,
        verifier: &dyn SignatureVerifier,
    ) -> usize {
        let before = self.sigs.len();
        let hash = self.hash;

        self.sigs.signatures.retain(|signer, signature| {
            let keep = roster.contains(*signer) && verifier.verify(*signer, &hash, signature);
            if !keep {
                debug!(%signer, "Pruning signature");
            }
            keep
        });

        before.saturating_sub(self.sigs.len())
    }

    /// Live reservations of this state.
    #[must_use]
    pub fn reservations(&self) -> usize {
        self.reservations.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SignedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedState")
            .field("round", &self.snapshot.round)
            .field("hash", &self.hash)
            .field("signers", &self.sigs.len())
            .field("reservations", &self.reservations())
            .finish_non_exhaustive()
    }
}

/// Keeps a [`SignedState`] alive and accounted for; the reservation ends on drop.
#[derive(Debug)]
pub struct ReservedSignedState {
    state: Arc<SignedState>,
}

impl ReservedSignedState {
    #[must_use]
    pub fn new(state: Arc<SignedState>) -> Self {
        let _ignored = state.reservations.fetch_add(1, Ordering::AcqRel);

        Self { state }
    }

    /// Another reservation of the same state.
    #[must_use]
    pub fn reserve(&self) -> Self {
        Self::new(Arc::clone(&self.state))
    }
}

impl Deref for ReservedSignedState {
    type Target = SignedState;

    fn deref(&self) -> &SignedState {
        &self.state
    }
}

impl Drop for ReservedSignedState {
    fn drop(&mut self) {
        let _ignored = self.state.reservations.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Holds the latest complete signed state of this node.
#[derive(Debug, Default)]
pub struct SignedStateNexus {
    latest: RwLock<Option<ReservedSignedState>>,
}

impl SignedStateNexus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held state, releasing the previous one.
    pub fn set(&self, state: ReservedSignedState) {
        *self.latest.write() = Some(state);
    }

    /// A fresh reservation of the held state.
    #[must_use]
    pub fn get(&self) -> Option<ReservedSignedState> {
        self.latest.read().as_ref().map(ReservedSignedState::reserve)
    }

    pub fn clear(&self) {
        *self.latest.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct AcceptFrom(Vec<NodeId>);

    impl SignatureVerifier for AcceptFrom {
        fn verify(&self, signer: NodeId, _hash: &Hash, _signature: &Signature) -> bool {
            self.0.contains(&signer)
        }
    }

    fn snapshot(round: u64, roster: &Roster) -> StateSnapshot {
        StateSnapshot {
            round,
            roster: roster.clone(),
            event_window: EventWindow::genesis(),
            payload: b"state".to_vec(),
        }
    }

    fn signed_by(roster: &Roster, signers: &[u64]) -> SignedState {
        let mut sigs = SigSet::new();
        for signer in signers {
            sigs.add(NodeId::new(*signer), Signature(vec![1]));
        }
        SignedState::new(snapshot(7, roster), sigs).expect("hash")
    }

    #[test]
    fn test_signing_weight_ignores_outsiders() {
        let roster = Roster::uniform((1..=4).map(NodeId::new), 10);
        let state = signed_by(&roster, &[1, 2, 9]);

        assert_eq!(state.signing_weight(&roster), 20, "node 9 is not in the roster");
        assert!(
            state.is_complete(&roster, SigningThreshold::StrongMinority),
            "20 of 40"
        );
        assert!(!state.is_complete(&roster, SigningThreshold::Majority), "not above half");
    }

    #[test]
    fn test_prune_removes_outsiders_and_bad_signatures() {
        let roster = Roster::uniform((1..=4).map(NodeId::new), 10);
        let mut state = signed_by(&roster, &[1, 2, 3, 9]);

        let verifier = AcceptFrom(vec![NodeId::new(1), NodeId::new(2), NodeId::new(9)]);
        let pruned = state.prune_invalid_signatures(&roster, &verifier);

        assert_eq!(pruned, 2, "3 fails to verify, 9 left the roster");
        assert_eq!(
            state.sigs().signers().collect::<Vec<_>>(),
            vec![NodeId::new(1), NodeId::new(2)],
            "survivors"
        );
    }

    #[test]
    fn test_reservations_are_counted() {
        let roster = Roster::uniform([NodeId::new(1)], 1);
        let state = Arc::new(signed_by(&roster, &[1]));

        let first = ReservedSignedState::new(Arc::clone(&state));
        let second = first.reserve();
        assert_eq!(state.reservations(), 2, "two holders");

        drop(first);
        drop(second);
        assert_eq!(state.reservations(), 0, "all released");
    }

    #[test]
    fn test_nexus_hands_out_reservations() {
        let roster = Roster::uniform([NodeId::new(1)], 1);
        let state = Arc::new(signed_by(&roster, &[1]));
        let nexus = SignedStateNexus::new();

        assert!(nexus.get().is_none(), "empty");

        nexus.set(ReservedSignedState::new(Arc::clone(&state)));
        let held = nexus.get().expect("state");
        assert_eq!(held.round(), 7, "same state");
        assert_eq!(state.reservations(), 2, "nexus and caller");

        drop(held);
        nexus.clear();
        assert_eq!(state.reservations(), 0, "released");
    }

    #[test]
    fn test_hash_tracks_snapshot_changes() {
        let roster = Roster::uniform([NodeId::new(1)], 1);
        let mut state = signed_by(&roster, &[1]);
        let recorded = *state.hash();

        assert_eq!(state.compute_hash().expect("hash"), recorded, "unchanged");

        state.snapshot_mut().payload.push(0);
        assert_ne!(state.compute_hash().expect("hash"), recorded, "changed");
        assert_eq!(*state.hash(), recorded, "recorded hash is fixed");
    }
}

use std::io;

use skein_gossip::wire::CodecError;
use skein_primitives::hash::Hash;
use skein_primitives::node::NodeId;
use skein_shadowgraph::ShadowgraphError;
use thiserror::Error;

use crate::config::SigningThreshold;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateValidationError {
    #[error("received state for round {received} is older than the local round {previous}")]
    RoundRegressed { received: u64, previous: u64 },

    #[error("signing weight {weight} of {total} does not reach a {threshold}")]
    InsufficientSigningWeight {
        weight: u64,
        total: u64,
        threshold: SigningThreshold,
    },

    #[error("state carries no signatures")]
    Unsigned,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconnectError {
    #[error("connection failure")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("received state failed validation")]
    Validation(#[from] StateValidationError),

    #[error("peer {peer} sent {frame} while {expected} was expected")]
    UnexpectedFrame {
        peer: NodeId,
        frame: &'static str,
        expected: &'static str,
    },

    #[error("malformed state transfer: {0}")]
    MalformedTransfer(&'static str),

    #[error("reconnect protocol ran without a negotiated role")]
    NoRole,

    #[error("no complete signed state to teach")]
    NoStateToTeach,

    #[error("state hash changed during initialization from {before} to {after}")]
    HashChanged { before: Hash, after: Hash },

    #[error("roster in the received state differs from the current roster")]
    RosterMismatch,

    #[error("{consumer} refused the reconnect state: {reason}")]
    RegistrationRefused {
        consumer: &'static str,
        reason: String,
    },

    #[error("gossip could not move to the reconnect state's event window")]
    EventWindow(#[from] ShadowgraphError),

    #[error("learner failed to receive a state")]
    LearnerFailed,

    #[error("reconnect was interrupted")]
    Interrupted,
}

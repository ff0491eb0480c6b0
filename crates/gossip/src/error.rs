use std::io;
use std::time::Duration;

use skein_primitives::hash::Hash;
use skein_primitives::node::NodeId;
use thiserror::Error;

use crate::wire::CodecError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("connection failure")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("peer {peer} answered {received} tip flags for {expected} tips")]
    TipCountMismatch {
        peer: NodeId,
        expected: usize,
        received: usize,
    },

    #[error("peer {peer} sent {frame} while {expected} was expected")]
    UnexpectedFrame {
        peer: NodeId,
        frame: &'static str,
        expected: &'static str,
    },

    #[error("peer {peer} sent event {hash} whose content does not match its hash")]
    InvalidEvent { peer: NodeId, hash: Hash },

    #[error("sync with {peer} exceeded {limit:?}")]
    SyncTimedOut { peer: NodeId, limit: Duration },

    #[error("peer {peer} sent more than {limit} events")]
    TooManyEvents { peer: NodeId, limit: usize },

    #[error("sync worker thread panicked")]
    WorkerPanicked,
}

//! Shadowgraph synchronization over a blocking [`Connection`].
//!
//! [`SyncAlgorithm`] holds the transport independent pieces shared with the RPC flavour in
//! [`crate::rpc`]; [`ShadowgraphSynchronizer`] runs a whole sync on one connection and
//! [`SyncPeerProtocol`] decides when it may.
//!
//! [`Connection`]: skein_primitives::connection::Connection

mod algorithm;
mod blocking;
mod protocol;
mod status;
pub mod utils;

pub use algorithm::SyncAlgorithm;
pub use blocking::ShadowgraphSynchronizer;
pub use protocol::SyncPeerProtocol;
pub use status::SyncFallenBehindStatus;

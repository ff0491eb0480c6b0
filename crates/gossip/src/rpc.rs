//! Message driven gossip: one long lived conversation per peer, multiplexing sync rounds and
//! broadcast events over a single channel.

mod driver;
mod guard;
mod handler;
mod message;
mod state;
mod synchronizer;

pub use driver::RpcPeerDriver;
pub use guard::{resolve_fraction, sync_guard_from_config, LruSyncGuard, NoOpSyncGuard, SyncGuard};
pub use handler::{RpcPeerHandler, EVENTS_PER_MESSAGE};
pub use message::{ChannelRpcSender, GossipRpcMessage, GossipRpcReceiver, GossipRpcSender};
pub use state::{RpcPeerState, SyncCompleted, SyncPhase};
pub use synchronizer::RpcShadowgraphSynchronizer;

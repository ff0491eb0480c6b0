//! Gossip synchronization of the hashgraph event DAG.
//!
//! Two transports share one algorithm ([`sync::SyncAlgorithm`]): a blocking synchronizer that
//! drives one duplex connection with a reader and a writer thread, and an RPC synchronizer that
//! runs an explicit per-peer state machine on a tokio task. Both report peers that consider this
//! node behind to the [`fallen_behind::FallenBehindMonitor`], which kicks off reconnect once a
//! quorum of neighbors agrees.

pub mod config;
pub mod controller;
pub mod error;
pub mod fallen_behind;
pub mod intake;
pub mod metrics;
pub mod rpc;
pub mod sync;
pub mod wire;

pub use config::SyncConfig;
pub use error::SyncError;

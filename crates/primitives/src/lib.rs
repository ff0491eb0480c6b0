//! Shared vocabulary for the skein gossip stack.
//!
//! Everything in here is deliberately small and transport agnostic: node ids, content hashes,
//! the event model, event windows, platform status, rosters and the two peer-facing contracts
//! (a blocking duplex [`connection::Connection`] and the [`protocol::PeerProtocol`] negotiation
//! trait) shared by the sync and reconnect protocols.

pub mod clock;
pub mod connection;
pub mod event;
pub mod hash;
pub mod node;
pub mod protocol;
pub mod roster;
pub mod status;
pub mod window;

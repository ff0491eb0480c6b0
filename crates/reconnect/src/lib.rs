//! Reconnect: bringing a node that has fallen behind back in line.
//!
//! Once the [`skein_gossip::fallen_behind::FallenBehindMonitor`] decides this node is behind, the
//! [`controller::ReconnectController`] pauses gossip and waits while a
//! [`protocol::StateSyncPeerProtocol`] learns a signed state from a peer that reported us. The
//! received state is validated against the roster, handed to every registered consumer and
//! gossip resumes from it.

pub mod config;
pub mod controller;
pub mod error;
mod handshake;
pub mod learner;
pub mod metrics;
pub mod permit;
pub mod protocol;
pub mod state;
pub mod teacher;
pub mod throttle;
pub mod transfer;
pub mod validator;
pub mod wiring;

pub use config::{ReconnectConfig, SigningThreshold};
pub use controller::{ReconnectController, ReconnectControllerParts};
pub use error::{ReconnectError, StateValidationError};

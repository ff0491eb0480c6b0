use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::SigSet;

/// Frames framing the state transfer itself.
#[derive(Debug, BorshSerialize, BorshDeserialize)]
pub(crate) enum ReconnectFrame {
    /// Teacher to learner, before the transfer.
    Signatures(SigSet),
    /// Learner to teacher once the received state validated.
    Complete,
}

impl ReconnectFrame {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Signatures(_) => "signatures",
            Self::Complete => "end of reconnect",
        }
    }
}

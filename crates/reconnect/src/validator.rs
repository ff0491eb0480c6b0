use skein_primitives::roster::Roster;
use tracing::debug;

use crate::config::SigningThreshold;
use crate::error::StateValidationError;
use crate::state::SignedState;

/// What the learner knew before the reconnect, used to judge the received state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateValidationData {
    pub round: u64,
}

/// Decides whether a received state may replace the local one.
pub trait StateValidator: Send + Sync {
    fn validate(
        &self,
        state: &SignedState,
        roster: &Roster,
        previous: &StateValidationData,
    ) -> Result<(), StateValidationError>;
}

/// Accepts states that do not go back in time and are signed by enough roster weight.
///
/// Signatures are expected to have been pruned against the roster already.
#[derive(Clone, Copy, Debug)]
pub struct DefaultStateValidator {
    threshold: SigningThreshold,
}

impl DefaultStateValidator {
    #[must_use]
    pub const fn new(threshold: SigningThreshold) -> Self {
        Self { threshold }
    }
}

impl StateValidator for DefaultStateValidator {
    fn validate(
        &self,
        state: &SignedState,
        roster: &Roster,
        previous: &StateValidationData,
    ) -> Result<(), StateValidationError> {
        if state.round() < previous.round {
            return Err(StateValidationError::RoundRegressed {
                received: state.round(),
                previous: previous.round,
            });
        }

        if state.sigs().is_empty() {
            return Err(StateValidationError::Unsigned);
        }

        let weight = state.signing_weight(roster);
        let total = roster.total_weight();

        if !self.threshold.is_satisfied_by(weight, total) {
            return Err(StateValidationError::InsufficientSigningWeight {
                weight,
                total,
                threshold: self.threshold,
            });
        }

        debug!(round = state.round(), weight, total, "Received state is valid");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use skein_primitives::node::NodeId;
    use skein_primitives::window::EventWindow;

    use super::*;
    use crate::state::{SigSet, Signature, StateSnapshot};

    fn state(round: u64, roster: &Roster, signers: &[u64]) -> SignedState {
        let mut sigs = SigSet::new();
        for signer in signers {
            sigs.add(NodeId::new(*signer), Signature(vec![0]));
        }

        SignedState::new(
            StateSnapshot {
                round,
                roster: roster.clone(),
                event_window: EventWindow::genesis(),
                payload: vec![],
            },
            sigs,
        )
        .expect("hash")
    }

    #[test]
    fn test_weight_below_threshold_fails() {
        let roster = Roster::uniform((1..=6).map(NodeId::new), 10);
        let validator = DefaultStateValidator::new(SigningThreshold::StrongMinority);
        let previous = StateValidationData { round: 3 };

        let err = validator
            .validate(&state(5, &roster, &[1]), &roster, &previous)
            .expect_err("10 of 60");
        assert!(
            matches!(
                err,
                StateValidationError::InsufficientSigningWeight {
                    weight: 10,
                    total: 60,
                    ..
                }
            ),
            "{err}"
        );

        validator
            .validate(&state(5, &roster, &[1, 2]), &roster, &previous)
            .expect("20 of 60 is a third");
    }

    #[test]
    fn test_older_round_fails() {
        let roster = Roster::uniform((1..=3).map(NodeId::new), 1);
        let validator = DefaultStateValidator::new(SigningThreshold::Majority);

        let err = validator
            .validate(
                &state(4, &roster, &[1, 2, 3]),
                &roster,
                &StateValidationData { round: 5 },
            )
            .expect_err("regressed");
        assert!(
            matches!(
                err,
                StateValidationError::RoundRegressed {
                    received: 4,
                    previous: 5
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn test_unsigned_fails() {
        let roster = Roster::uniform((1..=3).map(NodeId::new), 1);
        let validator = DefaultStateValidator::new(SigningThreshold::StrongMinority);

        assert!(
            matches!(
                validator.validate(&state(1, &roster, &[]), &roster, &StateValidationData::default()),
                Err(StateValidationError::Unsigned)
            ),
            "no signatures"
        );
    }
}

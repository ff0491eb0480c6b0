use core::fmt;
use core::time::Duration;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use skein_gossip::wire::{read_frame, write_frame};
use skein_primitives::connection::Connection;
use skein_primitives::roster::Roster;
use tracing::{debug, info, warn};

use crate::error::ReconnectError;
use crate::handshake::ReconnectFrame;
use crate::metrics::ReconnectMetrics;
use crate::state::{SignatureVerifier, SignedState};
use crate::transfer::StateTransfer;
use crate::validator::{StateValidationData, StateValidator};

/// Receives a state from a teacher and checks that it can be trusted.
pub struct ReconnectLearner {
    roster: Roster,
    socket_timeout: Duration,
    transfer: Arc<dyn StateTransfer>,
    validator: Arc<dyn StateValidator>,
    verifier: Arc<dyn SignatureVerifier>,
    metrics: Arc<ReconnectMetrics>,
}

impl ReconnectLearner {
    #[must_use]
    pub fn new(
        roster: Roster,
        socket_timeout: Duration,
        transfer: Arc<dyn StateTransfer>,
        validator: Arc<dyn StateValidator>,
        verifier: Arc<dyn SignatureVerifier>,
        metrics: Arc<ReconnectMetrics>,
    ) -> Self {
        Self {
            roster,
            socket_timeout,
            transfer,
            validator,
            verifier,
            metrics,
        }
    }

    /// Runs the learner side over `connection`, using `baseline` (the stale local state) to
    /// avoid transferring what is already here.
    ///
    /// The socket timeout is raised for the transfer and restored afterwards. On failure nothing
    /// of the partially received state survives.
    pub fn execute<C: Connection>(
        &self,
        connection: &C,
        baseline: Option<&SignedState>,
    ) -> Result<SignedState, ReconnectError> {
        let original_timeout = connection.timeout()?;
        connection.set_timeout(Some(self.socket_timeout))?;

        let result = self.receive(connection, baseline);

        if connection.is_connected() {
            if let Err(err) = connection.set_timeout(original_timeout) {
                warn!(peer = %connection.other_id(), %err, "Could not restore the socket timeout");
            }
        } else {
            debug!(peer = %connection.other_id(), "Connection closed, timeout not restored");
        }

        result
    }

    fn receive<C: Connection>(
        &self,
        connection: &C,
        baseline: Option<&SignedState>,
    ) -> Result<SignedState, ReconnectError> {
        let peer = connection.other_id();
        let mut reader = connection.reader()?;
        let mut writer = BufWriter::new(connection.writer()?);

        self.metrics.learner_started();

        let sigs = match read_frame(&mut reader)? {
            ReconnectFrame::Signatures(sigs) => sigs,
            frame => {
                return Err(ReconnectError::UnexpectedFrame {
                    peer,
                    frame: frame.name(),
                    expected: "signatures",
                })
            }
        };
        info!(%peer, signers = sigs.len(), "Received state signatures");

        let snapshot = self.transfer.learn(
            &mut reader,
            &mut writer,
            baseline.map(SignedState::snapshot),
        )?;

        let mut state = SignedState::new(snapshot, sigs)?;

        let pruned = state.prune_invalid_signatures(&self.roster, self.verifier.as_ref());
        debug!(
            %peer,
            pruned,
            weight = state.signing_weight(&self.roster),
            total = self.roster.total_weight(),
            "Pruned signatures"
        );

        let previous = StateValidationData {
            round: baseline.map_or(0, SignedState::round),
        };
        self.validator.validate(&state, &self.roster, &previous)?;

        write_frame(&mut writer, &ReconnectFrame::Complete)?;
        writer.flush()?;

        self.metrics.learner_finished();
        info!(%peer, round = state.round(), hash = %state.hash(), "Reconnect state received");

        Ok(state)
    }
}

impl fmt::Debug for ReconnectLearner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectLearner")
            .field("roster", &self.roster)
            .field("socket_timeout", &self.socket_timeout)
            .finish_non_exhaustive()
    }
}

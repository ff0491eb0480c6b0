use core::fmt;
use core::time::Duration;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use skein_gossip::wire::{read_frame, write_frame};
use skein_primitives::connection::Connection;
use tracing::{info, warn};

use crate::error::ReconnectError;
use crate::handshake::ReconnectFrame;
use crate::metrics::ReconnectMetrics;
use crate::state::SignedState;
use crate::transfer::StateTransfer;

/// Sends this node's latest complete signed state to a learner.
pub struct ReconnectTeacher {
    socket_timeout: Duration,
    transfer: Arc<dyn StateTransfer>,
    metrics: Arc<ReconnectMetrics>,
}

impl ReconnectTeacher {
    #[must_use]
    pub fn new(
        socket_timeout: Duration,
        transfer: Arc<dyn StateTransfer>,
        metrics: Arc<ReconnectMetrics>,
    ) -> Self {
        Self {
            socket_timeout,
            transfer,
            metrics,
        }
    }

    /// Signatures first, then the state, then waits for the learner to accept it.
    pub fn execute<C: Connection>(
        &self,
        connection: &C,
        state: &SignedState,
    ) -> Result<(), ReconnectError> {
        let original_timeout = connection.timeout()?;
        connection.set_timeout(Some(self.socket_timeout))?;

        let result = self.send(connection, state);

        if connection.is_connected() {
            if let Err(err) = connection.set_timeout(original_timeout) {
                warn!(peer = %connection.other_id(), %err, "Could not restore the socket timeout");
            }
        }

        result
    }

    fn send<C: Connection>(&self, connection: &C, state: &SignedState) -> Result<(), ReconnectError> {
        let peer = connection.other_id();
        let mut reader = connection.reader()?;
        let mut writer = BufWriter::new(connection.writer()?);

        self.metrics.teacher_started();
        info!(%peer, round = state.round(), "Starting reconnect as teacher");

        write_frame(&mut writer, &ReconnectFrame::Signatures(state.sigs().clone()))?;
        writer.flush()?;

        self.transfer
            .teach(&mut reader, &mut writer, state.snapshot())?;

        match read_frame(&mut reader)? {
            ReconnectFrame::Complete => {}
            frame => {
                return Err(ReconnectError::UnexpectedFrame {
                    peer,
                    frame: frame.name(),
                    expected: "end of reconnect",
                })
            }
        }

        self.metrics.teacher_finished();
        info!(%peer, round = state.round(), "Finished reconnect as teacher");

        Ok(())
    }
}

impl fmt::Debug for ReconnectTeacher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectTeacher")
            .field("socket_timeout", &self.socket_timeout)
            .finish_non_exhaustive()
    }
}

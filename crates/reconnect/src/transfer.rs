//! Moving a state snapshot from teacher to learner.

use std::io::{Read, Write};

use borsh::{BorshDeserialize, BorshSerialize};
use skein_gossip::wire::{read_frame, write_frame};
use skein_primitives::hash::Hash;
use skein_primitives::roster::Roster;
use skein_primitives::window::EventWindow;
use tracing::{debug, info};

use crate::error::ReconnectError;
use crate::state::StateSnapshot;

/// Payload bytes per page (64 KiB).
pub const PAGE_SIZE: usize = 64 * 1024;

/// The byte level synchronizer that ships a state over an established connection.
///
/// Both sides run on the same connection at the same time, one in each role.
pub trait StateTransfer: Send + Sync {
    fn teach(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        state: &StateSnapshot,
    ) -> Result<(), ReconnectError>;

    /// Receives a snapshot, reusing whatever `baseline` already has in common with it.
    fn learn(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        baseline: Option<&StateSnapshot>,
    ) -> Result<StateSnapshot, ReconnectError>;
}

#[derive(Debug, BorshSerialize, BorshDeserialize)]
enum TransferFrame {
    /// Learner to teacher: page hashes of the baseline payload.
    Baseline { pages: Vec<Hash> },
    Header {
        round: u64,
        roster: Roster,
        event_window: EventWindow,
        payload_len: u64,
    },
    Page { index: u64, bytes: Vec<u8> },
    Done,
}

impl TransferFrame {
    const fn name(&self) -> &'static str {
        match self {
            Self::Baseline { .. } => "baseline",
            Self::Header { .. } => "header",
            Self::Page { .. } => "page",
            Self::Done => "done",
        }
    }
}

/// Ships the snapshot payload in fixed size pages, skipping pages the learner's baseline
/// already has.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotStateTransfer;

impl StateTransfer for SnapshotStateTransfer {
    fn teach(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        state: &StateSnapshot,
    ) -> Result<(), ReconnectError> {
        let known = match read_frame(reader)? {
            TransferFrame::Baseline { pages } => pages,
            frame => return Err(unexpected(&frame, "baseline")),
        };

        write_frame(
            writer,
            &TransferFrame::Header {
                round: state.round,
                roster: state.roster.clone(),
                event_window: state.event_window,
                payload_len: state.payload.len() as u64,
            },
        )?;

        let mut sent = 0_usize;
        for (index, page) in state.payload.chunks(PAGE_SIZE).enumerate() {
            if known.get(index) == Some(&Hash::new(page)) {
                continue;
            }

            write_frame(
                writer,
                &TransferFrame::Page {
                    index: index as u64,
                    bytes: page.to_vec(),
                },
            )?;
            sent = sent.saturating_add(1);
        }

        write_frame(writer, &TransferFrame::Done)?;
        writer.flush()?;

        info!(round = state.round, pages = sent, reused = known.len(), "State sent");

        Ok(())
    }

    fn learn(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        baseline: Option<&StateSnapshot>,
    ) -> Result<StateSnapshot, ReconnectError> {
        let base = baseline.map_or(&[][..], |snapshot| snapshot.payload.as_slice());
        let pages = base.chunks(PAGE_SIZE).map(Hash::new).collect();

        write_frame(writer, &TransferFrame::Baseline { pages })?;
        writer.flush()?;

        let (round, roster, event_window, payload_len) = match read_frame(reader)? {
            TransferFrame::Header {
                round,
                roster,
                event_window,
                payload_len,
            } => (round, roster, event_window, payload_len),
            frame => return Err(unexpected(&frame, "header")),
        };

        let payload_len = usize::try_from(payload_len)
            .map_err(|_| ReconnectError::MalformedTransfer("payload length overflows"))?;
        let page_count = payload_len.div_ceil(PAGE_SIZE);

        let mut payload = base.get(..payload_len.min(base.len())).unwrap_or_default().to_vec();
        payload.resize(payload_len, 0);

        let mut received = 0_usize;
        loop {
            match read_frame(reader)? {
                TransferFrame::Page { index, bytes } => {
                    let index = usize::try_from(index)
                        .ok()
                        .filter(|index| *index < page_count)
                        .ok_or(ReconnectError::MalformedTransfer("page index out of range"))?;

                    let start = index.saturating_mul(PAGE_SIZE);
                    let end = start.saturating_add(PAGE_SIZE).min(payload_len);

                    let Some(target) = payload.get_mut(start..end) else {
                        return Err(ReconnectError::MalformedTransfer("page out of range"));
                    };
                    if target.len() != bytes.len() {
                        return Err(ReconnectError::MalformedTransfer("page has the wrong size"));
                    }

                    target.copy_from_slice(&bytes);
                    received = received.saturating_add(1);
                }
                TransferFrame::Done => break,
                frame => return Err(unexpected(&frame, "page")),
            }
        }

        debug!(round, pages = received, of = page_count, "State received");

        Ok(StateSnapshot {
            round,
            roster,
            event_window,
            payload,
        })
    }
}

fn unexpected(frame: &TransferFrame, expected: &'static str) -> ReconnectError {
    debug!(frame = frame.name(), expected, "Unexpected transfer frame");

    ReconnectError::MalformedTransfer("unexpected frame")
}

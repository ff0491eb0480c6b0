use core::fmt;
use std::collections::HashSet;
use std::io::{BufWriter, Read, Write};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use skein_primitives::connection::Connection;
use skein_primitives::event::{GossipEvent, PlatformEvent};
use skein_primitives::node::NodeId;
use skein_shadowgraph::ShadowEvent;
use tracing::{debug, trace, warn};

use super::algorithm::SyncAlgorithm;
use super::status::SyncFallenBehindStatus;
use super::utils::{get_my_tips_they_know, get_their_tips_i_have};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::intake::{EventSink, IntakeEventCounter};
use crate::wire::{read_frame, write_frame, SyncData, SyncFrame};

/// Runs a complete sync with one peer over a blocking [`Connection`].
///
/// Both sides run the same steps, each direction driven by its own thread:
///
/// 1. exchange [`SyncData`] and compare event windows, stopping if either side has fallen behind
/// 2. exchange, for every advertised tip, whether it is known locally
/// 3. stream the events the peer lacks, then `EndOfEvents`, keepalives until the peer's
///    `EndOfEvents` arrives, and finally `SyncDone`
pub struct ShadowgraphSynchronizer {
    algorithm: Arc<SyncAlgorithm>,
    intake: Arc<dyn IntakeEventCounter>,
    sink: Arc<dyn EventSink>,
    max_sync_time: Duration,
    keepalive_period: Duration,
    event_limit: Option<usize>,
}

impl ShadowgraphSynchronizer {
    #[must_use]
    pub fn new(
        algorithm: Arc<SyncAlgorithm>,
        intake: Arc<dyn IntakeEventCounter>,
        sink: Arc<dyn EventSink>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            algorithm,
            intake,
            sink,
            max_sync_time: config.max_sync_time,
            keepalive_period: config.sync_keepalive_period,
            event_limit: config.event_limit(),
        }
    }

    #[must_use]
    pub const fn algorithm(&self) -> &Arc<SyncAlgorithm> {
        &self.algorithm
    }

    /// Syncs with the peer on the other end of `conn`.
    ///
    /// Returns `Ok(false)` when the sync stopped early because one side has fallen behind, and
    /// `Ok(true)` when events were exchanged in both directions. On error the connection has
    /// been disconnected.
    pub fn synchronize<C: Connection>(&self, conn: &C) -> Result<bool, SyncError> {
        let peer = conn.other_id();
        let start = self.algorithm.clock().now();

        debug!(%peer, connection = %conn.description(), "Starting sync");

        let result = self.run(conn, peer, start);

        match &result {
            Ok(true) => {
                let elapsed = self.algorithm.clock().elapsed_since(start);
                self.algorithm.metrics().sync_finished(elapsed);
                debug!(%peer, ?elapsed, "Sync finished");
            }
            Ok(false) => {}
            Err(err) => {
                self.algorithm.metrics().sync_aborted();
                warn!(%peer, %err, "Sync failed");
            }
        }

        result
    }

    fn run<C: Connection>(&self, conn: &C, peer: NodeId, start: Instant) -> Result<bool, SyncError> {
        let mut reader = conn.reader()?;
        let mut writer = BufWriter::new(conn.writer()?);

        let reservation = self.algorithm.shadowgraph().reserve();
        let my_window = *reservation.window();
        let my_tips = reservation.tips().to_vec();

        self.algorithm.metrics().sync_started(my_tips.len());

        let my_data = SyncData {
            event_window: my_window,
            tip_hashes: reservation.tip_hashes(),
        };

        let (their_data, ()) = read_write_parallel(
            conn,
            || expect_sync_data(&mut reader, peer),
            || send(&mut writer, &SyncFrame::SyncData(my_data)),
        )?;

        let status = self
            .algorithm
            .has_fallen_behind(&my_window, &their_data.event_window, peer);
        if status != SyncFallenBehindStatus::None {
            return Ok(false);
        }

        let their_tips = self.algorithm.shadowgraph().shadows(&their_data.tip_hashes);
        let their_tips_i_have = get_their_tips_i_have(&their_tips);

        let (their_answer, ()) = read_write_parallel(
            conn,
            || expect_tips(&mut reader, peer),
            || send(&mut writer, &SyncFrame::Tips(their_tips_i_have)),
        )?;

        let my_tips_they_know = get_my_tips_they_know(peer, &my_tips, &their_answer)?;

        let known_set: HashSet<Arc<ShadowEvent>> = their_tips
            .into_iter()
            .flatten()
            .chain(my_tips_they_know)
            .collect();

        let send_list =
            self.algorithm
                .create_send_list(&known_set, &my_window, &their_data.event_window);

        // the send list is final, no need to keep events from expiring any longer
        drop(reservation);

        trace!(%peer, events = send_list.len(), window = %their_data.event_window, "Sending events");

        self.exchange_events(conn, peer, start, &mut reader, &mut writer, send_list)?;

        Ok(true)
    }

    fn exchange_events<C: Connection>(
        &self,
        conn: &C,
        peer: NodeId,
        start: Instant,
        reader: &mut C::Reader,
        writer: &mut BufWriter<C::Writer>,
        send_list: Vec<PlatformEvent>,
    ) -> Result<(), SyncError> {
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let keepalive_period = self.keepalive_period;
        let metrics = self.algorithm.metrics();

        let (received, sent) = read_write_parallel(
            conn,
            move || self.receive_events(reader, peer, start, &done_tx),
            move || {
                let sent = send_list.len();

                for event in &send_list {
                    let frame = SyncFrame::Event(GossipEvent::clone(event.gossip_event()));
                    write_frame(&mut *writer, &frame)?;
                }
                send(&mut *writer, &SyncFrame::EndOfEvents)?;
                metrics.events_sent(sent);

                loop {
                    match done_rx.recv_timeout(keepalive_period) {
                        Ok(()) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            send(&mut *writer, &SyncFrame::Keepalive)?;
                        }
                        // the reader failed and is tearing the connection down
                        Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(sent),
                    }
                }

                send(&mut *writer, &SyncFrame::SyncDone)?;

                Ok(sent)
            },
        )?;

        debug!(%peer, sent, received, "Events exchanged");

        Ok(())
    }

    fn receive_events<R: Read>(
        &self,
        reader: &mut R,
        peer: NodeId,
        start: Instant,
        done: &mpsc::Sender<()>,
    ) -> Result<usize, SyncError> {
        let mut received = 0_usize;

        loop {
            let frame: SyncFrame = read_frame(reader)?;

            match frame {
                SyncFrame::Event(event) => {
                    if !event.is_hash_valid() {
                        return Err(SyncError::InvalidEvent {
                            peer,
                            hash: event.hash(),
                        });
                    }

                    let elapsed = self.algorithm.clock().elapsed_since(start);
                    if elapsed > self.max_sync_time {
                        return Err(SyncError::SyncTimedOut {
                            peer,
                            limit: self.max_sync_time,
                        });
                    }

                    received = received.saturating_add(1);
                    if let Some(limit) = self.event_limit {
                        if received > limit {
                            return Err(SyncError::TooManyEvents { peer, limit });
                        }
                    }

                    let event =
                        PlatformEvent::new(event, self.algorithm.clock().now()).with_sender(peer);
                    self.intake.event_entered_intake_pipeline(peer);
                    self.sink.accept(event);
                }
                SyncFrame::EndOfEvents => break,
                other => {
                    return Err(SyncError::UnexpectedFrame {
                        peer,
                        frame: other.name(),
                        expected: "event",
                    })
                }
            }
        }

        self.algorithm.metrics().events_received(received);

        // the writer may send its sync done now, a send error only means it already gave up
        let _ = done.send(());

        loop {
            let frame: SyncFrame = read_frame(reader)?;

            match frame {
                SyncFrame::Keepalive => trace!(%peer, "Keepalive"),
                SyncFrame::SyncDone => return Ok(received),
                other => {
                    return Err(SyncError::UnexpectedFrame {
                        peer,
                        frame: other.name(),
                        expected: "sync done",
                    })
                }
            }
        }
    }
}

impl fmt::Debug for ShadowgraphSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowgraphSynchronizer")
            .field("algorithm", &self.algorithm)
            .field("max_sync_time", &self.max_sync_time)
            .field("keepalive_period", &self.keepalive_period)
            .field("event_limit", &self.event_limit)
            .finish_non_exhaustive()
    }
}

fn send<W: Write>(writer: &mut W, frame: &SyncFrame) -> Result<(), SyncError> {
    write_frame(writer, frame)?;
    writer.flush()?;
    Ok(())
}

fn expect_sync_data<R: Read>(reader: &mut R, peer: NodeId) -> Result<SyncData, SyncError> {
    match read_frame(reader)? {
        SyncFrame::SyncData(data) => Ok(data),
        other => Err(SyncError::UnexpectedFrame {
            peer,
            frame: other.name(),
            expected: "sync data",
        }),
    }
}

fn expect_tips<R: Read>(reader: &mut R, peer: NodeId) -> Result<Vec<bool>, SyncError> {
    match read_frame(reader)? {
        SyncFrame::Tips(tips) => Ok(tips),
        other => Err(SyncError::UnexpectedFrame {
            peer,
            frame: other.name(),
            expected: "tips",
        }),
    }
}

/// Runs `write` on a scoped thread while `read` runs on the caller's.
///
/// A failure on either side disconnects `conn`, which unblocks the other side.
fn read_write_parallel<C, R, W>(
    conn: &C,
    read: impl FnOnce() -> Result<R, SyncError>,
    write: impl FnOnce() -> Result<W, SyncError> + Send,
) -> Result<(R, W), SyncError>
where
    C: Connection,
    W: Send,
{
    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let result = write();
            if result.is_err() {
                conn.disconnect();
            }
            result
        });

        let read_result = read();
        if read_result.is_err() {
            conn.disconnect();
        }

        let write_result = writer.join().unwrap_or_else(|_| {
            conn.disconnect();
            Err(SyncError::WorkerPanicked)
        });

        Ok((read_result?, write_result?))
    })
}

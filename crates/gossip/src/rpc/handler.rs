use core::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use skein_primitives::event::{GossipEvent, PlatformEvent};
use skein_primitives::node::NodeId;
use tracing::{debug, info, trace, warn};

use super::message::{GossipRpcReceiver, GossipRpcSender};
use super::state::{RpcPeerState, SyncCompleted, SyncPhase, SyncRound};
use super::synchronizer::{PeerFlags, RpcShared};
use crate::metrics::DidNotSyncReason;
use crate::sync::utils::{get_my_tips_they_know, get_their_tips_i_have};
use crate::sync::SyncFallenBehindStatus;
use crate::wire::SyncData;

/// Events per [`GossipRpcSender::send_events`] batch.
pub const EVENTS_PER_MESSAGE: usize = 256;

/// The RPC sync state machine for one peer.
///
/// Every method runs on the peer's single dispatch context, so the handler owns its state
/// outright. A round goes through window exchange, tip exchange and event exchange in both
/// directions at once; [`SyncCompleted`] is emitted exactly once per round, whichever direction
/// finishes last.
pub struct RpcPeerHandler {
    peer: NodeId,
    shared: Arc<RpcShared>,
    sender: Arc<dyn GossipRpcSender>,
    flags: Arc<PeerFlags>,
    state: RpcPeerState,
    round: Option<SyncRound>,
    phase: SyncPhase,
    completed_syncs: u64,
}

impl RpcPeerHandler {
    pub(crate) fn new(
        peer: NodeId,
        shared: Arc<RpcShared>,
        sender: Arc<dyn GossipRpcSender>,
        flags: Arc<PeerFlags>,
    ) -> Self {
        Self {
            peer,
            shared,
            sender,
            flags,
            state: RpcPeerState::default(),
            round: None,
            phase: SyncPhase::Idle,
            completed_syncs: 0,
        }
    }

    #[must_use]
    pub const fn peer(&self) -> NodeId {
        self.peer
    }

    #[must_use]
    pub const fn phase(&self) -> SyncPhase {
        self.phase
    }

    #[must_use]
    pub const fn completed_syncs(&self) -> u64 {
        self.completed_syncs
    }

    #[must_use]
    pub const fn state(&self) -> &RpcPeerState {
        &self.state
    }

    /// Called periodically by the dispatch loop; starts a round when it is this node's turn.
    ///
    /// Returns whether the loop should keep running. A round the peer already opened is answered
    /// even when the system is unhealthy, but not while gossip is paused.
    pub fn check_for_periodic_actions(&mut self, system_healthy: bool) -> bool {
        let metrics = self.shared.algorithm.metrics();
        let now = self.shared.algorithm.clock().now();

        if !self.state.cooldown_complete(now, self.shared.sleep_after_sync) {
            metrics.did_not_sync(DidNotSyncReason::Cooldown);
            return system_healthy;
        }

        if self.state.remote_fallen_behind {
            metrics.did_not_sync(DidNotSyncReason::PeerBehind);
            return system_healthy;
        }

        if self.state.remote_still_sending {
            metrics.did_not_sync(DidNotSyncReason::PeerStillSending);
            return true;
        }

        if self.shared.intake.has_unprocessed_events(self.peer) {
            metrics.did_not_sync(DidNotSyncReason::IntakeBacklog);
            return system_healthy;
        }

        if self.state.my_sync_data.is_some() {
            metrics.did_not_sync(DidNotSyncReason::AlreadyStarted);
            return true;
        }

        if self.state.remote_sync_data.is_none() {
            if !system_healthy {
                metrics.did_not_sync(DidNotSyncReason::Unhealthy);
                self.set_phase(SyncPhase::PlatformStatusPreventingSync);
                return false;
            }

            if !self.shared.guard.is_sync_allowed(self.peer) {
                metrics.did_not_sync(DidNotSyncReason::FairSelector);
                self.set_phase(SyncPhase::NoPermit);
                return true;
            }
        } else {
            if self.shared.gate.is_halted() {
                metrics.did_not_sync(DidNotSyncReason::Unhealthy);
                self.set_phase(SyncPhase::PlatformStatusPreventingSync);
                return false;
            }

            // the peer opened the round, answer it even if it is not our turn
            self.shared.guard.on_forced_sync(self.peer);
        }

        self.send_sync_data();

        true
    }

    /// Tears down any round in progress; the handler stops receiving broadcasts.
    pub fn cleanup(&mut self) {
        if self.round.take().is_some() || self.state.my_sync_data.is_some() {
            self.shared.algorithm.metrics().sync_aborted();
        }
        self.clear_internal_state();
        self.shared.deregister(self.peer, &self.flags);
    }

    fn send_sync_data(&mut self) {
        let reservation = self.shared.algorithm.shadowgraph().reserve();
        let data = SyncData {
            event_window: *reservation.window(),
            tip_hashes: reservation.tip_hashes(),
        };

        self.shared.algorithm.metrics().sync_started(reservation.tips().len());
        self.set_phase(SyncPhase::ExchangingWindows);

        self.state.my_tips = reservation.tips().to_vec();
        self.state.shadow_window = Some(reservation);
        self.state.my_sync_data = Some(data.clone());
        self.shared.rounds.begin();
        self.flags.in_round.store(true, Ordering::Release);

        trace!(peer = %self.peer, tips = self.state.my_tips.len(), "Sending sync data");
        self.sender.send_sync_data(data);

        self.maybe_both_sent_sync_data();
    }

    fn maybe_both_sent_sync_data(&mut self) {
        let (Some(mine), Some(theirs)) = (&self.state.my_sync_data, &self.state.remote_sync_data)
        else {
            return;
        };

        let my_window = mine.event_window;
        let remote_window = theirs.event_window;

        let status = self
            .shared
            .algorithm
            .has_fallen_behind(&my_window, &remote_window, self.peer);

        match status {
            SyncFallenBehindStatus::None => {
                self.set_phase(SyncPhase::ExchangingTips);
                self.send_known_tips();
            }
            SyncFallenBehindStatus::OtherFallenBehind => {
                self.clear_internal_state();
                self.state.remote_fallen_behind = true;
                self.flags.peer_behind.store(true, Ordering::Relaxed);
                self.set_phase(SyncPhase::OtherFallenBehind);
            }
            SyncFallenBehindStatus::SelfFallenBehind => {
                self.clear_internal_state();

                // the window may have moved on since our sync data went out
                let latest = self.shared.algorithm.shadowgraph().reserve();
                let recheck =
                    self.shared
                        .algorithm
                        .has_fallen_behind(latest.window(), &remote_window, self.peer);
                drop(latest);

                if recheck == SyncFallenBehindStatus::SelfFallenBehind {
                    self.set_phase(SyncPhase::SelfFallenBehind);
                    self.sender.break_conversation();
                } else {
                    info!(
                        peer = %self.peer,
                        %remote_window,
                        "Latest event window is not behind after all, will retry"
                    );
                    self.set_phase(SyncPhase::Idle);
                }
            }
        }
    }

    fn send_known_tips(&mut self) {
        let Some(remote) = &self.state.remote_sync_data else {
            return;
        };

        let their_tips = self.shared.algorithm.shadowgraph().shadows(&remote.tip_hashes);
        let their_tips_i_have = get_their_tips_i_have(&their_tips);

        self.state
            .events_they_have
            .extend(their_tips.into_iter().flatten());
        self.state.remote_still_sending = true;
        self.round = Some(SyncRound::new(self.shared.algorithm.clock().now()));

        self.sender.send_tips(their_tips_i_have);
    }

    fn finished_sending_events(&mut self) {
        self.clear_internal_state();

        let Some(round) = self.round.as_mut() else {
            return;
        };
        round.local_finished = true;

        if !self.try_complete_round() {
            self.set_phase(SyncPhase::ReceivingEvents);
        }
    }

    /// Reports the round if both directions are done. Returns whether it did.
    fn try_complete_round(&mut self) -> bool {
        if !self.round.as_ref().is_some_and(SyncRound::is_complete) {
            return false;
        }
        let Some(round) = self.round.take() else {
            return false;
        };

        let duration = self.shared.algorithm.clock().elapsed_since(round.started);

        self.completed_syncs = self.completed_syncs.saturating_add(1);
        self.set_phase(SyncPhase::Idle);
        self.shared.algorithm.metrics().sync_finished(duration);

        debug!(
            peer = %self.peer,
            sent = round.events_sent,
            received = round.events_received,
            ?duration,
            "Sync round complete"
        );

        if let Some(listener) = self.shared.completions.get() {
            let _ = listener.send(SyncCompleted {
                peer: self.peer,
                events_sent: round.events_sent,
                events_received: round.events_received,
                duration,
            });
        }

        true
    }

    fn clear_internal_state(&mut self) {
        let held_reservation = self.state.my_sync_data.is_some();
        if held_reservation {
            self.shared.guard.on_sync_completed(self.peer);
        }
        self.state.clear(self.shared.algorithm.clock().now());

        if held_reservation {
            self.flags.in_round.store(false, Ordering::Release);
            self.shared.rounds.end();
        }
    }

    fn set_phase(&mut self, phase: SyncPhase) {
        self.phase = phase;
        self.shared.algorithm.metrics().report_phase(self.peer, phase);
    }
}

impl GossipRpcReceiver for RpcPeerHandler {
    fn receive_sync_data(&mut self, data: SyncData) {
        trace!(peer = %self.peer, window = %data.event_window, "Received sync data");

        self.state.sync_initiated(data);
        self.flags.peer_behind.store(false, Ordering::Relaxed);
        self.set_phase(SyncPhase::ExchangingWindows);

        self.maybe_both_sent_sync_data();
    }

    fn receive_tips(&mut self, tips: Vec<bool>) {
        let (Some(mine), Some(theirs)) = (&self.state.my_sync_data, &self.state.remote_sync_data)
        else {
            debug!(peer = %self.peer, "Tips outside of a round, ignoring");
            return;
        };
        let my_window = mine.event_window;
        let their_window = theirs.event_window;

        let known = match get_my_tips_they_know(self.peer, &self.state.my_tips, &tips) {
            Ok(known) => known,
            Err(err) => {
                warn!(peer = %self.peer, %err, "Breaking conversation");
                self.shared.algorithm.metrics().sync_aborted();
                self.sender.break_conversation();
                self.clear_internal_state();
                return;
            }
        };

        self.state.events_they_have.extend(known);
        self.set_phase(SyncPhase::ExchangingEvents);

        let send_list = self.shared.algorithm.create_send_list(
            &self.state.events_they_have,
            &my_window,
            &their_window,
        );
        let sent = send_list.len();

        for chunk in send_list.chunks(EVENTS_PER_MESSAGE) {
            let events = chunk
                .iter()
                .map(|event| event.gossip_event().clone())
                .collect();
            self.sender.send_events(events);
        }
        self.sender.send_end_of_events();

        self.shared.algorithm.metrics().events_sent(sent);
        if let Some(round) = self.round.as_mut() {
            round.events_sent = round.events_sent.saturating_add(sent);
        }

        self.finished_sending_events();
    }

    fn receive_events(&mut self, events: Vec<GossipEvent>) {
        let received = events.len();
        let now = self.shared.algorithm.clock().now();

        for event in events {
            let event = PlatformEvent::new(event, now).with_sender(self.peer);
            self.shared.intake.event_entered_intake_pipeline(self.peer);
            self.shared.sink.accept(event);
        }

        self.shared.algorithm.metrics().events_received(received);
        if let Some(round) = self.round.as_mut() {
            round.events_received = round.events_received.saturating_add(received);
        }
    }

    fn receive_events_finished(&mut self) {
        self.state.remote_still_sending = false;

        let Some(round) = self.round.as_mut() else {
            debug!(peer = %self.peer, "End of events outside of a round, ignoring");
            return;
        };
        round.remote_finished = true;

        if !self.try_complete_round() {
            self.set_phase(SyncPhase::SendingEvents);
        }
    }

    fn receive_broadcast_event(&mut self, event: GossipEvent) {
        if self.state.remote_fallen_behind || self.completed_syncs == 0 {
            trace!(peer = %self.peer, hash = %event.hash(), "Dropping broadcast event");
            return;
        }

        // no sender tag, so intake does not count it against the peer's backlog
        let event = PlatformEvent::new(event, self.shared.algorithm.clock().now());
        self.shared.sink.accept(event);
    }
}

impl fmt::Debug for RpcPeerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcPeerHandler")
            .field("peer", &self.peer)
            .field("phase", &self.phase)
            .field("state", &self.state)
            .field("round", &self.round)
            .field("completed_syncs", &self.completed_syncs)
            .finish_non_exhaustive()
    }
}

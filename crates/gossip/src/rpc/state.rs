use core::fmt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use skein_shadowgraph::{ReservedEventWindow, ShadowEvent};

use crate::wire::SyncData;

/// Where a peer conversation is, reported per peer through metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    #[default]
    Idle,
    ExchangingWindows,
    ExchangingTips,
    ExchangingEvents,
    /// Our events are out, waiting for the peer's.
    ReceivingEvents,
    /// The peer's events are in, still sending ours.
    SendingEvents,
    OtherFallenBehind,
    SelfFallenBehind,
    NoPermit,
    PlatformStatusPreventingSync,
}

impl SyncPhase {
    /// Stable numeric code for the phase gauge.
    #[must_use]
    pub const fn ordinal(self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::ExchangingWindows => 1,
            Self::ExchangingTips => 2,
            Self::ExchangingEvents => 3,
            Self::ReceivingEvents => 4,
            Self::SendingEvents => 5,
            Self::OtherFallenBehind => 6,
            Self::SelfFallenBehind => 7,
            Self::NoPermit => 8,
            Self::PlatformStatusPreventingSync => 9,
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::ExchangingWindows => "exchanging_windows",
            Self::ExchangingTips => "exchanging_tips",
            Self::ExchangingEvents => "exchanging_events",
            Self::ReceivingEvents => "receiving_events",
            Self::SendingEvents => "sending_events",
            Self::OtherFallenBehind => "other_fallen_behind",
            Self::SelfFallenBehind => "self_fallen_behind",
            Self::NoPermit => "no_permit",
            Self::PlatformStatusPreventingSync => "platform_status_preventing_sync",
        })
    }
}

/// Per-peer scratch space of the RPC handler, reset in place between rounds.
#[derive(Debug, Default)]
pub struct RpcPeerState {
    pub my_sync_data: Option<SyncData>,
    pub remote_sync_data: Option<SyncData>,
    pub my_tips: Vec<Arc<ShadowEvent>>,
    /// Only ever grows within a round.
    pub events_they_have: HashSet<Arc<ShadowEvent>>,
    pub shadow_window: Option<ReservedEventWindow>,
    pub remote_fallen_behind: bool,
    pub remote_still_sending: bool,
    /// `None` until the first round ends, so the first sync needs no cooldown.
    pub last_sync_time: Option<Instant>,
}

impl RpcPeerState {
    /// The peer opened a round.
    pub fn sync_initiated(&mut self, data: SyncData) {
        self.remote_sync_data = Some(data);
        self.remote_fallen_behind = false;
        self.remote_still_sending = false;
    }

    /// Discards everything about the current round and releases its reservation.
    pub fn clear(&mut self, now: Instant) {
        self.my_sync_data = None;
        self.remote_sync_data = None;
        self.my_tips.clear();
        self.events_they_have.clear();
        self.shadow_window = None;
        self.last_sync_time = Some(now);
    }

    #[must_use]
    pub fn cooldown_complete(&self, now: Instant, sleep_after_sync: Duration) -> bool {
        self.last_sync_time
            .map_or(true, |last| now.saturating_duration_since(last) >= sleep_after_sync)
    }
}

/// Completion bookkeeping of a round, present from tip exchange until both directions finish.
#[derive(Debug)]
pub(crate) struct SyncRound {
    pub(crate) started: Instant,
    pub(crate) local_finished: bool,
    pub(crate) remote_finished: bool,
    pub(crate) events_sent: usize,
    pub(crate) events_received: usize,
}

impl SyncRound {
    pub(crate) const fn new(started: Instant) -> Self {
        Self {
            started,
            local_finished: false,
            remote_finished: false,
            events_sent: 0,
            events_received: 0,
        }
    }

    pub(crate) const fn is_complete(&self) -> bool {
        self.local_finished && self.remote_finished
    }
}

/// Emitted exactly once for every round that finished in both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncCompleted {
    pub peer: skein_primitives::node::NodeId,
    pub events_sent: usize,
    pub events_received: usize,
    pub duration: Duration,
}

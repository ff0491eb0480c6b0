//! Role negotiation for reconnect: who teaches, who learns.

use core::fmt;
use std::sync::Arc;

use skein_gossip::fallen_behind::FallenBehindMonitor;
use skein_primitives::connection::Connection;
use skein_primitives::node::NodeId;
use skein_primitives::protocol::PeerProtocol;
use skein_primitives::roster::Roster;
use skein_primitives::status::{PlatformStatus, StatusSource};
use tracing::{error, info, warn};

use crate::config::SigningThreshold;
use crate::error::ReconnectError;
use crate::learner::ReconnectLearner;
use crate::metrics::ReconnectMetrics;
use crate::permit::ReconnectPromise;
use crate::state::{ReservedSignedState, SignedStateNexus};
use crate::teacher::ReconnectTeacher;
use crate::throttle::{RateLimitedLogger, TeacherThrottle};

/// Everything the per-peer reconnect protocols of one node share.
pub struct StateSyncContext {
    pub roster: Roster,
    pub signing_threshold: SigningThreshold,
    pub status: Arc<dyn StatusSource>,
    pub fallen_behind: Arc<FallenBehindMonitor>,
    pub promise: Arc<ReconnectPromise>,
    pub throttle: Arc<TeacherThrottle>,
    pub nexus: Arc<SignedStateNexus>,
    pub learner: ReconnectLearner,
    pub teacher: ReconnectTeacher,
    pub rejection_log: RateLimitedLogger,
    pub metrics: Arc<ReconnectMetrics>,
}

impl fmt::Debug for StateSyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSyncContext")
            .field("roster", &self.roster)
            .field("signing_threshold", &self.signing_threshold)
            .field("promise", &self.promise)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum InitiatedBy {
    #[default]
    NoOne,
    /// We asked to learn.
    Learner,
    /// The peer asked us to teach.
    Peer,
}

/// Negotiates reconnect with a single peer over the blocking connection manager.
pub struct StateSyncPeerProtocol {
    peer: NodeId,
    context: Arc<StateSyncContext>,
    initiated_by: InitiatedBy,
    teacher_state: Option<ReservedSignedState>,
}

impl StateSyncPeerProtocol {
    #[must_use]
    pub const fn new(peer: NodeId, context: Arc<StateSyncContext>) -> Self {
        Self {
            peer,
            context,
            initiated_by: InitiatedBy::NoOne,
            teacher_state: None,
        }
    }

    #[must_use]
    pub const fn peer(&self) -> NodeId {
        self.peer
    }

    fn reject(&mut self, key: &'static str, reason: &str) {
        if self.context.rejection_log.should_log(key) {
            info!(peer = %self.peer, reason, "Rejecting reconnect request");
        }

        self.teacher_state = None;
        self.context.metrics.rejected(self.peer);
    }

    fn teach<C: Connection>(&mut self, connection: &C) -> Result<(), ReconnectError> {
        let state = self.teacher_state.take();

        let result = match &state {
            Some(state) => self.context.teacher.execute(connection, state),
            None => Err(ReconnectError::NoStateToTeach),
        };
        drop(state);

        self.context.throttle.reconnect_attempt_finished();
        self.context.promise.unblock();

        result
    }

    fn learn<C: Connection>(&mut self, connection: &C) -> Result<(), ReconnectError> {
        let baseline = self.context.nexus.get();

        info!(
            peer = %self.peer,
            baseline_round = ?baseline.as_ref().map(|state| state.round()),
            "Starting reconnect as learner"
        );

        match self.context.learner.execute(connection, baseline.as_deref()) {
            Ok(state) => {
                self.context.promise.provide(state);
                Ok(())
            }
            Err(err) => {
                error!(peer = %self.peer, %err, "Reconnect as learner failed");
                connection.disconnect();
                self.context.promise.fail();
                Err(err)
            }
        }
    }
}

impl<C: Connection> PeerProtocol<C> for StateSyncPeerProtocol {
    type Error = ReconnectError;

    fn should_initiate(&mut self) -> bool {
        if !self.context.fallen_behind.should_reconnect_from(self.peer) {
            return false;
        }

        let acquired = self.context.promise.acquire();
        if acquired {
            self.initiated_by = InitiatedBy::Learner;
        }
        acquired
    }

    fn initiate_failed(&mut self) {
        self.context.promise.release();
        self.initiated_by = InitiatedBy::NoOne;
    }

    fn should_accept(&mut self) -> bool {
        match self.context.status.current_status() {
            PlatformStatus::Behind => {
                self.reject("behind", "this node has fallen behind");
                return false;
            }
            PlatformStatus::Active => {}
            _ => {
                self.reject("not active", "this node is not active");
                return false;
            }
        }

        let Some(state) = self.context.nexus.get() else {
            self.reject("no state", "no fully signed state");
            return false;
        };

        if !state.is_complete(&self.context.roster, self.context.signing_threshold) {
            if self.context.rejection_log.should_log("incomplete") {
                error!(
                    peer = %self.peer,
                    round = state.round(),
                    "Latest state handed to teach is not fully signed"
                );
            }
            drop(state);
            self.reject("incomplete", "latest state is not fully signed");
            return false;
        }

        // finish teaching before learning
        if !self.context.promise.try_block() {
            drop(state);
            self.reject("learning", "this node is learning");
            return false;
        }

        if !self.context.throttle.initiate_reconnect(self.peer) {
            drop(state);
            self.reject("throttled", "teacher throttle");
            self.context.promise.unblock();
            return false;
        }

        self.teacher_state = Some(state);
        self.initiated_by = InitiatedBy::Peer;
        true
    }

    fn accept_failed(&mut self) {
        self.teacher_state = None;
        self.context.throttle.reconnect_attempt_finished();
        self.context.promise.unblock();
        self.initiated_by = InitiatedBy::NoOne;
    }

    fn accept_on_simultaneous_initiate(&self) -> bool {
        // both sides behind, neither can teach
        false
    }

    fn run_protocol(&mut self, connection: &C) -> Result<(), ReconnectError> {
        let role = core::mem::take(&mut self.initiated_by);

        match role {
            InitiatedBy::Peer => self.teach(connection),
            InitiatedBy::Learner => self.learn(connection),
            InitiatedBy::NoOne => {
                warn!(peer = %self.peer, "Reconnect protocol started without a role");
                Err(ReconnectError::NoRole)
            }
        }
    }
}

impl fmt::Debug for StateSyncPeerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSyncPeerProtocol")
            .field("peer", &self.peer)
            .field("initiated_by", &self.initiated_by)
            .field("teacher_state", &self.teacher_state)
            .finish_non_exhaustive()
    }
}

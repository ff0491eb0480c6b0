//! Drives reconnect attempts once this node has fallen behind.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use skein_gossip::controller::GossipController;
use skein_gossip::fallen_behind::{FallenBehindMonitor, ReconnectStarter};
use skein_primitives::clock::Clock;
use skein_primitives::node::NodeId;
use skein_primitives::roster::Roster;
use skein_primitives::status::{StatusAction, StatusActionSubmitter};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ReconnectConfig;
use crate::error::ReconnectError;
use crate::metrics::ReconnectMetrics;
use crate::permit::ReconnectPromise;
use crate::state::{ReservedSignedState, SignedState};
use crate::wiring::ReconnectWiring;

/// Why the node gives up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    /// Fell behind while reconnect is disabled or no longer allowed.
    BehindReconnectDisabled,
    /// Too many failed reconnects in a row, or an unexpected controller failure.
    ReconnectFailure,
}

impl ExitCode {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::BehindReconnectDisabled => 3,
            Self::ReconnectFailure => 4,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BehindReconnectDisabled => "behind and reconnect disabled",
            Self::ReconnectFailure => "reconnect failure",
        })
    }
}

/// Terminates the node. Implementations for tests record instead.
pub trait SystemExit: Send + Sync {
    fn exit(&self, code: ExitCode);
}

/// Exits the process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExit;

impl SystemExit for ProcessExit {
    #[expect(clippy::exit, reason = "a node that cannot catch up must not keep running")]
    fn exit(&self, code: ExitCode) {
        error!(%code, exit_code = code.code(), "Shutting down");
        std::process::exit(code.code());
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Attempt {
    Done,
    Retry,
    Exited,
}

struct Inner {
    self_id: NodeId,
    config: ReconnectConfig,
    roster: Roster,
    clock: Arc<dyn Clock>,
    startup: Instant,
    gossip: Arc<dyn GossipController>,
    wiring: ReconnectWiring,
    promise: Arc<ReconnectPromise>,
    status: Arc<dyn StatusActionSubmitter>,
    fallen_behind: Arc<FallenBehindMonitor>,
    exit: Arc<dyn SystemExit>,
    metrics: Arc<ReconnectMetrics>,
    runtime: Handle,
    running: AtomicBool,
    failures_in_a_row: AtomicU32,
}

/// Pauses gossip, waits for a learner to receive a state, loads it and resumes gossip,
/// retrying until it works or the failure budget is spent.
#[derive(Clone)]
pub struct ReconnectController {
    inner: Arc<Inner>,
}

/// Collaborators of a [`ReconnectController`].
pub struct ReconnectControllerParts {
    pub self_id: NodeId,
    pub config: ReconnectConfig,
    pub roster: Roster,
    pub clock: Arc<dyn Clock>,
    pub gossip: Arc<dyn GossipController>,
    pub wiring: ReconnectWiring,
    pub promise: Arc<ReconnectPromise>,
    pub status: Arc<dyn StatusActionSubmitter>,
    pub fallen_behind: Arc<FallenBehindMonitor>,
    pub exit: Arc<dyn SystemExit>,
    pub metrics: Arc<ReconnectMetrics>,
    pub runtime: Handle,
}

impl fmt::Debug for ReconnectControllerParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectControllerParts")
            .field("self_id", &self.self_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReconnectController {
    /// Startup time, for the reconnect window, is taken from `parts.clock` now.
    #[must_use]
    pub fn new(parts: ReconnectControllerParts) -> Self {
        let startup = parts.clock.now();

        Self {
            inner: Arc::new(Inner {
                self_id: parts.self_id,
                config: parts.config,
                roster: parts.roster,
                startup,
                clock: parts.clock,
                gossip: parts.gossip,
                wiring: parts.wiring,
                promise: parts.promise,
                status: parts.status,
                fallen_behind: parts.fallen_behind,
                exit: parts.exit,
                metrics: parts.metrics,
                runtime: parts.runtime,
                running: AtomicBool::new(false),
                failures_in_a_row: AtomicU32::new(0),
            }),
        }
    }

    /// Starts the reconnect loop unless it is already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            error!("Reconnect controller is already running");
            return None;
        }

        info!(node = %self.inner.self_id, "Starting reconnect controller");

        let this = self.clone();
        Some(self.inner.runtime.spawn(async move {
            this.run().await;
            this.inner.running.store(false, Ordering::Release);
        }))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn failures_in_a_row(&self) -> u32 {
        self.inner.failures_in_a_row.load(Ordering::Acquire)
    }

    async fn run(&self) {
        loop {
            match self.execute_reconnect().await {
                Ok(Attempt::Retry) => {
                    warn!("Reconnect failed, retrying");
                    tokio::time::sleep(self.inner.config.minimum_time_between_reconnects).await;
                }
                Ok(Attempt::Done | Attempt::Exited) => return,
                Err(err) => {
                    error!(%err, "Unexpected error while reconnecting");
                    self.inner.exit.exit(ExitCode::ReconnectFailure);
                    return;
                }
            }
        }
    }

    async fn execute_reconnect(&self) -> Result<Attempt, ReconnectError> {
        if self.exit_if_reconnect_is_disabled() {
            return Ok(Attempt::Exited);
        }

        self.prepare_for_reconnect().await?;

        info!("Waiting for a learner to receive a state");
        let Some(state) = self.inner.promise.receive().await else {
            info!("Receiving a signed state failed");
            return Ok(self.retry_or_exit());
        };

        if let Err(err) = self.load_signed_state(state) {
            error!(%err, "Could not load the reconnect state");
            self.inner.wiring.clear();
            return Ok(self.retry_or_exit());
        }

        self.successful_reconnect();
        self.inner.gossip.resume();

        info!("Reconnect complete, gossip resumed");

        Ok(Attempt::Done)
    }

    /// Stops gossip and drops every piece of work that refers to the state being replaced.
    async fn prepare_for_reconnect(&self) -> Result<(), ReconnectError> {
        info!("Preparing for reconnect, stopping gossip");

        let gossip = Arc::clone(&self.inner.gossip);
        tokio::task::spawn_blocking(move || gossip.pause())
            .await
            .map_err(|_| ReconnectError::Interrupted)?;

        self.inner.gossip.clear();
        self.inner.wiring.clear();

        info!("Queues have been cleared");

        Ok(())
    }

    /// Initializes the state and registers it everywhere, or nowhere.
    pub fn load_signed_state(&self, mut state: SignedState) -> Result<(), ReconnectError> {
        let before = *state.hash();

        self.inner.wiring.initialize(&mut state);

        let after = state.compute_hash()?;
        if after != before {
            return Err(ReconnectError::HashChanged { before, after });
        }

        if state.snapshot().roster != self.inner.roster {
            return Err(ReconnectError::RosterMismatch);
        }

        let round = state.round();
        let window = state.snapshot().event_window;
        let reserved = ReservedSignedState::new(Arc::new(state));

        self.inner.wiring.register(&reserved)?;
        self.inner.gossip.load_event_window(window)?;

        self.inner
            .status
            .submit_status_action(StatusAction::ReconnectComplete { round });
        self.inner.fallen_behind.reset();

        info!(round, %window, "Loaded reconnect state");

        Ok(())
    }

    pub fn successful_reconnect(&self) {
        self.inner.failures_in_a_row.store(0, Ordering::Release);
    }

    /// Counts a failure and shuts the node down once the configured maximum is reached.
    ///
    /// Returns whether the node was told to exit.
    pub fn handle_failed_reconnect(&self) -> bool {
        self.inner.metrics.failed();

        let failures = self
            .inner
            .failures_in_a_row
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);

        if failures >= self.inner.config.maximum_reconnect_failures_before_shutdown {
            error!(failures, "Too many reconnect failures in a row, shutting down");
            self.inner.exit.exit(ExitCode::ReconnectFailure);
            return true;
        }

        warn!(failures, "Reconnect failed");
        false
    }

    /// Shuts the node down if reconnect is off, or its window since startup has passed.
    ///
    /// Returns whether the node was told to exit.
    pub fn exit_if_reconnect_is_disabled(&self) -> bool {
        let config = &self.inner.config;

        if !config.active {
            warn!(node = %self.inner.self_id, "Fallen behind and reconnect is disabled");
            self.inner.exit.exit(ExitCode::BehindReconnectDisabled);
            return true;
        }

        if let Some(window) = config.reconnect_window {
            let since_startup = self.inner.clock.elapsed_since(self.inner.startup);

            if since_startup.as_secs() > window.as_secs() {
                warn!(
                    node = %self.inner.self_id,
                    ?window,
                    "Fallen behind outside of the reconnect window"
                );
                self.inner.exit.exit(ExitCode::BehindReconnectDisabled);
                return true;
            }
        }

        false
    }

    fn retry_or_exit(&self) -> Attempt {
        if self.handle_failed_reconnect() {
            Attempt::Exited
        } else {
            Attempt::Retry
        }
    }
}

impl ReconnectStarter for ReconnectController {
    fn start_reconnect(&self) {
        let _ignored = self.start();
    }
}

impl fmt::Debug for ReconnectController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectController")
            .field("self_id", &self.inner.self_id)
            .field("running", &self.is_running())
            .field("failures_in_a_row", &self.failures_in_a_row())
            .field("wiring", &self.inner.wiring)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "tests/controller.rs"]
mod tests;

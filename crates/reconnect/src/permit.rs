//! The platform wide learner permit and the hand-over of a received state to the controller.

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::state::SignedState;

#[derive(Debug, Default, PartialEq, Eq)]
enum Permit {
    #[default]
    Free,
    Learning,
    /// Teaching sessions in progress; no learning until they end.
    Blocked(usize),
}

#[derive(Debug)]
enum Outcome {
    Received(SignedState),
    Failed,
}

#[derive(Debug, Default)]
struct Inner {
    permit: Permit,
    outcome: Option<Outcome>,
}

/// At most one learner per node, and never while teaching.
///
/// The learner acquires the permit in `should_initiate`, runs, and leaves its outcome here; the
/// permit is returned once the reconnect controller has taken that outcome through
/// [`Self::receive`].
#[derive(Debug, Default)]
pub struct ReconnectPromise {
    inner: Mutex<Inner>,
    ready: Notify,
}

impl ReconnectPromise {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the learner permit.
    pub fn acquire(&self) -> bool {
        let mut inner = self.inner.lock();

        if inner.permit != Permit::Free || inner.outcome.is_some() {
            return false;
        }

        inner.permit = Permit::Learning;
        true
    }

    /// Returns a learner permit whose learning never started.
    pub fn release(&self) {
        let mut inner = self.inner.lock();

        if inner.permit == Permit::Learning {
            inner.permit = Permit::Free;
        } else {
            warn!(permit = ?inner.permit, "Releasing a learner permit that is not held");
        }
    }

    /// Keeps learners out while a teaching session runs.
    pub fn try_block(&self) -> bool {
        let mut inner = self.inner.lock();

        inner.permit = match inner.permit {
            Permit::Free => Permit::Blocked(1),
            Permit::Blocked(count) => Permit::Blocked(count.saturating_add(1)),
            Permit::Learning => return false,
        };
        true
    }

    pub fn unblock(&self) {
        let mut inner = self.inner.lock();

        inner.permit = match inner.permit {
            Permit::Blocked(1) => Permit::Free,
            Permit::Blocked(count) => Permit::Blocked(count.saturating_sub(1)),
            ref other => {
                warn!(permit = ?other, "Unblocking a learner permit that is not blocked");
                return;
            }
        };
    }

    /// The learner received and validated `state`.
    pub fn provide(&self, state: SignedState) {
        self.complete(Outcome::Received(state));
    }

    /// The learner gave up.
    pub fn fail(&self) {
        self.complete(Outcome::Failed);
    }

    /// Waits for the learner and frees the permit. `None` means the learner failed.
    pub async fn receive(&self) -> Option<SignedState> {
        loop {
            if let Some(outcome) = self.take() {
                return match outcome {
                    Outcome::Received(state) => Some(state),
                    Outcome::Failed => None,
                };
            }

            self.ready.notified().await;
        }
    }

    #[must_use]
    pub fn is_learning(&self) -> bool {
        self.inner.lock().permit == Permit::Learning
    }

    fn complete(&self, outcome: Outcome) {
        {
            let mut inner = self.inner.lock();
            if inner.permit != Permit::Learning {
                warn!(permit = ?inner.permit, "Learner outcome without the learner permit");
            }
            if inner.outcome.replace(outcome).is_some() {
                warn!("Overwriting an unclaimed learner outcome");
            }
        }

        debug!("Learner outcome ready");
        self.ready.notify_one();
    }

    fn take(&self) -> Option<Outcome> {
        let mut inner = self.inner.lock();
        let outcome = inner.outcome.take()?;

        if inner.permit == Permit::Learning {
            inner.permit = Permit::Free;
        }

        Some(outcome)
    }
}

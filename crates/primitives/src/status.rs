use core::fmt;

use serde::{Deserialize, Serialize};

/// Coarse lifecycle status of the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum PlatformStatus {
    StartingUp,
    Observing,
    Checking,
    Active,
    Behind,
    ReconnectComplete,
    Freezing,
    FreezeComplete,
    CatastrophicFailure,
}

impl PlatformStatus {
    /// Whether gossip may start new syncs while in this status.
    #[must_use]
    pub const fn permits_gossip(self) -> bool {
        matches!(
            self,
            Self::Observing | Self::Checking | Self::Active | Self::ReconnectComplete | Self::Freezing
        )
    }
}

impl fmt::Display for PlatformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartingUp => "STARTING_UP",
            Self::Observing => "OBSERVING",
            Self::Checking => "CHECKING",
            Self::Active => "ACTIVE",
            Self::Behind => "BEHIND",
            Self::ReconnectComplete => "RECONNECT_COMPLETE",
            Self::Freezing => "FREEZING",
            Self::FreezeComplete => "FREEZE_COMPLETE",
            Self::CatastrophicFailure => "CATASTROPHIC_FAILURE",
        };
        f.write_str(name)
    }
}

/// Inputs to the platform status state machine produced by gossip and reconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatusAction {
    /// Enough peers told us we are behind.
    FallenBehind,
    /// A reconnect state for `round` has been loaded.
    ReconnectComplete { round: u64 },
}

/// Sink for [`StatusAction`]s.
pub trait StatusActionSubmitter: Send + Sync {
    fn submit_status_action(&self, action: StatusAction);
}

/// Read access to the current platform status.
pub trait StatusSource: Send + Sync {
    fn current_status(&self) -> PlatformStatus;
}

#[cfg(any(test, feature = "testing"))]
pub use recording::{RecordingStatusSubmitter, SharedStatus};

#[cfg(any(test, feature = "testing"))]
mod recording {
    use parking_lot::Mutex;

    use super::{PlatformStatus, StatusAction, StatusActionSubmitter, StatusSource};

    /// Remembers every action it is handed.
    #[derive(Debug, Default)]
    pub struct RecordingStatusSubmitter {
        actions: Mutex<Vec<StatusAction>>,
    }

    impl RecordingStatusSubmitter {
        #[must_use]
        pub fn actions(&self) -> Vec<StatusAction> {
            self.actions.lock().clone()
        }
    }

    impl StatusActionSubmitter for RecordingStatusSubmitter {
        fn submit_status_action(&self, action: StatusAction) {
            self.actions.lock().push(action);
        }
    }

    /// A settable status.
    #[derive(Debug)]
    pub struct SharedStatus(Mutex<PlatformStatus>);

    impl SharedStatus {
        #[must_use]
        pub fn new(status: PlatformStatus) -> Self {
            Self(Mutex::new(status))
        }

        pub fn set(&self, status: PlatformStatus) {
            *self.0.lock() = status;
        }
    }

    impl StatusSource for SharedStatus {
        fn current_status(&self) -> PlatformStatus {
            *self.0.lock()
        }
    }
}

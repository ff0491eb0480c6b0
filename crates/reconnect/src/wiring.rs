//! Where a reconnect state goes once it has been received.

use core::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ReconnectError;
use crate::state::{ReservedSignedState, SignedState, SignedStateNexus};

/// A component that must switch over to the reconnect state: integrity checking, the latest
/// state pointer, state saving, hash logging, signature collection, consensus, roster history,
/// the running event hash and the event log writer.
pub trait StateConsumer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Refuses states this consumer cannot take. Nothing is registered anywhere if any
    /// consumer refuses.
    fn check(&self, _state: &SignedState) -> Result<(), String> {
        Ok(())
    }

    /// Takes over `state`. Runs only after every consumer passed [`Self::check`].
    fn register(&self, state: ReservedSignedState);

    /// Drops in-flight work that refers to the old state.
    fn clear(&self) {}
}

/// Lets the application initialize a freshly received state before it is used.
pub trait StateInitializer: Send + Sync {
    fn on_state_initialized(&self, state: &mut SignedState);
}

/// The set of [`StateConsumer`]s a reconnect state is registered with.
#[derive(Default)]
pub struct ReconnectWiring {
    initializer: Option<Arc<dyn StateInitializer>>,
    consumers: Vec<Arc<dyn StateConsumer>>,
}

impl ReconnectWiring {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_initializer(mut self, initializer: Arc<dyn StateInitializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    #[must_use]
    pub fn with_consumer(mut self, consumer: Arc<dyn StateConsumer>) -> Self {
        self.consumers.push(consumer);
        self
    }

    pub fn initialize(&self, state: &mut SignedState) {
        if let Some(initializer) = &self.initializer {
            initializer.on_state_initialized(state);
        }
    }

    /// Clears every consumer's in-flight work.
    pub fn clear(&self) {
        for consumer in &self.consumers {
            consumer.clear();
        }
        debug!(consumers = self.consumers.len(), "Cleared in-flight work");
    }

    /// Registers `state` with every consumer, or with none of them.
    pub fn register(&self, state: &ReservedSignedState) -> Result<(), ReconnectError> {
        for consumer in &self.consumers {
            consumer
                .check(state)
                .map_err(|reason| ReconnectError::RegistrationRefused {
                    consumer: consumer.name(),
                    reason,
                })?;
        }

        for consumer in &self.consumers {
            consumer.register(state.reserve());
        }

        info!(
            round = state.round(),
            consumers = self.consumers.len(),
            "Reconnect state registered"
        );

        Ok(())
    }
}

impl fmt::Debug for ReconnectWiring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectWiring")
            .field(
                "consumers",
                &self.consumers.iter().map(|consumer| consumer.name()).collect::<Vec<_>>(),
            )
            .field("initializer", &self.initializer.is_some())
            .finish()
    }
}

/// The latest state pointer, which is also what this node teaches from.
impl StateConsumer for SignedStateNexus {
    fn name(&self) -> &'static str {
        "latest state"
    }

    fn register(&self, state: ReservedSignedState) {
        self.set(state);
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::handler::RpcPeerHandler;
use super::message::{GossipRpcMessage, GossipRpcReceiver};
use crate::controller::SyncGate;

/// The single dispatch context of one RPC peer: feeds inbound messages and periodic ticks to its
/// [`RpcPeerHandler`] until the conversation ends.
#[derive(Debug)]
pub struct RpcPeerDriver {
    handler: RpcPeerHandler,
    inbound: mpsc::UnboundedReceiver<GossipRpcMessage>,
    gate: Arc<SyncGate>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl RpcPeerDriver {
    #[must_use]
    pub fn new(
        handler: RpcPeerHandler,
        inbound: mpsc::UnboundedReceiver<GossipRpcMessage>,
        gate: Arc<SyncGate>,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            handler,
            inbound,
            gate,
            cancel,
            poll_interval,
        }
    }

    /// Runs until the conversation is broken, the peer hangs up, or the handler asks to stop.
    ///
    /// The handler is cleaned up and handed back either way.
    pub async fn run(mut self) -> RpcPeerHandler {
        let peer = self.handler.peer();
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!(%peer, "Conversation broken");
                    break;
                }
                message = self.inbound.recv() => {
                    let Some(message) = message else {
                        debug!(%peer, "Peer hung up");
                        break;
                    };
                    self.handler.dispatch(message);
                }
                _ = ticker.tick() => {
                    if !self.handler.check_for_periodic_actions(self.gate.is_healthy()) {
                        info!(%peer, "Gossip unhealthy, ending conversation");
                        break;
                    }
                }
            }
        }

        self.cancel.cancel();
        self.handler.cleanup();

        self.handler
    }
}

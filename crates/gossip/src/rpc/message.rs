use borsh::{BorshDeserialize, BorshSerialize};
use skein_primitives::event::GossipEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::wire::SyncData;

/// Everything one RPC peer may send another over the multiplexed gossip channel.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum GossipRpcMessage {
    SyncData(SyncData),
    Tips(Vec<bool>),
    Events(Vec<GossipEvent>),
    EndOfEvents,
    /// A self event pushed outside of any sync round.
    BroadcastEvent(GossipEvent),
}

/// Outgoing half of an RPC conversation. Sends never block.
pub trait GossipRpcSender: Send + Sync {
    fn send_sync_data(&self, data: SyncData);

    fn send_tips(&self, tips: Vec<bool>);

    fn send_events(&self, events: Vec<GossipEvent>);

    fn send_end_of_events(&self);

    fn send_broadcast_event(&self, event: GossipEvent);

    /// Tears the conversation down; the transport is closed rather than told anything.
    fn break_conversation(&self);
}

/// Incoming half of an RPC conversation, driven from a single dispatch context.
pub trait GossipRpcReceiver {
    fn receive_sync_data(&mut self, data: SyncData);

    fn receive_tips(&mut self, tips: Vec<bool>);

    fn receive_events(&mut self, events: Vec<GossipEvent>);

    fn receive_events_finished(&mut self);

    fn receive_broadcast_event(&mut self, event: GossipEvent);

    fn dispatch(&mut self, message: GossipRpcMessage) {
        match message {
            GossipRpcMessage::SyncData(data) => self.receive_sync_data(data),
            GossipRpcMessage::Tips(tips) => self.receive_tips(tips),
            GossipRpcMessage::Events(events) => self.receive_events(events),
            GossipRpcMessage::EndOfEvents => self.receive_events_finished(),
            GossipRpcMessage::BroadcastEvent(event) => self.receive_broadcast_event(event),
        }
    }
}

/// [`GossipRpcSender`] over an in-process channel, as used by the peer drivers.
///
/// Breaking the conversation cancels the local driver, which drops its sender and so ends the
/// remote driver's inbound stream as well.
#[derive(Clone, Debug)]
pub struct ChannelRpcSender {
    tx: mpsc::UnboundedSender<GossipRpcMessage>,
    cancel: CancellationToken,
}

impl ChannelRpcSender {
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<GossipRpcMessage>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    fn send(&self, message: GossipRpcMessage) {
        if self.tx.send(message).is_err() {
            debug!("Peer channel closed, dropping message");
        }
    }
}

impl GossipRpcSender for ChannelRpcSender {
    fn send_sync_data(&self, data: SyncData) {
        self.send(GossipRpcMessage::SyncData(data));
    }

    fn send_tips(&self, tips: Vec<bool>) {
        self.send(GossipRpcMessage::Tips(tips));
    }

    fn send_events(&self, events: Vec<GossipEvent>) {
        self.send(GossipRpcMessage::Events(events));
    }

    fn send_end_of_events(&self) {
        self.send(GossipRpcMessage::EndOfEvents);
    }

    fn send_broadcast_event(&self, event: GossipEvent) {
        self.send(GossipRpcMessage::BroadcastEvent(event));
    }

    fn break_conversation(&self) {
        self.cancel.cancel();
    }
}

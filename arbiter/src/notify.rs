use crate::{message::Notification, ClientId};
use tokio::sync::mpsc;
use tracing::debug;

/// Where the arbiter delivers per-client replies.
///
/// Implementations must not block; the transport owns buffering and decides
/// what to do with notifications for clients that are already gone.
pub trait NotifySink: Send + Sync + std::fmt::Debug {
    fn notify(&self, client: ClientId, notification: Notification);
}

/// Forwards every notification into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(ClientId, Notification)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(ClientId, Notification)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotifySink for ChannelSink {
    fn notify(&self, client: ClientId, notification: Notification) {
        if self.tx.send((client, notification)).is_err() {
            debug!(%client, "notification receiver dropped");
        }
    }
}

mod actor;
mod messages;

use crate::types::{OutputSender, OutputStream};
use actor::Actor;
use messages::Message;

use tokio::sync::mpsc;

/// Fans one output stream (a job's stdout or stderr) out to any number of subscribers.
///
/// This struct is actually an actor handle. The real work is done in the actor spawned by `BroadcasterHandle::spawn`.
/// Subscribers see chunks in the order they were produced; their channel closes once the
/// source completes, and a subscriber that drops its receiver is unsubscribed without
/// affecting the others. Subscribing after completion yields an already-closed channel.
#[derive(Clone)]
pub struct BroadcasterHandle {
    sender: mpsc::UnboundedSender<Message>,
}

impl BroadcasterHandle {
    /// `subscribers` are attached before the first chunk is read from `source`.
    pub fn spawn(source: OutputStream, subscribers: Vec<OutputSender>) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        Actor::spawn(inbox, source, subscribers);
        Self { sender }
    }

    pub fn subscribe(&self, subscriber: OutputSender) {
        let _ = self.sender.send(Message::Subscribe { subscriber });
    }

    /// Subscribe a fresh channel and hand back its receiving end.
    pub fn stream(&self) -> OutputStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(tx);
        rx
    }
}

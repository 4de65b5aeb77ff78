use super::messages::Message;
use crate::types::{OutputSender, OutputStream};

use tokio::select;
use tokio::sync::mpsc;

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<Message>,
    source: OutputStream,
    subscribers: Vec<OutputSender>,
}

impl Actor {
    pub fn spawn(
        inbox: mpsc::UnboundedReceiver<Message>,
        source: OutputStream,
        subscribers: Vec<OutputSender>,
    ) {
        let actor = Actor {
            inbox,
            source,
            subscribers,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        loop {
            select! {
                // subscriptions requested before a chunk was produced must see that chunk
                biased;
                Some(msg) = self.inbox.recv() => {
                    match msg {
                        Message::Subscribe { subscriber } => self.subscribers.push(subscriber),
                    }
                }
                maybe_blob = self.source.recv() => {
                    match maybe_blob {
                        Some(blob) => {
                            self.subscribers.retain(|sub| {
                                // only retain subscribers who have not dropped
                                sub.send(blob.clone()).is_ok()
                            });
                        }
                        None => break,
                    }
                }
            }
        }
        // dropping the senders tells every subscriber the stream is complete
        self.subscribers.clear();
    }
}

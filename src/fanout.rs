//! Delivers everything the bridge pushes to every connected subscriber.
//!
//! The registry is owned by a single task, so registering, unregistering
//! and broadcasting are applied one at a time in arrival order.
//! Because each broadcast is handed to every subscriber before the next one is
//! looked at, all subscribers see messages in the same relative order.
//!
//! Every subscriber has its own queue of [`SUBSCRIBER_QUEUE`] messages.
//! Handing a message over never waits: when a subscriber's queue is full
//! its oldest message is dropped, and its next read reports
//! [`broadcast::error::RecvError::Lagged`] with how many were missed.
//! A slow subscriber thereby loses output without holding up anyone else.

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, info_span, trace, Instrument};

use crate::{
    protocol::Outgoing,
    subscriber::{Subscriber, SubscriberId},
};

/// How many pushed messages a subscriber may fall behind by before the
/// oldest ones are dropped.
pub const SUBSCRIBER_QUEUE: usize = 256;

#[derive(Debug)]
enum FanoutMessage {
    Register {
        subscriber: Subscriber,
        sender: broadcast::Sender<Outgoing>,
    },
    Unregister(SubscriberId),
    Broadcast(Outgoing),
    Count(oneshot::Sender<usize>),
}

/// A handle to the fanout task.
#[derive(Debug, Clone)]
pub struct FanoutHandle(mpsc::UnboundedSender<FanoutMessage>);

impl FanoutHandle {
    /// Start a fanout with no subscribers.
    /// It lives for as long as any handle does.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut fanout = Fanout {
            subscribers: vec![],
            requests: rx,
        };

        tokio::spawn(async move { fanout.run().await }.instrument(info_span!("Fanout")));

        Self(tx)
    }

    fn post(&self, message: FanoutMessage) {
        self.0.send(message).expect("Fanout task should be alive");
    }

    /// Start delivering to this subscriber.
    ///
    /// Delivery stops once the returned receiver is dropped.
    /// Registering the same subscriber again replaces its queue.
    pub fn register(&self, subscriber: &Subscriber) -> broadcast::Receiver<Outgoing> {
        let (sender, receiver) = broadcast::channel(SUBSCRIBER_QUEUE);

        self.post(FanoutMessage::Register {
            subscriber: subscriber.clone(),
            sender,
        });

        receiver
    }

    /// Stop delivering to this subscriber.
    /// Unknown subscribers are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        self.post(FanoutMessage::Unregister(id));
    }

    /// Deliver a message to everyone registered.
    /// Does not wait for delivery.
    pub fn broadcast(&self, message: Outgoing) {
        self.post(FanoutMessage::Broadcast(message));
    }

    /// How many subscribers are registered right now.
    ///
    /// Anything posted through this handle before asking is accounted for.
    pub async fn count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.post(FanoutMessage::Count(tx));

        rx.await.expect("Fanout should always reply")
    }
}

impl Default for FanoutHandle {
    fn default() -> Self {
        Self::new()
    }
}

struct Fanout {
    // Registration order is delivery order.
    subscribers: Vec<(Subscriber, broadcast::Sender<Outgoing>)>,

    requests: mpsc::UnboundedReceiver<FanoutMessage>,
}

impl Fanout {
    async fn run(&mut self) {
        while let Some(message) = self.requests.recv().await {
            match message {
                FanoutMessage::Register { subscriber, sender } => {
                    info!(%subscriber, "Registered");
                    self.subscribers.retain(|(s, _)| s.id != subscriber.id);
                    self.subscribers.push((subscriber, sender));
                }
                FanoutMessage::Unregister(id) => {
                    let before = self.subscribers.len();
                    self.subscribers.retain(|(s, _)| s.id != id);

                    if self.subscribers.len() < before {
                        info!(%id, "Unregistered");
                    }
                }
                FanoutMessage::Broadcast(message) => self.broadcast(message),
                FanoutMessage::Count(reply) => {
                    let _ = reply.send(self.subscribers.len());
                }
            }
        }

        debug!("All handles dropped, fanout done");
    }

    fn broadcast(&mut self, message: Outgoing) {
        trace!(%message, subscribers = self.subscribers.len(), "Broadcast");

        // Only fails when the receiver is gone, a full queue drops its oldest instead.
        self.subscribers.retain(|(subscriber, sender)| {
            if sender.send(message.clone()).is_ok() {
                true
            } else {
                info!(%subscriber, "Receiver gone, removing subscriber");
                false
            }
        });
    }
}

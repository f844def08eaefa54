//! Event Bus
//!
//! Typed fan-out of events to any number of subscribers. Each subscriber
//! owns an unbounded queue and drains it on its own task, so delivery to one
//! subscriber is always sequential and in publication order.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Publish/subscribe channel for one event type.
pub struct EventBus<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone> EventBus<E> {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        EventBus {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Adds a subscriber. Events published from now on are queued for it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Queues `event` for every live subscriber.
    ///
    /// Never blocks. Subscribers whose receiver was dropped are pruned.
    /// Returns the number of subscribers reached.
    pub fn publish(&self, event: E) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Number of subscribers, including ones not yet pruned.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

//! Event System
//!
//! Events the signal provider emits to the application, and callbacks to
//! receive them.

use std::sync::Arc;

use parking_lot::RwLock;

use super::command::{Envelope, Signal};

/// Keepalive progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingEvent {
    /// The next ping was scheduled.
    Scheduled,
    /// A ping went out.
    Sent,
    /// A scheduled ping was cancelled.
    Cancelled,
    /// The server answered the ping.
    PongReceived,
    /// The pong watch was cancelled before it fired.
    PongCancelled,
    /// No pong arrived in time; the connection is being dropped.
    PongTimeout,
}

/// Events emitted by the signal provider.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// The session connected or disconnected.
    ConnectionChanged {
        /// True once the handshake is acknowledged.
        connected: bool,
    },

    /// The server assigned a new client id.
    NewClientId {
        /// The assigned id.
        client_id: String,
    },

    /// A command was released for dispatch.
    CommandReceived {
        /// The released envelope.
        envelope: Envelope,
    },

    /// Application signals arrived, in order.
    SignalReceived {
        /// The released signals.
        signals: Vec<Signal>,
    },

    /// A session finished binding.
    SubscriptionComplete {
        /// Session key.
        session_key: String,
        /// Subscription id.
        subscription_id: String,
    },

    /// Keepalive progress.
    Ping(PingEvent),

    /// A protocol failure.
    Exception {
        /// Error description.
        message: String,
    },

    /// A channel version advanced.
    VersionChanged {
        /// Channel key.
        key: String,
        /// New version.
        version: i64,
    },
}

/// Event handler trait.
///
/// Implement this trait to receive signal events. Handlers run on one
/// delivery task, one event at a time.
pub trait EventHandler: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: SignalEvent);
}

/// Simple callback-based event handler.
///
/// Wraps a closure for easy event handling.
pub struct CallbackHandler<F>
where
    F: Fn(SignalEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(SignalEvent) + Send + Sync,
{
    /// Creates a new callback handler.
    pub fn new(callback: F) -> Self {
        CallbackHandler { callback }
    }
}

impl<F> EventHandler for CallbackHandler<F>
where
    F: Fn(SignalEvent) + Send + Sync,
{
    fn on_event(&self, event: SignalEvent) {
        (self.callback)(event);
    }
}

/// Event dispatcher for managing multiple handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    pub fn new() -> Self {
        EventDispatcher {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Adds an event handler.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Removes all handlers.
    pub fn clear_handlers(&self) {
        self.handlers.write().clear();
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Dispatches an event to all handlers.
    pub fn dispatch(&self, event: SignalEvent) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler.on_event(event.clone());
        }
    }
}

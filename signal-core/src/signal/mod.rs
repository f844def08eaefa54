//! Signal Session Layer
//!
//! The session protocol spoken over the socket transport.
//!
//! # Architecture
//!
//! - **Commands**: JSON envelopes exchanged with the signal server
//! - **Provider**: Handshake, presence, keepalive, ordered dispatch and backfill
//! - **Subscriptions**: Session binding through a [`SessionBinder`]
//! - **Events**: What the application observes

pub mod command;
pub mod config;
pub mod events;
mod keepalive;
pub mod provider;
pub mod subscription;

// Wire protocol
pub use command::{
    Command, Envelope, Presence, PresenceCategory, SequenceRange, Signal, DEFAULT_CHANNEL,
};

// Configuration
pub use config::{SignalConfig, MAX_BACKOFF_LIMIT_SECS};

// Application events
pub use events::{CallbackHandler, EventDispatcher, EventHandler, PingEvent, SignalEvent};

// Session driver
pub use provider::{SignalProvider, SignalProviderBuilder};

// Session binding
pub use subscription::{BindRequest, SessionBinder, Subscription};

// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signal Core Library
//!
//! Real-time session client for a push-notification server: ordered
//! per-channel delivery, gap backfill, keepalive and reconnection.

pub mod network;
pub mod settings;
pub mod signal;
pub mod state;
pub mod window;

pub use network::{
    ConnectionHandle, ConnectionState, DisconnectCause, MockConnector, ReconnectPolicy,
    SignalError, SocketTransport, WebSocketConnector,
};
pub use settings::{MemorySettingsStore, SettingsStore};
pub use signal::{
    Command, Envelope, Presence, PresenceCategory, SignalConfig, SignalEvent, SignalProvider,
};
pub use state::{StateError, StateManager};
pub use window::{ReceiveResult, SlidingWindow, WindowConfig};

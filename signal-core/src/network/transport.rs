//! Transport Abstractions
//!
//! Connection states, endpoint configuration and the [`Connector`] seam that
//! produces physical sockets.

use std::pin::Pin;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{Sink, Stream};
use serde::{Deserialize, Serialize};

use super::error::SignalError;
use super::handle::{ConnectionHandle, DisconnectCause};
use crate::state::StateManager;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, SignalError>;

/// Connection state, shared by connection handles and the signal provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never connected.
    None,
    /// Physical connect in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Handshake acknowledged by the server.
    Authenticated,
    /// Teardown in progress.
    Disconnecting,
    /// Socket closed.
    Disconnected,
}

impl ConnectionState {
    /// Every legal edge.
    pub const TRANSITIONS: &'static [(ConnectionState, ConnectionState)] = &[
        (ConnectionState::None, ConnectionState::Connecting),
        (ConnectionState::Connecting, ConnectionState::Connected),
        (ConnectionState::Connecting, ConnectionState::Disconnected),
        (ConnectionState::Connected, ConnectionState::Authenticated),
        (ConnectionState::Authenticated, ConnectionState::Connected),
        (ConnectionState::Connected, ConnectionState::Disconnecting),
        (ConnectionState::Connected, ConnectionState::Disconnected),
        (ConnectionState::Authenticated, ConnectionState::Disconnecting),
        (ConnectionState::Authenticated, ConnectionState::Disconnected),
        (ConnectionState::Disconnecting, ConnectionState::Disconnected),
        (ConnectionState::Disconnected, ConnectionState::Connecting),
        // Reconnect-strategy driven reconnection skips Connecting.
        (ConnectionState::Disconnected, ConnectionState::Connected),
    ];

    /// Builds a state manager in `None` loaded with [`Self::TRANSITIONS`].
    pub fn state_manager() -> StateManager<ConnectionState> {
        let states = StateManager::new(ConnectionState::None);
        for &(from, to) in Self::TRANSITIONS {
            states.add(from, to);
        }
        states
    }

    /// Returns true when a socket is open, authenticated or not.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Authenticated
        )
    }
}

/// One address the transport may dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request path, starting with `/`.
    pub path: String,
    /// Use `wss://` instead of `ws://`.
    pub tls: bool,
}

impl Endpoint {
    /// Builds and validates the WebSocket URL for this endpoint.
    pub fn url(&self) -> TransportResult<url::Url> {
        let scheme = if self.tls { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let raw = format!("{}://{}:{}{}", scheme, self.host, self.port, path);
        url::Url::parse(&raw)
            .map_err(|e| SignalError::Config(format!("invalid endpoint {}: {}", raw, e)))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Configuration for the socket transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Server host.
    pub host: String,
    /// Ports in failover order.
    pub ports: Vec<u16>,
    /// Request path.
    pub path: String,
    /// Use TLS.
    pub tls: bool,
    /// Per-port connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            host: String::new(),
            ports: vec![443],
            path: "/".to_string(),
            tls: true,
            connect_timeout_ms: 10_000,
        }
    }
}

impl TransportConfig {
    /// Endpoints in the order they are tried.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.ports
            .iter()
            .map(|&port| Endpoint {
                host: self.host.clone(),
                port,
                path: self.path.clone(),
                tls: self.tls,
            })
            .collect()
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Applies a server redirect.
    ///
    /// The host is replaced; a given port is moved to the front of the
    /// failover list.
    pub fn redirect(&mut self, host: Option<&str>, port: Option<u16>) {
        if let Some(host) = host {
            if !host.is_empty() {
                self.host = host.to_string();
            }
        }
        if let Some(port) = port {
            self.ports.retain(|&p| p != port);
            self.ports.insert(0, port);
        }
    }
}

/// Outbound half of a physical socket.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SignalError> + Send>>;

/// Inbound half of a physical socket. Ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = TransportResult<String>> + Send>>;

/// A connected physical socket, split into halves.
pub struct RawSocket {
    /// Frames to the server.
    pub sink: FrameSink,
    /// Frames from the server.
    pub stream: FrameStream,
}

impl RawSocket {
    /// Bundles the two halves.
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        RawSocket { sink, stream }
    }
}

/// Produces physical sockets.
///
/// This abstracts the underlying mechanism (WebSocket, in-memory mock)
/// so the transport and everything above it can be tested without a
/// network.
pub trait Connector: Send + Sync + 'static {
    /// Opens a socket to `endpoint`.
    fn connect(&self, endpoint: Endpoint) -> BoxFuture<'static, TransportResult<RawSocket>>;
}

/// Events published by the socket transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A handle finished connecting.
    Connected(ConnectionHandle),
    /// A handle was torn down. Published exactly once per handle.
    Disconnected {
        /// The destroyed handle.
        handle: ConnectionHandle,
        /// Why it went away.
        cause: DisconnectCause,
    },
    /// A text frame arrived on a live handle.
    Frame {
        /// The handle the frame arrived on.
        handle: ConnectionHandle,
        /// Frame payload.
        text: String,
    },
}

impl TransportEvent {
    /// The handle this event belongs to.
    pub fn handle(&self) -> &ConnectionHandle {
        match self {
            TransportEvent::Connected(handle) => handle,
            TransportEvent::Disconnected { handle, .. } => handle,
            TransportEvent::Frame { handle, .. } => handle,
        }
    }
}

//! Network + Transport Layer
//!
//! Owns the physical connection to the signal server and its recovery.
//!
//! # Architecture
//!
//! The network layer consists of:
//! - **Connector trait**: Produces physical sockets (WebSocket or in-memory mock)
//! - **Connection handle**: One generation of a connection, safe to act on from any task
//! - **Socket transport**: At most one live connection, connect/disconnect/write as futures
//! - **Reconnect strategy**: Schedules reconnects after network-caused disconnects
//! - **Event bus**: Ordered fan-out of transport events to subscribers
//!
//! # Example
//!
//! ```ignore
//! use signal_core::network::{MockConnector, SocketTransport, TransportConfig};
//!
//! // Create a transport with a mock connector (for testing)
//! let connector = Arc::new(MockConnector::new());
//! let transport = SocketTransport::new(TransportConfig::default(), connector.clone());
//!
//! let handle = transport.connect().await?;
//! let mut server = connector.next_peer().await.unwrap();
//! transport.write(&handle, "hello").await?;
//! assert_eq!(server.recv().await.as_deref(), Some("hello"));
//! ```

pub mod error;
pub mod events;
pub mod handle;
pub mod mock;
pub mod reconnect;
pub mod socket;
pub mod transport;
pub mod websocket;

// Error types
pub use error::{ErrorCategory, SignalError};

// Event fan-out
pub use events::EventBus;

// Connection handles
pub use handle::{ConnectionHandle, Destroyable, DisconnectCause, TaskGuard};

// Transport abstraction
pub use transport::{
    ConnectionState, Connector, Endpoint, FrameSink, FrameStream, RawSocket, TransportConfig,
    TransportEvent, TransportResult,
};

// Socket transport
pub use socket::{PendingConnect, SocketTransport};

// Reconnection
pub use reconnect::{ReconnectPolicy, ReconnectStrategy};

// Mock connector for testing
pub use mock::{MockConnector, MockOutcome, MockPeer};

// WebSocket connector for production
pub use websocket::WebSocketConnector;

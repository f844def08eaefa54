// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common Test Utilities
//!
//! Shared helpers, fixtures, and utilities used across test modules.
//! Everything here runs against [`MockConnector`], so no test touches the
//! network.

#![allow(dead_code)]

pub mod strategies;

use std::sync::Arc;
use std::time::Duration;

use signal_core::network::{MockConnector, MockPeer, ReconnectPolicy, TransportConfig};
use signal_core::settings::MemorySettingsStore;
use signal_core::signal::{
    Command, Envelope, Presence, Signal, SignalConfig, SignalEvent, SignalProvider,
    SignalProviderBuilder,
};
use tokio::sync::mpsc;

/// Host every test configuration points at.
pub const HOST: &str = "signal.test";

/// Upper bound on any single wait. Time is paused in async tests, so this
/// only trips when the awaited thing never happens.
pub const WAIT: Duration = Duration::from_secs(3_600);

/// Provider configuration with reconnects off and a ping interval long
/// enough to stay out of the way.
pub fn test_config() -> SignalConfig {
    let mut config = SignalConfig::new(HOST);
    config.reconnect = ReconnectPolicy::None;
    config.ping_timeout_ms = 600_000;
    config
}

/// Transport configuration dialing `ports` in order.
pub fn transport_config(ports: &[u16]) -> TransportConfig {
    TransportConfig {
        host: HOST.into(),
        ports: ports.to_vec(),
        ..Default::default()
    }
}

/// A provider wired to a mock server.
pub struct Harness {
    pub provider: SignalProvider,
    pub connector: Arc<MockConnector>,
    pub settings: Arc<MemorySettingsStore>,
    pub events: mpsc::UnboundedReceiver<SignalEvent>,
}

impl Harness {
    pub fn new(config: SignalConfig) -> Self {
        Self::build(config, MemorySettingsStore::new(), None)
    }

    pub fn build(
        config: SignalConfig,
        settings: MemorySettingsStore,
        presence: Option<Presence>,
    ) -> Self {
        Self::custom(config, settings, |builder| match presence {
            Some(presence) => builder.presence(presence),
            None => builder,
        })
    }

    /// Builds the provider after `customize` had a go at the builder.
    pub fn custom<F>(config: SignalConfig, settings: MemorySettingsStore, customize: F) -> Self
    where
        F: FnOnce(SignalProviderBuilder) -> SignalProviderBuilder,
    {
        let connector = Arc::new(MockConnector::new());
        let settings = Arc::new(settings);
        let builder = SignalProvider::builder(config)
            .connector(connector.clone())
            .settings(settings.clone());
        let provider = customize(builder)
            .build()
            .expect("valid test configuration");
        let events = provider.subscribe();
        Harness {
            provider,
            connector,
            settings,
            events,
        }
    }

    /// Connects and returns the server side of the new socket.
    pub async fn connect(&mut self) -> MockPeer {
        self.provider.connect().await.expect("connect");
        next_peer(&self.connector).await
    }

    /// Connects, completes the handshake as `client_id` and waits for the
    /// session to report itself connected.
    pub async fn authenticate(&mut self, client_id: &str) -> MockPeer {
        let mut peer = self.connect().await;
        let hello = next_command(&mut peer).await;
        assert_eq!(hello.command.name(), "connect");
        peer.send(connect_ack(client_id));
        self.wait_for(|e| matches!(e, SignalEvent::ConnectionChanged { connected: true }))
            .await;
        peer
    }

    /// Waits for the first event matching `predicate`, skipping others.
    pub async fn wait_for<F>(&mut self, predicate: F) -> SignalEvent
    where
        F: Fn(&SignalEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Some(event) if predicate(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event stream ended"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Every event queued so far.
    pub fn drain_events(&mut self) -> Vec<SignalEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Waits for the next accepted mock connection.
pub async fn next_peer(connector: &MockConnector) -> MockPeer {
    tokio::time::timeout(WAIT, connector.next_peer())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Waits for the next frame the client wrote and decodes it.
pub async fn next_command(peer: &mut MockPeer) -> Envelope {
    let frame = tokio::time::timeout(WAIT, peer.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("client closed the connection");
    Envelope::decode(&frame).expect("client frames decode")
}

/// Waits for the next frame carrying the command `name`, skipping others.
pub async fn next_command_named(peer: &mut MockPeer, name: &str) -> Envelope {
    loop {
        let envelope = next_command(peer).await;
        if envelope.command.name() == name {
            return envelope;
        }
    }
}

/// Pushes `envelope` to the client.
pub fn push(peer: &MockPeer, envelope: Envelope) {
    assert!(peer.send(envelope.encode().expect("encode")), "peer closed");
}

/// A successful handshake acknowledgment.
pub fn connect_ack(client_id: &str) -> String {
    Envelope::new(Command::ConnectAck {
        success: true,
        client_id: Some(client_id.to_string()),
        message: None,
    })
    .encode()
    .expect("encode")
}

/// A one-signal command sequenced within `channel`.
pub fn signal_envelope(channel: &str, sequence: i64) -> Envelope {
    Envelope::sequenced(
        channel,
        sequence,
        Command::Signal {
            signals: vec![Signal {
                id: format!("{}-{}", channel, sequence),
                scope: None,
                event: "message".into(),
                content: serde_json::json!({ "sequence": sequence }),
            }],
        },
    )
}

/// Signal ids carried by a `SignalReceived` event.
pub fn signal_ids(event: &SignalEvent) -> Vec<String> {
    match event {
        SignalEvent::SignalReceived { signals } => signals.iter().map(|s| s.id.clone()).collect(),
        _ => Vec::new(),
    }
}

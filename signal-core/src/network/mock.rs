// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mock Connector
//!
//! In-memory connector for testing without a network. Connect outcomes are
//! scripted per attempt, and every accepted connection hands the test a
//! [`MockPeer`] playing the server side.

use std::collections::VecDeque;

use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::{sink, stream};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::error::SignalError;
use super::transport::{Connector, Endpoint, RawSocket, TransportResult};

/// Outcome of one scripted connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// The socket opens.
    Accept,
    /// The endpoint refuses with the given reason.
    Refuse(String),
    /// The connect never completes.
    Hang,
}

struct MockState {
    script: VecDeque<MockOutcome>,
    fallback: MockOutcome,
    attempts: Vec<Endpoint>,
}

/// Mock connector for testing.
pub struct MockConnector {
    state: Mutex<MockState>,
    peer_tx: mpsc::UnboundedSender<MockPeer>,
    peer_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>,
}

impl MockConnector {
    /// Creates a connector that accepts every attempt.
    pub fn new() -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        MockConnector {
            state: Mutex::new(MockState {
                script: VecDeque::new(),
                fallback: MockOutcome::Accept,
                attempts: Vec::new(),
            }),
            peer_tx,
            peer_rx: tokio::sync::Mutex::new(peer_rx),
        }
    }

    /// Queues the outcome of the next unscripted attempt.
    pub fn script(&self, outcome: MockOutcome) {
        self.state.lock().script.push_back(outcome);
    }

    /// Sets the outcome used once the script runs out.
    pub fn set_fallback(&self, outcome: MockOutcome) {
        self.state.lock().fallback = outcome;
    }

    /// Endpoints dialed so far, in order.
    pub fn attempts(&self) -> Vec<Endpoint> {
        self.state.lock().attempts.clone()
    }

    /// Number of connect attempts so far.
    pub fn attempt_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// Waits for the server side of the next accepted connection.
    pub async fn next_peer(&self) -> Option<MockPeer> {
        self.peer_rx.lock().await.recv().await
    }

    /// Returns the server side of an accepted connection, if one is waiting.
    pub fn try_next_peer(&self) -> Option<MockPeer> {
        self.peer_rx.try_lock().ok()?.try_recv().ok()
    }

    fn accept(&self, endpoint: Endpoint) -> RawSocket {
        let (to_client, client_rx) = mpsc::unbounded_channel::<TransportResult<String>>();
        let (client_tx, from_client) = mpsc::unbounded_channel::<String>();

        let sink = sink::unfold(client_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| SignalError::SendFailed("peer went away".into()))?;
            Ok::<_, SignalError>(tx)
        });
        let stream = stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let _ = self.peer_tx.send(MockPeer {
            endpoint,
            to_client: Some(to_client),
            from_client,
        });
        RawSocket::new(Box::pin(sink), Box::pin(stream))
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MockConnector {
    fn connect(&self, endpoint: Endpoint) -> BoxFuture<'static, TransportResult<RawSocket>> {
        let outcome = {
            let mut state = self.state.lock();
            state.attempts.push(endpoint.clone());
            match state.script.pop_front() {
                Some(outcome) => outcome,
                None => state.fallback.clone(),
            }
        };

        match outcome {
            MockOutcome::Accept => future::ready(Ok(self.accept(endpoint))).boxed(),
            MockOutcome::Refuse(reason) => {
                future::ready(Err(SignalError::ConnectionFailed(reason))).boxed()
            }
            MockOutcome::Hang => future::pending().boxed(),
        }
    }
}

/// Server side of one mock connection.
pub struct MockPeer {
    endpoint: Endpoint,
    to_client: Option<mpsc::UnboundedSender<TransportResult<String>>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    /// The endpoint the client dialed.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Pushes a text frame to the client. Returns false once closed.
    pub fn send(&self, text: impl Into<String>) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(Ok(text.into())).is_ok(),
            None => false,
        }
    }

    /// Waits for the next frame written by the client.
    ///
    /// Returns `None` once the client closed its side.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Returns the next frame written by the client, if one is queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Drains every queued client frame.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Breaks the connection with a read error on the client side.
    pub fn fail(&mut self, reason: &str) {
        if let Some(tx) = self.to_client.take() {
            let _ = tx.send(Err(SignalError::ReceiveFailed(reason.to_string())));
        }
    }

    /// Closes the server side; the client sees end of stream.
    pub fn close(&mut self) {
        self.to_client.take();
    }

    /// Returns true while the client still reads from this connection.
    pub fn is_open(&self) -> bool {
        self.to_client.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl std::fmt::Debug for MockPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeer")
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .finish()
    }
}

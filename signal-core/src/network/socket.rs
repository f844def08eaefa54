// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Socket Transport
//!
//! Owns at most one physical socket at a time and exposes connect,
//! disconnect and write as futures over [`ConnectionHandle`]s.
//!
//! # Architecture
//!
//! Every connect attempt allocates a handle synchronously and spawns one
//! task for that generation. The task dials the configured endpoints in
//! failover order, pumps frames in both directions while connected, and
//! performs teardown. Teardown always runs in this order:
//!
//! 1. event delivery to the handle is detached,
//! 2. the current-handle slot is cleared under the transport lock,
//! 3. the `Disconnected` event is published,
//! 4. the socket is closed and the handle's disconnect future resolves.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::error::SignalError;
use super::events::EventBus;
use super::handle::{ConnectionHandle, DisconnectCause, Outbound};
use super::transport::{
    ConnectionState, Connector, Endpoint, FrameSink, FrameStream, RawSocket, TransportConfig,
    TransportEvent, TransportResult,
};

type ConnectResult = TransportResult<ConnectionHandle>;

/// An in-flight (or finished) connect attempt.
///
/// Resolves to the connected handle. Clones share one outcome, and the
/// allocated handle is available before the attempt completes.
#[derive(Clone)]
pub struct PendingConnect {
    handle: ConnectionHandle,
    result: Shared<BoxFuture<'static, ConnectResult>>,
}

impl PendingConnect {
    fn failed(handle: ConnectionHandle, err: SignalError) -> Self {
        PendingConnect {
            handle,
            result: future::ready(Err(err)).boxed().shared(),
        }
    }

    /// The handle allocated for this attempt.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Returns true if both refer to the same attempt.
    pub fn same_attempt(&self, other: &PendingConnect) -> bool {
        self.handle.same(&other.handle)
    }
}

impl Future for PendingConnect {
    type Output = ConnectResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.result.poll_unpin(cx)
    }
}

impl std::fmt::Debug for PendingConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingConnect")
            .field("handle", &self.handle)
            .finish()
    }
}

#[derive(Default)]
struct Slots {
    current: Option<ConnectionHandle>,
    connecting: Option<PendingConnect>,
}

struct TransportShared {
    connector: Arc<dyn Connector>,
    config: Mutex<TransportConfig>,
    slots: Mutex<Slots>,
    events: EventBus<TransportEvent>,
    next_id: AtomicU64,
}

impl TransportShared {
    /// Clears every slot that still points at `handle`.
    fn release(&self, handle: &ConnectionHandle) {
        let mut slots = self.slots.lock();
        if slots.current.as_ref().is_some_and(|h| h.same(handle)) {
            slots.current = None;
        }
        if slots
            .connecting
            .as_ref()
            .is_some_and(|p| p.handle.same(handle))
        {
            slots.connecting = None;
        }
    }

    fn publish_disconnected(&self, handle: &ConnectionHandle) {
        let cause = handle.cause().unwrap_or(DisconnectCause::Network);
        self.events.publish(TransportEvent::Disconnected {
            handle: handle.clone(),
            cause,
        });
    }
}

/// Socket transport holding at most one live connection.
///
/// # Example
///
/// ```ignore
/// use signal_core::network::{SocketTransport, TransportConfig, WebSocketConnector};
///
/// let transport = SocketTransport::new(config, Arc::new(WebSocketConnector::new()));
/// let mut events = transport.subscribe();
/// let handle = transport.connect().await?;
/// transport.write(&handle, r#"{"type":"ping","token":"t","timestamp":0,"request":true}"#).await?;
/// transport.disconnect(&handle, DisconnectCause::Manual).await;
/// ```
#[derive(Clone)]
pub struct SocketTransport {
    shared: Arc<TransportShared>,
}

impl SocketTransport {
    /// Creates a transport that dials through `connector`.
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        SocketTransport {
            shared: Arc::new(TransportShared {
                connector,
                config: Mutex::new(config),
                slots: Mutex::new(Slots::default()),
                events: EventBus::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribes to connect, disconnect and frame events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> TransportConfig {
        self.shared.config.lock().clone()
    }

    /// Applies a server redirect to the next connect attempt.
    pub fn set_endpoint(&self, host: Option<&str>, port: Option<u16>) {
        let mut config = self.shared.config.lock();
        config.redirect(host, port);
        info!(host = %config.host, ports = ?config.ports, "Transport redirected");
    }

    /// The live connection, if any.
    pub fn current(&self) -> Option<ConnectionHandle> {
        self.shared.slots.lock().current.clone()
    }

    /// The in-flight connect attempt, if any.
    pub fn pending(&self) -> Option<PendingConnect> {
        self.shared.slots.lock().connecting.clone()
    }

    /// Returns true while a live connection exists.
    pub fn is_connected(&self) -> bool {
        self.current().is_some_and(|h| h.is_connected())
    }

    /// Starts a connect attempt.
    ///
    /// While an attempt is in flight every call returns that same attempt.
    /// Calling this with a live connection is a programming error and yields
    /// an attempt that fails with [`SignalError::AlreadyConnected`].
    pub fn connect(&self) -> PendingConnect {
        let mut slots = self.shared.slots.lock();
        if let Some(pending) = &slots.connecting {
            debug!(id = pending.handle.id(), "Connect already in flight");
            return pending.clone();
        }
        if let Some(current) = slots.current.as_ref().filter(|h| !h.is_destroyed()) {
            error!(id = current.id(), "connect() called while a connection is active");
            return PendingConnect::failed(current.clone(), SignalError::AlreadyConnected);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = ConnectionHandle::new(id);
        let (tx, rx) = oneshot::channel();
        let result = rx
            .map(|outcome| outcome.unwrap_or(Err(SignalError::Cancelled)))
            .boxed()
            .shared();
        let pending = PendingConnect {
            handle: handle.clone(),
            result,
        };
        slots.connecting = Some(pending.clone());
        drop(slots);

        let (endpoints, timeout) = {
            let config = self.shared.config.lock();
            (config.endpoints(), config.connect_timeout())
        };
        debug!(id, endpoints = endpoints.len(), "Starting connect attempt");
        tokio::spawn(run_connection(
            self.shared.clone(),
            handle,
            endpoints,
            timeout,
            tx,
        ));
        pending
    }

    /// Tears down `handle`.
    ///
    /// Only the first call for a handle decides the cause; every call
    /// resolves once the socket is closed. Disconnecting a handle that is
    /// still connecting cancels the attempt.
    pub fn disconnect(
        &self,
        handle: &ConnectionHandle,
        cause: DisconnectCause,
    ) -> BoxFuture<'static, ConnectionHandle> {
        if handle.request_disconnect(cause) {
            info!(id = handle.id(), ?cause, "Disconnecting");
            handle.detach();
            self.shared.release(handle);
        } else {
            debug!(id = handle.id(), "Disconnect already requested");
        }
        let handle = handle.clone();
        async move {
            handle.disconnected().await;
            handle
        }
        .boxed()
    }

    /// Writes one text frame through `handle`.
    ///
    /// The frame is queued before this returns, so frames go out in call
    /// order. Fails fast unless the handle is connected.
    pub fn write(
        &self,
        handle: &ConnectionHandle,
        text: impl Into<String>,
    ) -> BoxFuture<'static, TransportResult<()>> {
        match handle.enqueue(text.into()) {
            Ok(ack) => async move { ack.await.unwrap_or(Err(SignalError::ConnectionClosed)) }.boxed(),
            Err(err) => {
                debug!(id = handle.id(), state = ?handle.state(), "Write rejected");
                future::ready(Err(err)).boxed()
            }
        }
    }
}

/// Resolves once the handle has been asked to shut down.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn open_socket(
    connector: &dyn Connector,
    endpoints: Vec<Endpoint>,
    timeout: Duration,
) -> TransportResult<RawSocket> {
    let mut last_error = SignalError::ConnectionFailed("no endpoints configured".into());
    for endpoint in endpoints {
        debug!(%endpoint, "Dialing");
        match tokio::time::timeout(timeout, connector.connect(endpoint.clone())).await {
            Ok(Ok(socket)) => {
                info!(%endpoint, "Socket open");
                return Ok(socket);
            }
            Ok(Err(err)) => {
                warn!(%endpoint, error = %err, "Endpoint refused connection");
                last_error = err;
            }
            Err(_) => {
                warn!(%endpoint, "Connect timed out");
                last_error = SignalError::Timeout;
            }
        }
    }
    Err(last_error)
}

fn fail(handle: &ConnectionHandle) {
    handle.request_disconnect(DisconnectCause::Network);
    handle.detach();
}

/// Drives one connection generation from dial to close.
async fn run_connection(
    shared: Arc<TransportShared>,
    handle: ConnectionHandle,
    endpoints: Vec<Endpoint>,
    timeout: Duration,
    result: oneshot::Sender<ConnectResult>,
) {
    let id = handle.id();
    let mut shutdown = handle.shutdown_signal();

    let opened = tokio::select! {
        biased;
        _ = stopped(&mut shutdown) => Err(SignalError::Cancelled),
        socket = open_socket(shared.connector.as_ref(), endpoints, timeout) => socket,
    };

    let socket = match opened {
        Ok(socket) => socket,
        Err(err) => {
            if err != SignalError::Cancelled {
                warn!(id, error = %err, "Connect attempt failed");
            }
            fail(&handle);
            shared.release(&handle);
            shared.publish_disconnected(&handle);
            handle.finish();
            let _ = result.send(Err(err));
            return;
        }
    };

    let (writer, outbound) = mpsc::unbounded_channel();
    let installed = {
        let mut slots = shared.slots.lock();
        if slots
            .connecting
            .as_ref()
            .is_some_and(|p| p.handle.same(&handle))
        {
            slots.connecting = None;
        }
        if handle.is_destroyed() {
            false
        } else {
            handle.attach_writer(writer);
            handle.transition(ConnectionState::Connected);
            slots.current = Some(handle.clone());
            true
        }
    };

    let RawSocket { mut sink, stream } = socket;
    if !installed {
        debug!(id, "Socket opened after disconnect was requested");
        shared.publish_disconnected(&handle);
        let _ = sink.close().await;
        handle.finish();
        let _ = result.send(Err(SignalError::Cancelled));
        return;
    }

    info!(id, "Connected");
    handle.deliver(|| {
        shared
            .events
            .publish(TransportEvent::Connected(handle.clone()));
    });
    let _ = result.send(Ok(handle.clone()));

    let cause = pump(&shared, &handle, &mut sink, stream, outbound, &mut shutdown).await;

    shared.release(&handle);
    shared.publish_disconnected(&handle);
    if let Err(err) = sink.close().await {
        debug!(id, error = %err, "Socket close reported an error");
    }
    handle.finish();
    info!(id, ?cause, "Connection closed");
}

/// Moves frames between the socket and the handle until either side stops.
async fn pump(
    shared: &TransportShared,
    handle: &ConnectionHandle,
    sink: &mut FrameSink,
    mut stream: FrameStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shutdown: &mut watch::Receiver<bool>,
) -> DisconnectCause {
    let id = handle.id();
    loop {
        tokio::select! {
            biased;
            _ = stopped(shutdown) => break,
            frame = stream.next() => match frame {
                Some(Ok(text)) => {
                    handle.deliver(|| {
                        shared.events.publish(TransportEvent::Frame {
                            handle: handle.clone(),
                            text,
                        });
                    });
                }
                Some(Err(err)) => {
                    warn!(id, error = %err, "Socket read failed");
                    fail(handle);
                    break;
                }
                None => {
                    info!(id, "Socket closed by peer");
                    fail(handle);
                    break;
                }
            },
            queued = outbound.recv() => match queued {
                Some(Outbound { text, ack }) => match sink.send(text).await {
                    Ok(()) => {
                        let _ = ack.send(Ok(()));
                    }
                    Err(err) => {
                        warn!(id, error = %err, "Socket write failed");
                        let _ = ack.send(Err(err));
                        fail(handle);
                        break;
                    }
                },
                // The writer is dropped only by detach.
                None => break,
            },
        }
    }
    handle.cause().unwrap_or(DisconnectCause::Network)
}

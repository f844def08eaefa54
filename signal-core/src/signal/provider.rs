// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signal Provider
//!
//! Session protocol driver on top of the socket transport: sends the
//! handshake, tracks the client id, exchanges presence, keeps the
//! connection alive, routes sequenced commands through per-channel sliding
//! windows, requests backfills and follows server disconnect instructions.
//!
//! # Architecture
//!
//! - One dispatch task consumes transport events, keepalive and reconnect
//!   control messages and hole timeouts, in that order of arrival.
//! - One delivery task calls the registered [`EventHandler`]s, so handlers
//!   never run on an I/O task and never concurrently.
//! - The current handle and the current connect attempt live under one
//!   session lock.
//!
//! # Example
//!
//! ```ignore
//! use signal_core::{Presence, PresenceCategory, SignalConfig, SignalProvider};
//!
//! let provider = SignalProvider::builder(SignalConfig::new("signal.example.com"))
//!     .presence(Presence::new("alice", PresenceCategory::Desktop))
//!     .build()?;
//! let mut events = provider.subscribe();
//! provider.connect().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command::{Command, Envelope, Presence, SequenceRange};
use super::config::SignalConfig;
use super::events::{EventDispatcher, EventHandler, PingEvent, SignalEvent};
use super::keepalive::Keepalive;
use super::subscription::{SessionBinder, Subscription, SubscriptionRegistry};
use crate::network::{
    ConnectionHandle, ConnectionState, Connector, DisconnectCause, EventBus, PendingConnect,
    ReconnectStrategy, SignalError, SocketTransport, TransportEvent, WebSocketConnector,
};
use crate::settings::{MemorySettingsStore, SettingsStore, CLIENT_ID_KEY};
use crate::state::StateManager;
use crate::window::{HoleExpiry, HoleTimeout, SlidingWindow};

/// Messages from provider timers to the dispatch task.
#[derive(Debug)]
pub(crate) enum Control {
    PingDue { generation: u64 },
    PongTimeout { generation: u64, token: String },
    Reconnect,
}

enum Input {
    Transport(TransportEvent),
    Control(Control),
    Hole(HoleTimeout),
}

#[derive(Default)]
struct Session {
    client_id: Option<String>,
    presence: Option<Presence>,
    handle: Option<ConnectionHandle>,
    connecting: Option<PendingConnect>,
    server_reconnect: Option<JoinHandle<()>>,
}

struct ProviderInner {
    config: SignalConfig,
    transport: SocketTransport,
    reconnect: ReconnectStrategy,
    settings: Arc<dyn SettingsStore>,
    binder: Option<Arc<dyn SessionBinder>>,
    state: StateManager<ConnectionState>,
    session: Mutex<Session>,
    windows: Mutex<HashMap<String, SlidingWindow<Envelope>>>,
    subscriptions: Mutex<SubscriptionRegistry>,
    keepalive: Mutex<Keepalive>,
    control: mpsc::UnboundedSender<Control>,
    holes: mpsc::UnboundedSender<HoleTimeout>,
    events: EventBus<SignalEvent>,
    outbox: mpsc::UnboundedSender<SignalEvent>,
    dispatcher: Arc<EventDispatcher>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Builder for [`SignalProvider`].
pub struct SignalProviderBuilder {
    config: SignalConfig,
    connector: Option<Arc<dyn Connector>>,
    settings: Option<Arc<dyn SettingsStore>>,
    binder: Option<Arc<dyn SessionBinder>>,
    presence: Option<Presence>,
}

impl SignalProviderBuilder {
    /// Starts a builder for `config`.
    pub fn new(config: SignalConfig) -> Self {
        SignalProviderBuilder {
            config,
            connector: None,
            settings: None,
            binder: None,
            presence: None,
        }
    }

    /// Uses `connector` instead of the WebSocket connector.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Uses `settings` instead of an in-memory store.
    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the collaborator that performs session binds.
    pub fn binder(mut self, binder: Arc<dyn SessionBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    /// Sets the presence announced at handshake.
    pub fn presence(mut self, presence: Presence) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Validates the configuration and starts the provider tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<SignalProvider, SignalError> {
        self.config.validate()?;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::new()) as Arc<dyn Connector>);
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(MemorySettingsStore::new()) as Arc<dyn SettingsStore>);
        let transport = SocketTransport::new(self.config.transport_config(), connector);
        let reconnect = ReconnectStrategy::new(self.config.reconnect.clone(), transport.clone());

        let (control, control_rx) = mpsc::unbounded_channel();
        let (holes, holes_rx) = mpsc::unbounded_channel();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let transport_rx = transport.subscribe();
        let dispatcher = Arc::new(EventDispatcher::new());

        let session = Session {
            client_id: settings.get(CLIENT_ID_KEY),
            presence: self.presence,
            ..Default::default()
        };
        let keepalive = Keepalive::new(self.config.ping_timeout(), self.config.pong_timeout());

        let inner = Arc::new(ProviderInner {
            config: self.config,
            transport,
            reconnect,
            settings,
            binder: self.binder,
            state: ConnectionState::state_manager(),
            session: Mutex::new(session),
            windows: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(SubscriptionRegistry::default()),
            keepalive: Mutex::new(keepalive),
            control,
            holes,
            events: EventBus::new(),
            outbox,
            dispatcher: dispatcher.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        let dispatch = tokio::spawn(run_dispatch(
            Arc::downgrade(&inner),
            transport_rx,
            control_rx,
            holes_rx,
        ));
        let delivery = tokio::spawn(run_delivery(dispatcher, outbox_rx));
        inner.tasks.lock().extend([dispatch, delivery]);

        info!(host = %inner.config.host, ports = ?inner.config.ports, "Signal provider ready");
        Ok(SignalProvider { inner })
    }
}

/// Session-level client of the signal server.
///
/// Cheap to clone; clones drive the same session. Dropping the last clone
/// stops reconnecting and tears the connection down.
#[derive(Clone)]
pub struct SignalProvider {
    inner: Arc<ProviderInner>,
}

impl SignalProvider {
    /// Starts building a provider.
    pub fn builder(config: SignalConfig) -> SignalProviderBuilder {
        SignalProviderBuilder::new(config)
    }

    /// Session state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Returns true once the handshake is acknowledged.
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.is(ConnectionState::Authenticated)
    }

    /// The client id assigned by the server, or the one being resumed.
    pub fn client_id(&self) -> Option<String> {
        self.inner.session.lock().client_id.clone()
    }

    /// The presence announced at handshake.
    pub fn presence(&self) -> Option<Presence> {
        self.inner.session.lock().presence.clone()
    }

    /// The live connection handle, if any.
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.inner.session.lock().handle.clone()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &SocketTransport {
        &self.inner.transport
    }

    /// The reconnect strategy bound to the transport.
    pub fn reconnect_strategy(&self) -> &ReconnectStrategy {
        &self.inner.reconnect
    }

    /// Subscribes to provider events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SignalEvent> {
        self.inner.events.subscribe()
    }

    /// Adds a handler called on the delivery task.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.inner.dispatcher.add_handler(handler);
    }

    /// Connects and starts reconnecting after network failures.
    ///
    /// Resolves once the socket is open; the handshake follows on its own.
    /// A connect while one is in flight joins that attempt.
    pub fn connect(&self) -> BoxFuture<'static, Result<ConnectionHandle, SignalError>> {
        self.inner.cancel_server_reconnect();
        self.inner.reconnect.cancel_pending();
        self.inner.reconnect.start();
        self.inner.begin_connect().boxed()
    }

    /// Disconnects on the user's behalf.
    ///
    /// Stops reconnecting and forgets channel windows and subscriptions.
    pub fn disconnect(&self) -> BoxFuture<'static, ()> {
        let inner = &self.inner;
        inner.reconnect.stop();
        inner.cancel_server_reconnect();
        inner.stop_keepalive();

        let mut targets: Vec<ConnectionHandle> = Vec::new();
        {
            let session = inner.session.lock();
            targets.extend(session.handle.clone());
            targets.extend(session.connecting.as_ref().map(|p| p.handle().clone()));
        }
        targets.extend(inner.transport.current());
        targets.extend(inner.transport.pending().map(|p| p.handle().clone()));
        let mut unique: Vec<ConnectionHandle> = Vec::new();
        for handle in targets {
            if !unique.iter().any(|seen| seen.same(&handle)) {
                unique.push(handle);
            }
        }

        let was_authenticated = inner.state.is(ConnectionState::Authenticated);
        if inner.state.get().is_connected() {
            inner.state.transition(ConnectionState::Disconnecting);
        }
        if was_authenticated {
            inner.emit(SignalEvent::ConnectionChanged { connected: false });
        }

        inner.windows.lock().clear();
        inner.subscriptions.lock().clear();
        info!(connections = unique.len(), "Disconnecting");

        let closing: Vec<_> = unique
            .iter()
            .map(|handle| inner.transport.disconnect(handle, DisconnectCause::Manual))
            .collect();
        let inner = self.inner.clone();
        async move {
            future::join_all(closing).await;
            inner.finish_disconnect();
        }
        .boxed()
    }

    /// Replaces the announced presence and announces it if authenticated.
    pub fn set_presence(&self, presence: Presence) {
        let handle = {
            let mut session = self.inner.session.lock();
            session.presence = Some(presence.clone());
            session.handle.clone()
        };
        if let Some(handle) = handle {
            if self.is_authenticated() {
                self.inner.post(
                    &handle,
                    &Envelope::new(Command::Presence {
                        presences: vec![presence],
                    }),
                );
            }
        }
    }

    /// Sends a command over the live connection.
    pub fn send(&self, envelope: impl Into<Envelope>) -> BoxFuture<'static, Result<(), SignalError>> {
        let envelope = envelope.into();
        let Some(handle) = self.handle() else {
            return future::ready(Err(SignalError::NotConnected)).boxed();
        };
        match envelope.encode() {
            Ok(frame) => self.inner.transport.write(&handle, frame),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    /// Forgets channel windows and subscriptions.
    pub fn reset(&self) {
        self.inner.windows.lock().clear();
        self.inner.subscriptions.lock().clear();
        info!("Session state reset");
    }

    /// Binds a session to this client.
    ///
    /// Fails with `NotConnected` unless connected, with `BindFailed` if the
    /// binder refuses, with `Timeout` if the server does not confirm within
    /// the bind timeout, and with `Cancelled` if an unbind for the same
    /// subscription arrives first.
    pub fn bind(
        &self,
        session_key: impl Into<String>,
        subscription_id: impl Into<String>,
        channels: Vec<String>,
    ) -> BoxFuture<'static, Result<Subscription, SignalError>> {
        let client_id = match self.connected_client_id() {
            Ok(client_id) => client_id,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        let subscription = Subscription {
            session_key: session_key.into(),
            client_id,
            subscription_id: subscription_id.into(),
            channels,
            bound: false,
        };
        let confirmed = self.inner.subscriptions.lock().insert(subscription.clone());
        let inner = self.inner.clone();
        let bind_timeout = inner.config.bind_timeout();
        info!(subscription = %subscription.subscription_id, "Binding session");

        async move {
            if let Some(binder) = inner.binder.clone() {
                if let Err(err) = binder.bind(subscription.request()).await {
                    warn!(subscription = %subscription.subscription_id, error = %err, "Bind failed");
                    inner.drop_unbound(&subscription.subscription_id);
                    return Err(match err {
                        SignalError::BindFailed(_) => err,
                        other => SignalError::BindFailed(other.to_string()),
                    });
                }
            }
            match tokio::time::timeout(bind_timeout, confirmed).await {
                Ok(Ok(())) => Ok(Subscription {
                    bound: true,
                    ..subscription
                }),
                Ok(Err(_)) => {
                    debug!(subscription = %subscription.subscription_id, "Bind cancelled");
                    Err(SignalError::Cancelled)
                }
                Err(_) => {
                    warn!(subscription = %subscription.subscription_id, "Bind timed out");
                    inner.drop_unbound(&subscription.subscription_id);
                    Err(SignalError::Timeout)
                }
            }
        }
        .boxed()
    }

    /// Releases a binding, cancelling its bind if still pending.
    pub fn unbind(
        &self,
        subscription_id: impl Into<String>,
    ) -> BoxFuture<'static, Result<(), SignalError>> {
        let subscription_id = subscription_id.into();
        if let Err(err) = self.connected_client_id() {
            return future::ready(Err(err)).boxed();
        }
        let Some(subscription) = self
            .inner
            .subscriptions
            .lock()
            .cancel_pending(&subscription_id)
        else {
            debug!(subscription = %subscription_id, "Unbind of unknown subscription");
            return future::ready(Ok(())).boxed();
        };
        let inner = self.inner.clone();
        info!(subscription = %subscription_id, "Unbinding session");

        async move {
            if let Some(binder) = inner.binder.clone() {
                binder.unbind(subscription.request()).await?;
            }
            inner.subscriptions.lock().remove(&subscription_id);
            Ok(())
        }
        .boxed()
    }

    /// A tracked subscription.
    pub fn subscription(&self, subscription_id: &str) -> Option<Subscription> {
        self.inner.subscriptions.lock().get(subscription_id)
    }

    /// Every tracked subscription.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subscriptions.lock().list()
    }

    fn connected_client_id(&self) -> Result<String, SignalError> {
        if !self.inner.state.get().is_connected() {
            return Err(SignalError::NotConnected);
        }
        self.client_id().ok_or(SignalError::NotConnected)
    }
}

impl std::fmt::Debug for SignalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalProvider")
            .field("state", &self.state())
            .field("client_id", &self.client_id())
            .finish()
    }
}

impl ProviderInner {
    fn emit(&self, event: SignalEvent) {
        self.events.publish(event.clone());
        let _ = self.outbox.send(event);
    }

    /// Writes a command without waiting for the acknowledgment.
    fn post(&self, handle: &ConnectionHandle, envelope: &Envelope) -> bool {
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(err) => {
                error!(command = envelope.command.name(), error = %err, "Encode failed");
                return false;
            }
        };
        match self.transport.write(handle, frame).now_or_never() {
            Some(Err(err)) => {
                warn!(command = envelope.command.name(), error = %err, "Send failed");
                false
            }
            _ => {
                debug!(id = handle.id(), command = envelope.command.name(), "Sent");
                true
            }
        }
    }

    fn begin_connect(&self) -> PendingConnect {
        let pending = {
            let mut session = self.session.lock();
            let pending = self.transport.connect();
            if pending.handle().state() == ConnectionState::Connecting {
                session.connecting = Some(pending.clone());
            }
            pending
        };
        if self
            .state
            .is_any(&[ConnectionState::None, ConnectionState::Disconnected])
        {
            self.state.transition(ConnectionState::Connecting);
        }
        pending
    }

    fn finish_disconnect(&self) {
        if self.state.is(ConnectionState::Disconnecting) {
            self.state.transition(ConnectionState::Disconnected);
        }
    }

    fn cancel_server_reconnect(&self) {
        if let Some(task) = self.session.lock().server_reconnect.take() {
            task.abort();
        }
    }

    fn stop_keepalive(&self) {
        let cancelled = self.keepalive.lock().stop();
        for event in cancelled {
            self.emit(SignalEvent::Ping(event));
        }
    }

    fn drop_unbound(&self, subscription_id: &str) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.get(subscription_id).is_some_and(|s| !s.bound) {
            subscriptions.remove(subscription_id);
        }
    }

    fn is_current(&self, handle: &ConnectionHandle) -> bool {
        self.session
            .lock()
            .handle
            .as_ref()
            .is_some_and(|current| current.same(handle))
    }

    fn handle_input(&self, input: Input) {
        match input {
            Input::Transport(TransportEvent::Connected(handle)) => self.on_connected(handle),
            Input::Transport(TransportEvent::Disconnected { handle, cause }) => {
                self.on_disconnected(handle, cause)
            }
            Input::Transport(TransportEvent::Frame { handle, text }) => self.on_frame(&handle, &text),
            Input::Control(control) => self.on_control(control),
            Input::Hole(timeout) => self.on_hole_timeout(timeout),
        }
    }

    fn on_connected(&self, handle: ConnectionHandle) {
        if handle.is_destroyed() {
            return;
        }
        match self.state.get() {
            ConnectionState::None => {
                self.state.transition(ConnectionState::Connecting);
                self.state.transition(ConnectionState::Connected);
            }
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                self.state.transition(ConnectionState::Connected);
            }
            ConnectionState::Disconnecting => {
                self.state.transition(ConnectionState::Disconnected);
                self.state.transition(ConnectionState::Connected);
            }
            ConnectionState::Connected | ConnectionState::Authenticated => {
                warn!(id = handle.id(), "Connected event while already connected");
                return;
            }
        }

        let (client_id, presence) = {
            let mut session = self.session.lock();
            session.handle = Some(handle.clone());
            if session
                .connecting
                .as_ref()
                .is_some_and(|p| p.handle().same(&handle))
            {
                session.connecting = None;
            }
            (session.client_id.clone(), session.presence.clone())
        };

        info!(id = handle.id(), client_id = ?client_id, "Connected, sending handshake");
        let connect = Command::Connect {
            client_id,
            versions: self.settings.versions(),
            presence,
        };
        self.post(&handle, &Envelope::new(connect));
    }

    fn on_disconnected(&self, handle: ConnectionHandle, cause: DisconnectCause) {
        let tracked = {
            let mut session = self.session.lock();
            let mut tracked = false;
            if session.handle.as_ref().is_some_and(|h| h.same(&handle)) {
                session.handle = None;
                tracked = true;
            }
            if session
                .connecting
                .as_ref()
                .is_some_and(|p| p.handle().same(&handle))
            {
                session.connecting = None;
                tracked = true;
            }
            tracked
        };
        if !tracked && !self.state.is_any(&[ConnectionState::Connecting, ConnectionState::Disconnecting]) {
            debug!(id = handle.id(), "Disconnect of untracked connection");
            return;
        }

        self.stop_keepalive();
        let was_authenticated = self.state.is(ConnectionState::Authenticated);
        if !self.state.is(ConnectionState::Disconnected) {
            self.state.transition(ConnectionState::Disconnected);
        }
        info!(id = handle.id(), ?cause, "Disconnected");
        if was_authenticated {
            self.emit(SignalEvent::ConnectionChanged { connected: false });
        }
    }

    fn on_frame(&self, handle: &ConnectionHandle, text: &str) {
        if handle.is_destroyed() || !self.is_current(handle) {
            debug!(id = handle.id(), "Frame for stale connection dropped");
            return;
        }
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(id = handle.id(), error = %err, "Undecodable frame");
                self.emit(SignalEvent::Exception {
                    message: err.to_string(),
                });
                return;
            }
        };

        let key = envelope
            .sequence_key()
            .map(|(channel, sequence)| (channel.to_string(), sequence));
        let released = match key {
            Some((channel, sequence)) => {
                let mut windows = self.windows.lock();
                let window = windows
                    .entry(channel.clone())
                    .or_insert_with(|| self.open_window(&channel));
                let (result, released) = window.receive(sequence, envelope);
                debug!(%channel, sequence, ?result, released = released.len(), "Sequenced command");
                released
            }
            None => vec![envelope],
        };

        for envelope in released {
            self.dispatch(handle, envelope);
        }
    }

    fn open_window(&self, channel: &str) -> SlidingWindow<Envelope> {
        let mut window =
            SlidingWindow::with_notifier(channel, self.config.window.clone(), self.holes.clone());
        if let Some(version) = self.settings.version(channel) {
            window.seed(version);
        }
        window
    }

    fn dispatch(&self, handle: &ConnectionHandle, envelope: Envelope) {
        match &envelope.command {
            Command::ConnectAck {
                success,
                client_id,
                message,
            } => self.on_connect_ack(handle, *success, client_id.as_deref(), message.as_deref()),
            Command::Presence { presences } => self.on_presence(handle, presences),
            Command::SubscriptionComplete {
                session_key,
                subscription_id,
                ..
            } => self.on_subscription_complete(handle, session_key, subscription_id),
            Command::Disconnect {
                ban,
                stop,
                host,
                port,
                reconnect_delay_secs,
            } => self.on_server_disconnect(
                handle,
                *ban || *stop,
                host.as_deref(),
                *port,
                *reconnect_delay_secs,
            ),
            Command::Ping {
                token,
                timestamp: _,
                request,
            } => self.on_ping(handle, token, *request),
            Command::Signal { signals } => self.emit(SignalEvent::SignalReceived {
                signals: signals.clone(),
            }),
            Command::Connect { .. } | Command::Backfill { .. } => {
                let err = SignalError::Protocol(format!(
                    "unexpected command: {}",
                    envelope.command.name()
                ));
                warn!(error = %err, "Client command received from server");
                self.emit(SignalEvent::Exception {
                    message: err.to_string(),
                });
            }
        }

        if let Some((channel, sequence)) = envelope.sequence_key() {
            if self.settings.set_version(channel, sequence) {
                self.emit(SignalEvent::VersionChanged {
                    key: channel.to_string(),
                    version: sequence,
                });
            }
        }
        self.emit(SignalEvent::CommandReceived { envelope });
    }

    fn on_connect_ack(
        &self,
        handle: &ConnectionHandle,
        success: bool,
        client_id: Option<&str>,
        message: Option<&str>,
    ) {
        if !success {
            let reason = message.unwrap_or("no reason given");
            let err = SignalError::Protocol(format!("handshake rejected: {}", reason));
            warn!(id = handle.id(), error = %err, "Handshake rejected");
            self.emit(SignalEvent::Exception {
                message: err.to_string(),
            });
            return;
        }
        if !self.state.is(ConnectionState::Connected) {
            let err = SignalError::Protocol("unexpected connect_ack".into());
            warn!(state = ?self.state.get(), error = %err, "Unexpected handshake acknowledgment");
            self.emit(SignalEvent::Exception {
                message: err.to_string(),
            });
            return;
        }
        self.state.transition(ConnectionState::Authenticated);

        if let Some(client_id) = client_id {
            let changed = {
                let mut session = self.session.lock();
                let changed = session.client_id.as_deref() != Some(client_id);
                session.client_id = Some(client_id.to_string());
                changed
            };
            if changed {
                info!(client_id, "New client id");
                self.settings.put(CLIENT_ID_KEY, client_id);
                self.emit(SignalEvent::NewClientId {
                    client_id: client_id.to_string(),
                });
            }
        }
        info!(id = handle.id(), "Session authenticated");
        self.emit(SignalEvent::ConnectionChanged { connected: true });

        for (channel, version) in self.settings.versions() {
            debug!(%channel, version, "Requesting backfill");
            self.post(
                handle,
                &Envelope::new(Command::Backfill {
                    key: channel,
                    ranges: vec![SequenceRange {
                        start: version,
                        end: None,
                    }],
                }),
            );
        }

        self.keepalive.lock().schedule(handle, &self.control);
        self.emit(SignalEvent::Ping(PingEvent::Scheduled));
    }

    fn announce_presence(&self, handle: &ConnectionHandle) -> bool {
        let Some(presence) = self.session.lock().presence.clone() else {
            return false;
        };
        self.post(
            handle,
            &Envelope::new(Command::Presence {
                presences: vec![presence],
            }),
        )
    }

    fn on_presence(&self, handle: &ConnectionHandle, presences: &[Presence]) {
        let Some(own) = self.session.lock().presence.clone() else {
            return;
        };
        if presences.iter().any(|p| p.matches(&own)) {
            debug!(address = %own.address, "Presence already known to server");
            return;
        }
        info!(address = %own.address, "Server lost our presence, re-announcing");
        self.announce_presence(handle);
    }

    fn on_subscription_complete(
        &self,
        handle: &ConnectionHandle,
        session_key: &str,
        subscription_id: &str,
    ) {
        self.announce_presence(handle);
        if !self.subscriptions.lock().complete(subscription_id) {
            debug!(subscription = subscription_id, "Completion for untracked subscription");
        }
        self.emit(SignalEvent::SubscriptionComplete {
            session_key: session_key.to_string(),
            subscription_id: subscription_id.to_string(),
        });
    }

    fn on_server_disconnect(
        &self,
        handle: &ConnectionHandle,
        final_disconnect: bool,
        host: Option<&str>,
        port: Option<u16>,
        delay_secs: Option<u64>,
    ) {
        self.reconnect.cancel_pending();
        self.stop_keepalive();

        if final_disconnect {
            warn!(id = handle.id(), "Server ended the session for good");
            self.reconnect.stop();
            self.emit(SignalEvent::Exception {
                message: "disconnected by server".into(),
            });
        } else {
            self.transport.set_endpoint(host, port);
            let delay = delay_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| self.config.server_reconnect_delay());
            info!(id = handle.id(), delay_secs = delay.as_secs(), "Server disconnect, reconnecting later");
            let control = self.control.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = control.send(Control::Reconnect);
            });
            if let Some(previous) = self.session.lock().server_reconnect.replace(task) {
                previous.abort();
            }
        }

        let _ = self.transport.disconnect(handle, DisconnectCause::Manual);
    }

    fn on_ping(&self, handle: &ConnectionHandle, token: &str, request: bool) {
        if request {
            debug!(token, "Answering server ping");
            self.post(handle, &Envelope::new(Command::pong(token, now_millis())));
            return;
        }
        let matched = self.keepalive.lock().pong_received(token);
        if !matched {
            debug!(token, "Unexpected pong");
            return;
        }
        self.emit(SignalEvent::Ping(PingEvent::PongReceived));
        self.keepalive.lock().schedule(handle, &self.control);
        self.emit(SignalEvent::Ping(PingEvent::Scheduled));
    }

    fn on_control(&self, control: Control) {
        match control {
            Control::PingDue { generation } => {
                let Some(handle) = self.session.lock().handle.clone() else {
                    return;
                };
                if !self.keepalive.lock().ping_due(generation) {
                    return;
                }
                let token = uuid::Uuid::new_v4().to_string();
                if self.post(&handle, &Envelope::new(Command::ping(token.clone(), now_millis()))) {
                    self.emit(SignalEvent::Ping(PingEvent::Sent));
                    self.keepalive.lock().watch_pong(token, &handle, &self.control);
                }
            }
            Control::PongTimeout { generation, token } => {
                if !self.keepalive.lock().pong_timed_out(generation, &token) {
                    return;
                }
                let Some(handle) = self.session.lock().handle.clone() else {
                    return;
                };
                warn!(id = handle.id(), "Pong timed out, dropping connection");
                self.emit(SignalEvent::Ping(PingEvent::PongTimeout));
                let _ = self.transport.disconnect(&handle, DisconnectCause::Network);
            }
            Control::Reconnect => {
                self.session.lock().server_reconnect = None;
                let idle = {
                    let session = self.session.lock();
                    session.handle.is_none() && session.connecting.is_none()
                };
                if idle && self.transport.current().is_none() {
                    info!("Reconnecting after server disconnect");
                    self.begin_connect();
                }
            }
        }
    }

    fn on_hole_timeout(&self, timeout: HoleTimeout) {
        let authenticated = self.state.is(ConnectionState::Authenticated);
        let expiry = match self.windows.lock().get_mut(&timeout.range.key) {
            Some(window) if !authenticated => {
                // Backfill and skips wait for the handshake.
                if window.defer(&timeout) {
                    debug!(range = %timeout.range, "Hole timed out before authentication");
                }
                return;
            }
            Some(window) => window.on_timeout(&timeout),
            None => HoleExpiry::Stale,
        };
        let handle = self.session.lock().handle.clone();
        match expiry {
            HoleExpiry::Backfill(range) => {
                let Some(handle) = handle else {
                    debug!(%range, "Hole timed out while offline");
                    return;
                };
                info!(%range, "Requesting backfill for hole");
                self.post(
                    &handle,
                    &Envelope::new(Command::Backfill {
                        key: range.key.clone(),
                        ranges: vec![SequenceRange {
                            start: range.start,
                            end: Some(range.end),
                        }],
                    }),
                );
            }
            HoleExpiry::Released(released) => {
                if let Some(handle) = handle {
                    for envelope in released {
                        self.dispatch(&handle, envelope);
                    }
                }
            }
            HoleExpiry::Stale => {}
        }
    }
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        self.reconnect.stop();
        if let Some(task) = self.session.get_mut().server_reconnect.take() {
            task.abort();
        }
        self.keepalive.get_mut().stop();
        if let Some(pending) = self.transport.pending() {
            let _ = self
                .transport
                .disconnect(pending.handle(), DisconnectCause::Manual);
        }
        if let Some(handle) = self.transport.current() {
            let _ = self.transport.disconnect(&handle, DisconnectCause::Manual);
        }
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        debug!("Signal provider dropped");
    }
}

async fn run_dispatch(
    weak: Weak<ProviderInner>,
    mut transport: mpsc::UnboundedReceiver<TransportEvent>,
    mut control: mpsc::UnboundedReceiver<Control>,
    mut holes: mpsc::UnboundedReceiver<HoleTimeout>,
) {
    loop {
        let input = tokio::select! {
            Some(event) = transport.recv() => Input::Transport(event),
            Some(message) = control.recv() => Input::Control(message),
            Some(timeout) = holes.recv() => Input::Hole(timeout),
            else => break,
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.handle_input(input);
    }
    debug!("Dispatch loop finished");
}

async fn run_delivery(
    dispatcher: Arc<EventDispatcher>,
    mut outbox: mpsc::UnboundedReceiver<SignalEvent>,
) {
    while let Some(event) = outbox.recv().await {
        dispatcher.dispatch(event);
    }
}

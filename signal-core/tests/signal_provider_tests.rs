// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for signal::provider
//! Session protocol against a scripted mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use signal_core::network::{ConnectionState, ErrorCategory, ReconnectPolicy, SignalError};
use signal_core::settings::{MemorySettingsStore, SettingsStore, CLIENT_ID_KEY};
use signal_core::signal::{
    BindRequest, CallbackHandler, Command, Envelope, PingEvent, Presence, PresenceCategory,
    SequenceRange, SessionBinder, SignalEvent, SignalProvider,
};

use common::{
    connect_ack, next_command, next_command_named, next_peer, push, signal_envelope, signal_ids,
    test_config, Harness,
};

fn alice() -> Presence {
    Presence::new("alice", PresenceCategory::Desktop)
}

fn is_connected(event: &SignalEvent) -> bool {
    matches!(event, SignalEvent::ConnectionChanged { connected: true })
}

fn is_disconnected(event: &SignalEvent) -> bool {
    matches!(event, SignalEvent::ConnectionChanged { connected: false })
}

fn is_signal(event: &SignalEvent) -> bool {
    matches!(event, SignalEvent::SignalReceived { .. })
}

/// Lets the dispatch task catch up without moving the clock far.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================
// Handshake
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_handshake_assigns_client_id() {
    let mut h = Harness::new(test_config());
    assert_eq!(h.provider.state(), ConnectionState::None);

    let mut peer = h.connect().await;
    match next_command(&mut peer).await.command {
        Command::Connect {
            client_id,
            versions,
            presence,
        } => {
            assert_eq!(client_id, None);
            assert!(versions.is_empty());
            assert_eq!(presence, None);
        }
        other => panic!("expected connect, got {:?}", other),
    }
    assert_eq!(h.provider.state(), ConnectionState::Connected);
    assert!(!h.provider.is_authenticated());

    peer.send(connect_ack("client-1"));

    let event = h
        .wait_for(|e| matches!(e, SignalEvent::NewClientId { .. }))
        .await;
    assert_eq!(
        event,
        SignalEvent::NewClientId {
            client_id: "client-1".into()
        }
    );
    h.wait_for(is_connected).await;
    assert!(h.provider.is_authenticated());
    assert_eq!(h.provider.client_id().as_deref(), Some("client-1"));
    assert_eq!(h.settings.get(CLIENT_ID_KEY).as_deref(), Some("client-1"));
    assert!(h.provider.handle().unwrap().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_resume_sends_stored_state_and_backfills() {
    let settings = MemorySettingsStore::with_versions([("inbox", 41)]);
    settings.put(CLIENT_ID_KEY, "client-1");
    let mut h = Harness::build(test_config(), settings, Some(alice()));

    let mut peer = h.connect().await;
    match next_command(&mut peer).await.command {
        Command::Connect {
            client_id,
            versions,
            presence,
        } => {
            assert_eq!(client_id.as_deref(), Some("client-1"));
            assert_eq!(versions.get("inbox"), Some(&41));
            assert_eq!(presence, Some(alice()));
        }
        other => panic!("expected connect, got {:?}", other),
    }

    peer.send(connect_ack("client-1"));
    let backfill = next_command(&mut peer).await;
    assert_eq!(
        backfill.command,
        Command::Backfill {
            key: "inbox".into(),
            ranges: vec![SequenceRange {
                start: 41,
                end: None,
            }],
        }
    );
    h.wait_for(is_connected).await;
    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SignalEvent::NewClientId { .. })));

    push(&peer, signal_envelope("inbox", 42));
    let event = h.wait_for(is_signal).await;
    assert_eq!(signal_ids(&event), vec!["inbox-42"]);
    let event = h
        .wait_for(|e| matches!(e, SignalEvent::VersionChanged { .. }))
        .await;
    assert_eq!(
        event,
        SignalEvent::VersionChanged {
            key: "inbox".into(),
            version: 42,
        }
    );
    assert_eq!(h.settings.version("inbox"), Some(42));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_handshake_raises_exception() {
    let mut h = Harness::new(test_config());
    let mut peer = h.connect().await;
    next_command(&mut peer).await;

    push(
        &peer,
        Envelope::new(Command::ConnectAck {
            success: false,
            client_id: None,
            message: Some("unknown client".into()),
        }),
    );

    let event = h
        .wait_for(|e| matches!(e, SignalEvent::Exception { .. }))
        .await;
    assert_eq!(
        event,
        SignalEvent::Exception {
            message: "Protocol error: handshake rejected: unknown client".into()
        }
    );
    assert_eq!(h.provider.state(), ConnectionState::Connected);
    assert_eq!(h.provider.client_id(), None);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_join_one_attempt() {
    let h = Harness::new(test_config());

    let (a, b) = tokio::join!(h.provider.connect(), h.provider.connect());
    assert!(a.unwrap().same(&b.unwrap()));
    assert_eq!(h.connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_authenticated_fails() {
    let mut h = Harness::new(test_config());
    let _peer = h.authenticate("client-1").await;

    assert_eq!(
        h.provider.connect().await.unwrap_err(),
        SignalError::AlreadyConnected
    );
    assert!(h.provider.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_handlers_receive_events() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut h = Harness::new(test_config());
    h.provider
        .add_handler(Arc::new(CallbackHandler::new(move |event| {
            sink.lock().push(event);
        })));

    let _peer = h.authenticate("client-1").await;
    settle().await;

    assert!(seen.lock().iter().any(is_connected));
}

// ============================================================
// Ordered dispatch
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_out_of_order_commands_dispatch_in_order() {
    let mut h = Harness::new(test_config());
    let peer = h.authenticate("client-1").await;

    push(&peer, signal_envelope("inbox", 1));
    push(&peer, signal_envelope("inbox", 3));
    push(&peer, signal_envelope("inbox", 2));

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.extend(signal_ids(&h.wait_for(is_signal).await));
    }
    assert_eq!(ids, vec!["inbox-1", "inbox-2", "inbox-3"]);
    assert_eq!(h.settings.version("inbox"), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_version_changes_follow_release_order() {
    let mut h = Harness::new(test_config());
    let peer = h.authenticate("client-1").await;

    push(&peer, signal_envelope("inbox", 1));
    push(&peer, signal_envelope("inbox", 3));
    push(&peer, signal_envelope("inbox", 2));

    let mut versions = Vec::new();
    for _ in 0..3 {
        if let SignalEvent::VersionChanged { version, .. } = h
            .wait_for(|e| matches!(e, SignalEvent::VersionChanged { .. }))
            .await
        {
            versions.push(version);
        }
    }
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_command_not_redispatched() {
    let mut h = Harness::new(test_config());
    let mut peer = h.authenticate("client-1").await;

    push(&peer, signal_envelope("inbox", 1));
    h.wait_for(is_signal).await;

    push(&peer, signal_envelope("inbox", 1));
    push(&peer, Envelope::new(Command::ping("barrier", 0)));
    let pong = next_command_named(&mut peer, "ping").await;
    assert!(matches!(pong.command, Command::Ping { request: false, .. }));
    settle().await;

    assert!(!h.drain_events().iter().any(is_signal));
}

#[tokio::test(start_paused = true)]
async fn test_sequenced_command_without_channel_uses_default_window() {
    let mut h = Harness::new(test_config());
    let peer = h.authenticate("client-1").await;

    let mut envelope = signal_envelope("ignored", 7);
    envelope.channel = None;
    push(&peer, envelope);

    let event = h
        .wait_for(|e| matches!(e, SignalEvent::VersionChanged { .. }))
        .await;
    assert_eq!(
        event,
        SignalEvent::VersionChanged {
            key: "default".into(),
            version: 7,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_hole_timeout_requests_backfill() {
    let mut h = Harness::new(test_config());
    let mut peer = h.authenticate("client-1").await;

    push(&peer, signal_envelope("inbox", 1));
    push(&peer, signal_envelope("inbox", 3));

    let backfill = next_command_named(&mut peer, "backfill").await;
    assert_eq!(
        backfill.command,
        Command::Backfill {
            key: "inbox".into(),
            ranges: vec![SequenceRange {
                start: 1,
                end: Some(2),
            }],
        }
    );

    push(&peer, signal_envelope("inbox", 2));
    let mut ids = Vec::new();
    while ids.len() < 3 {
        ids.extend(signal_ids(&h.wait_for(is_signal).await));
    }
    assert_eq!(ids, vec!["inbox-1", "inbox-2", "inbox-3"]);
}

#[tokio::test(start_paused = true)]
async fn test_hole_backfill_waits_for_handshake_after_reconnect() {
    let mut config = test_config();
    config.reconnect = ReconnectPolicy::Fixed { delay_ms: 1_000 };
    let mut h = Harness::new(config);
    let mut peer = h.authenticate("client-1").await;

    push(&peer, signal_envelope("inbox", 1));
    push(&peer, signal_envelope("inbox", 3));
    h.wait_for(is_signal).await;
    settle().await;
    peer.fail("connection reset");
    h.wait_for(is_disconnected).await;

    let mut second = next_peer(&h.connector).await;
    assert_eq!(next_command(&mut second).await.command.name(), "connect");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(second.try_recv(), None);
    assert_eq!(h.provider.state(), ConnectionState::Connected);

    second.send(connect_ack("client-1"));
    let resume = next_command(&mut second).await;
    assert_eq!(
        resume.command,
        Command::Backfill {
            key: "inbox".into(),
            ranges: vec![SequenceRange {
                start: 1,
                end: None,
            }],
        }
    );
    let hole = next_command(&mut second).await;
    assert_eq!(
        hole.command,
        Command::Backfill {
            key: "inbox".into(),
            ranges: vec![SequenceRange {
                start: 1,
                end: Some(2),
            }],
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_frame_raises_exception() {
    let mut h = Harness::new(test_config());
    let peer = h.authenticate("client-1").await;

    peer.send("{not json");

    assert!(matches!(
        h.wait_for(|e| matches!(e, SignalEvent::Exception { .. })).await,
        SignalEvent::Exception { .. }
    ));
    assert!(h.provider.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_client_command_from_server_raises_protocol_exception() {
    let mut h = Harness::new(test_config());
    let peer = h.authenticate("client-1").await;

    push(
        &peer,
        Envelope::new(Command::Backfill {
            key: "inbox".into(),
            ranges: vec![],
        }),
    );

    assert_eq!(
        h.wait_for(|e| matches!(e, SignalEvent::Exception { .. })).await,
        SignalEvent::Exception {
            message: "Protocol error: unexpected command: backfill".into()
        }
    );
    assert!(h.provider.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_command_received_for_every_release() {
    let mut h = Harness::new(test_config());
    let peer = h.authenticate("client-1").await;
    match h
        .wait_for(|e| matches!(e, SignalEvent::CommandReceived { .. }))
        .await
    {
        SignalEvent::CommandReceived { envelope } => {
            assert_eq!(envelope.command.name(), "connect_ack");
        }
        other => panic!("expected command, got {:?}", other),
    }

    push(&peer, signal_envelope("inbox", 1));
    push(&peer, signal_envelope("inbox", 2));

    for sequence in 1..=2 {
        match h
            .wait_for(|e| matches!(e, SignalEvent::CommandReceived { .. }))
            .await
        {
            SignalEvent::CommandReceived { envelope } => {
                assert_eq!(envelope, signal_envelope("inbox", sequence));
            }
            other => panic!("expected command, got {:?}", other),
        }
    }
}

// ============================================================
// Presence
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_presence_reannounced_only_when_missing() {
    let mut h = Harness::build(test_config(), MemorySettingsStore::new(), Some(alice()));
    let mut peer = h.authenticate("client-1").await;

    push(
        &peer,
        Envelope::new(Command::Presence {
            presences: vec![alice()],
        }),
    );
    push(&peer, Envelope::new(Command::ping("barrier", 0)));
    let next = next_command(&mut peer).await;
    assert!(matches!(next.command, Command::Ping { request: false, .. }));

    let bob = Presence::new("bob", PresenceCategory::Mobile);
    push(
        &peer,
        Envelope::new(Command::Presence {
            presences: vec![bob],
        }),
    );
    let announced = next_command(&mut peer).await;
    assert_eq!(
        announced.command,
        Command::Presence {
            presences: vec![alice()]
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_set_presence_announces_when_authenticated() {
    let mut h = Harness::new(test_config());
    let mut peer = h.authenticate("client-1").await;

    let mut presence = alice();
    presence.capabilities = vec!["typing".into()];
    h.provider.set_presence(presence.clone());

    let announced = next_command(&mut peer).await;
    assert_eq!(
        announced.command,
        Command::Presence {
            presences: vec![presence.clone()]
        }
    );
    assert_eq!(h.provider.presence(), Some(presence));
}

// ============================================================
// Subscriptions
// ============================================================

#[derive(Default)]
struct RecordingBinder {
    binds: Mutex<Vec<BindRequest>>,
    unbinds: Mutex<Vec<BindRequest>>,
    refuse: bool,
}

impl SessionBinder for RecordingBinder {
    fn bind(&self, request: BindRequest) -> BoxFuture<'static, Result<(), SignalError>> {
        self.binds.lock().push(request);
        if self.refuse {
            future::ready(Err(SignalError::BindFailed("denied".into()))).boxed()
        } else {
            future::ready(Ok(())).boxed()
        }
    }

    fn unbind(&self, request: BindRequest) -> BoxFuture<'static, Result<(), SignalError>> {
        self.unbinds.lock().push(request);
        future::ready(Ok(())).boxed()
    }
}

fn subscription_complete(subscription_id: &str) -> Envelope {
    Envelope::new(Command::SubscriptionComplete {
        session_key: "session-1".into(),
        subscription_id: subscription_id.into(),
        addresses: vec!["alice".into()],
    })
}

#[tokio::test(start_paused = true)]
async fn test_bind_completes_on_server_confirmation() {
    let mut h = Harness::build(test_config(), MemorySettingsStore::new(), Some(alice()));
    let mut peer = h.authenticate("client-1").await;

    let bind = h
        .provider
        .bind("session-1", "sub-1", vec!["inbox".into()]);
    assert!(!h.provider.subscription("sub-1").unwrap().bound);

    push(&peer, subscription_complete("sub-1"));
    let subscription = bind.await.unwrap();
    assert!(subscription.bound);
    assert_eq!(subscription.client_id, "client-1");
    assert_eq!(subscription.channels, vec!["inbox"]);
    assert!(h.provider.subscription("sub-1").unwrap().bound);

    let event = h
        .wait_for(|e| matches!(e, SignalEvent::SubscriptionComplete { .. }))
        .await;
    assert_eq!(
        event,
        SignalEvent::SubscriptionComplete {
            session_key: "session-1".into(),
            subscription_id: "sub-1".into(),
        }
    );
    let announced = next_command(&mut peer).await;
    assert!(matches!(announced.command, Command::Presence { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_bind_times_out_without_confirmation() {
    let mut h = Harness::new(test_config());
    let _peer = h.authenticate("client-1").await;

    let started = tokio::time::Instant::now();
    let result = h.provider.bind("session-1", "sub-1", vec![]).await;
    assert_eq!(result.unwrap_err(), SignalError::Timeout);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(h.provider.subscription("sub-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unbind_cancels_pending_bind() {
    let mut h = Harness::new(test_config());
    let _peer = h.authenticate("client-1").await;

    let bind = h.provider.bind("session-1", "sub-1", vec![]);
    h.provider.unbind("sub-1").await.unwrap();

    assert_eq!(bind.await.unwrap_err(), SignalError::Cancelled);
    assert!(h.provider.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unbind_unknown_subscription_is_ok() {
    let mut h = Harness::new(test_config());
    let _peer = h.authenticate("client-1").await;

    assert!(h.provider.unbind("missing").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_bind_requires_connection() {
    let h = Harness::new(test_config());

    assert_eq!(
        h.provider.bind("session-1", "sub-1", vec![]).await.unwrap_err(),
        SignalError::NotConnected
    );
    assert_eq!(
        h.provider.unbind("sub-1").await.unwrap_err(),
        SignalError::NotConnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_binder_performs_bind_and_unbind() {
    let binder = Arc::new(RecordingBinder::default());
    let with_binder = binder.clone();
    let mut h = Harness::custom(test_config(), MemorySettingsStore::new(), move |builder| {
        builder.binder(with_binder)
    });
    let peer = h.authenticate("client-1").await;

    let bind = h.provider.bind("session-1", "sub-1", vec!["inbox".into()]);
    push(&peer, subscription_complete("sub-1"));
    bind.await.unwrap();

    h.provider.unbind("sub-1").await.unwrap();
    assert!(h.provider.subscription("sub-1").is_none());

    let expected = BindRequest {
        session_key: "session-1".into(),
        subscription_id: "sub-1".into(),
        client_id: "client-1".into(),
        channels: vec!["inbox".into()],
    };
    assert_eq!(*binder.binds.lock(), vec![expected.clone()]);
    assert_eq!(*binder.unbinds.lock(), vec![expected]);
}

#[tokio::test(start_paused = true)]
async fn test_refused_bind_drops_subscription() {
    let binder = Arc::new(RecordingBinder {
        refuse: true,
        ..Default::default()
    });
    let mut h = Harness::custom(test_config(), MemorySettingsStore::new(), move |builder| {
        builder.binder(binder)
    });
    let _peer = h.authenticate("client-1").await;

    let result = h.provider.bind("session-1", "sub-1", vec![]).await;
    assert_eq!(result.unwrap_err(), SignalError::BindFailed("denied".into()));
    assert!(h.provider.subscription("sub-1").is_none());
}

struct UnreachableBinder;

impl SessionBinder for UnreachableBinder {
    fn bind(&self, _request: BindRequest) -> BoxFuture<'static, Result<(), SignalError>> {
        future::ready(Err(SignalError::ConnectionFailed("503".into()))).boxed()
    }

    fn unbind(&self, _request: BindRequest) -> BoxFuture<'static, Result<(), SignalError>> {
        future::ready(Ok(())).boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_binder_error_surfaces_as_bind_failure() {
    let mut h = Harness::custom(test_config(), MemorySettingsStore::new(), |builder| {
        builder.binder(Arc::new(UnreachableBinder))
    });
    let _peer = h.authenticate("client-1").await;

    let err = h
        .provider
        .bind("session-1", "sub-1", vec![])
        .await
        .unwrap_err();
    assert_eq!(err, SignalError::BindFailed("Connection failed: 503".into()));
    assert_eq!(err.category(), ErrorCategory::Protocol);
    assert!(h.provider.subscription("sub-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reset_forgets_subscriptions() {
    let mut h = Harness::new(test_config());
    let _peer = h.authenticate("client-1").await;

    let bind = h.provider.bind("session-1", "sub-1", vec![]);
    h.provider.reset();

    assert!(h.provider.subscriptions().is_empty());
    assert_eq!(bind.await.unwrap_err(), SignalError::Cancelled);
}

// ============================================================
// Keepalive
// ============================================================

fn keepalive_config() -> signal_core::signal::SignalConfig {
    let mut config = test_config();
    config.ping_timeout_ms = 30_000;
    config.pong_timeout_ms = 10_000;
    config
}

#[tokio::test(start_paused = true)]
async fn test_ping_answered_by_pong_reschedules() {
    let mut h = Harness::new(keepalive_config());
    let mut peer = h.authenticate("client-1").await;

    let started = tokio::time::Instant::now();
    let ping = next_command_named(&mut peer, "ping").await;
    assert!(started.elapsed() >= Duration::from_secs(29));
    let Command::Ping { token, request, .. } = ping.command else {
        panic!("expected ping");
    };
    assert!(request);

    push(&peer, Envelope::new(Command::pong(token, 0)));
    h.wait_for(|e| matches!(e, SignalEvent::Ping(PingEvent::PongReceived)))
        .await;
    h.wait_for(|e| matches!(e, SignalEvent::Ping(PingEvent::Scheduled)))
        .await;

    let next = next_command_named(&mut peer, "ping").await;
    assert!(matches!(next.command, Command::Ping { request: true, .. }));
    assert!(h.provider.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_missing_pong_drops_connection() {
    let mut h = Harness::new(keepalive_config());
    let mut peer = h.authenticate("client-1").await;
    let handle = h.provider.handle().unwrap();

    next_command_named(&mut peer, "ping").await;
    h.wait_for(|e| matches!(e, SignalEvent::Ping(PingEvent::PongTimeout)))
        .await;
    h.wait_for(is_disconnected).await;

    assert_eq!(
        handle.disconnected().await,
        signal_core::network::DisconnectCause::Network
    );
    assert_eq!(h.provider.state(), ConnectionState::Disconnected);
    assert!(h.provider.handle().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_pong_is_ignored() {
    let mut h = Harness::new(keepalive_config());
    let mut peer = h.authenticate("client-1").await;

    next_command_named(&mut peer, "ping").await;
    push(&peer, Envelope::new(Command::pong("someone-else", 0)));

    h.wait_for(|e| matches!(e, SignalEvent::Ping(PingEvent::PongTimeout)))
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_server_ping_is_answered() {
    let mut h = Harness::new(test_config());
    let mut peer = h.authenticate("client-1").await;

    push(&peer, Envelope::new(Command::ping("server-token", 1)));

    match next_command(&mut peer).await.command {
        Command::Ping { token, request, .. } => {
            assert_eq!(token, "server-token");
            assert!(!request);
        }
        other => panic!("expected pong, got {:?}", other),
    }
}

// ============================================================
// Disconnects
// ============================================================

fn server_disconnect(ban: bool, stop: bool) -> Envelope {
    Envelope::new(Command::Disconnect {
        ban,
        stop,
        host: Some("other.test".into()),
        port: Some(8443),
        reconnect_delay_secs: Some(2),
    })
}

#[tokio::test(start_paused = true)]
async fn test_server_disconnect_redirects_reconnect() {
    let mut h = Harness::new(test_config());
    let peer = h.authenticate("client-1").await;

    push(&peer, server_disconnect(false, false));
    h.wait_for(is_disconnected).await;
    assert_eq!(h.provider.state(), ConnectionState::Disconnected);

    let started = tokio::time::Instant::now();
    let mut second = next_peer(&h.connector).await;
    assert!(started.elapsed() >= Duration::from_millis(1_900));
    assert_eq!(second.endpoint().host, "other.test");
    assert_eq!(second.endpoint().port, 8443);

    match next_command(&mut second).await.command {
        Command::Connect { client_id, .. } => {
            assert_eq!(client_id.as_deref(), Some("client-1"))
        }
        other => panic!("expected connect, got {:?}", other),
    }
    second.send(connect_ack("client-1"));
    h.wait_for(is_connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_server_ban_stops_reconnecting() {
    let mut config = test_config();
    config.reconnect = ReconnectPolicy::Fixed { delay_ms: 1_000 };
    let mut h = Harness::new(config);
    let peer = h.authenticate("client-1").await;
    assert!(h.provider.reconnect_strategy().is_running());

    push(&peer, server_disconnect(true, false));
    let event = h
        .wait_for(|e| matches!(e, SignalEvent::Exception { .. }))
        .await;
    assert_eq!(
        event,
        SignalEvent::Exception {
            message: "disconnected by server".into()
        }
    );
    h.wait_for(is_disconnected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempt_count(), 1);
    assert!(!h.provider.reconnect_strategy().is_running());
    assert_eq!(h.provider.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_server_stop_behaves_like_ban() {
    let mut h = Harness::new(test_config());
    let peer = h.authenticate("client-1").await;

    push(&peer, server_disconnect(false, true));
    h.wait_for(is_disconnected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_reconnects_with_same_client_id() {
    let mut config = test_config();
    config.reconnect = ReconnectPolicy::Fixed { delay_ms: 1_000 };
    let mut h = Harness::new(config);
    let mut peer = h.authenticate("client-1").await;

    peer.fail("connection reset");
    h.wait_for(is_disconnected).await;

    let mut second = next_peer(&h.connector).await;
    match next_command(&mut second).await.command {
        Command::Connect { client_id, .. } => {
            assert_eq!(client_id.as_deref(), Some("client-1"))
        }
        other => panic!("expected connect, got {:?}", other),
    }
    second.send(connect_ack("client-1"));
    h.wait_for(is_connected).await;
    assert!(h.provider.is_authenticated());
    assert_eq!(h.provider.reconnect_strategy().attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_tears_down_session() {
    let mut config = test_config();
    config.reconnect = ReconnectPolicy::Fixed { delay_ms: 1_000 };
    let mut h = Harness::new(config);
    let mut peer = h.authenticate("client-1").await;
    let handle = h.provider.handle().unwrap();

    h.provider.disconnect().await;

    assert!(handle.is_destroyed());
    assert!(handle.is_disconnected());
    assert_eq!(h.provider.state(), ConnectionState::Disconnected);
    assert!(!h.provider.reconnect_strategy().is_running());
    assert_eq!(peer.recv().await, None);

    settle().await;
    let events = h.drain_events();
    assert_eq!(events.iter().filter(|e| is_disconnected(e)).count(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempt_count(), 1);
    assert!(h.provider.handle().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_no_commands_after_disconnect() {
    let mut h = Harness::new(test_config());
    let peer = h.authenticate("client-1").await;
    h.wait_for(|e| matches!(e, SignalEvent::CommandReceived { .. }))
        .await;
    h.drain_events();

    h.provider.disconnect().await;
    peer.send(signal_envelope("inbox", 1).encode().unwrap());
    settle().await;

    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, SignalEvent::CommandReceived { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting() {
    let h = Harness::new(test_config());
    h.connector
        .set_fallback(signal_core::network::MockOutcome::Hang);

    let connecting = h.provider.connect();
    settle().await;
    assert_eq!(h.provider.state(), ConnectionState::Connecting);

    h.provider.disconnect().await;
    assert_eq!(connecting.await.unwrap_err(), SignalError::Cancelled);
    settle().await;
    assert_eq!(h.provider.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_connection() {
    let mut h = Harness::new(test_config());
    let presence = Envelope::new(Command::Presence {
        presences: vec![alice()],
    });

    assert_eq!(
        h.provider.send(presence.clone()).await,
        Err(SignalError::NotConnected)
    );

    let mut peer = h.authenticate("client-1").await;
    h.provider.send(presence.clone()).await.unwrap();
    assert_eq!(next_command(&mut peer).await, presence);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_provider_closes_connection() {
    let mut h = Harness::new(test_config());
    let mut peer = h.authenticate("client-1").await;
    let handle = h.provider.handle().unwrap();

    let Harness { provider, .. } = h;
    drop::<SignalProvider>(provider);

    assert_eq!(
        handle.disconnected().await,
        signal_core::network::DisconnectCause::Manual
    );
    assert_eq!(peer.recv().await, None);
}

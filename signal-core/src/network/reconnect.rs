// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reconnect Strategy
//!
//! Watches a socket transport and schedules reconnect attempts after
//! network-caused disconnects, with a fixed or exponential delay.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handle::{ConnectionHandle, DisconnectCause};
use super::socket::SocketTransport;
use super::transport::TransportEvent;

/// How long to wait before each reconnect attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Never reconnect automatically.
    None,
    /// Wait the same delay before every attempt.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// Wait `min(max_backoff_secs, multiplier^attempt)` seconds.
    Exponential {
        /// Growth factor per consecutive attempt.
        multiplier: f64,
        /// Upper bound on the delay, in seconds.
        max_backoff_secs: u64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Exponential {
            multiplier: 2.0,
            max_backoff_secs: 300,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the `attempt`-th consecutive attempt (1-based).
    ///
    /// Returns `None` when reconnection is disabled.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::None => None,
            ReconnectPolicy::Fixed { delay_ms } => Some(Duration::from_millis(*delay_ms)),
            ReconnectPolicy::Exponential {
                multiplier,
                max_backoff_secs,
            } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let secs = multiplier.powi(exponent).min(*max_backoff_secs as f64);
                let cap = Duration::from_secs(*max_backoff_secs);
                let delay = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(cap);
                Some(delay.min(cap))
            }
        }
    }

    /// Returns true unless the policy is [`ReconnectPolicy::None`].
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ReconnectPolicy::None)
    }
}

#[derive(Default)]
struct StrategyState {
    running: bool,
    attempts: u32,
    pending: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

/// A reconnect policy bound to one transport.
///
/// `start()` and `stop()` are idempotent. At most one attempt is pending at
/// a time; a disconnect reported while one is pending is dropped.
#[derive(Clone)]
pub struct ReconnectStrategy {
    policy: ReconnectPolicy,
    transport: SocketTransport,
    state: Arc<Mutex<StrategyState>>,
}

impl ReconnectStrategy {
    /// Binds `policy` to `transport`. Nothing happens until [`start`](Self::start).
    pub fn new(policy: ReconnectPolicy, transport: SocketTransport) -> Self {
        ReconnectStrategy {
            policy,
            transport,
            state: Arc::new(Mutex::new(StrategyState::default())),
        }
    }

    /// The bound policy.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Starts observing the transport. Does nothing for a disabled policy.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.running {
            return;
        }
        if !self.policy.is_enabled() {
            debug!("Reconnect policy disabled, not starting");
            return;
        }
        state.running = true;
        let events = self.transport.subscribe();
        state.listener = Some(tokio::spawn(self.clone().listen(events)));
        info!(policy = ?self.policy, "Reconnect strategy started");
    }

    /// Stops observing and cancels any scheduled attempt.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        state.attempts = 0;
        if let Some(listener) = state.listener.take() {
            listener.abort();
        }
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        info!("Reconnect strategy stopped");
    }

    /// Cancels a scheduled attempt. Returns true if one was pending.
    pub fn cancel_pending(&self) -> bool {
        match self.state.lock().pending.take() {
            Some(pending) => {
                pending.abort();
                debug!("Scheduled reconnect cancelled");
                true
            }
            None => false,
        }
    }

    /// Consecutive attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Returns true while an attempt is scheduled and not yet started.
    pub fn has_pending(&self) -> bool {
        self.state
            .lock()
            .pending
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Returns true between `start()` and `stop()`.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Schedules one attempt using the policy delay.
    ///
    /// Returns false if the strategy is stopped or an attempt is already
    /// pending.
    pub fn schedule(&self) -> bool {
        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        if state.pending.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Reconnect already pending, dropping notification");
            return false;
        }
        let attempt = state.attempts.saturating_add(1);
        let Some(delay) = self.policy.delay_for(attempt) else {
            return false;
        };
        state.attempts = attempt;

        let transport = self.transport.clone();
        let shared: Weak<Mutex<StrategyState>> = Arc::downgrade(&self.state);
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let connecting = {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let mut state = shared.lock();
                state.pending = None;
                // stop() may have won the race with the timer.
                if !state.running {
                    debug!(attempt, "Strategy stopped, dropping reconnect attempt");
                    return;
                }
                info!(attempt, "Reconnecting");
                transport.connect()
            };
            match connecting.await {
                Ok(handle) => debug!(id = handle.id(), attempt, "Reconnect attempt connected"),
                Err(err) => warn!(attempt, error = %err, "Reconnect attempt failed"),
            }
        }));
        info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        true
    }

    async fn listen(self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected(handle) => self.on_connected(&handle),
                TransportEvent::Disconnected { handle, cause } => {
                    self.on_disconnected(&handle, cause)
                }
                TransportEvent::Frame { .. } => {}
            }
        }
    }

    fn on_connected(&self, handle: &ConnectionHandle) {
        let mut state = self.state.lock();
        if state.attempts > 0 {
            info!(id = handle.id(), attempts = state.attempts, "Reconnected");
        }
        state.attempts = 0;
    }

    fn on_disconnected(&self, handle: &ConnectionHandle, cause: DisconnectCause) {
        if !cause.is_network() {
            debug!(id = handle.id(), "Manual disconnect, not reconnecting");
            return;
        }
        self.schedule();
    }
}

impl std::fmt::Debug for ReconnectStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReconnectStrategy")
            .field("policy", &self.policy)
            .field("running", &state.running)
            .field("attempts", &state.attempts)
            .finish()
    }
}

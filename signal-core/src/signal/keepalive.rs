//! Keepalive
//!
//! Ping/pong timers for one session. Timers post [`Control`] messages back
//! to the provider's dispatch task instead of acting themselves, and are
//! linked to the connection handle so they die with it. A generation
//! counter makes messages from replaced timers harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::events::PingEvent;
use super::provider::Control;
use crate::network::{ConnectionHandle, Destroyable, TaskGuard};

pub(crate) struct Keepalive {
    ping_timeout: Duration,
    pong_timeout: Duration,
    generation: u64,
    ping: Option<Arc<TaskGuard>>,
    pong: Option<(String, Arc<TaskGuard>)>,
}

impl Keepalive {
    pub(crate) fn new(ping_timeout: Duration, pong_timeout: Duration) -> Self {
        Keepalive {
            ping_timeout,
            pong_timeout,
            generation: 0,
            ping: None,
            pong: None,
        }
    }

    /// Schedules the next ping, replacing any earlier schedule.
    pub(crate) fn schedule(
        &mut self,
        handle: &ConnectionHandle,
        control: &mpsc::UnboundedSender<Control>,
    ) {
        if let Some(task) = self.ping.take() {
            task.destroy();
        }
        self.generation += 1;
        let generation = self.generation;
        let delay = self.ping_timeout;
        let control = control.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = control.send(Control::PingDue { generation });
        });
        let guard = TaskGuard::new(task.abort_handle());
        handle.link(guard.clone());
        self.ping = Some(guard);
    }

    /// Accepts a due ping. False for a replaced schedule or while a pong
    /// is outstanding.
    pub(crate) fn ping_due(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.pong.is_some() {
            return false;
        }
        self.ping = None;
        true
    }

    /// Starts the pong watch for a ping sent with `token`.
    pub(crate) fn watch_pong(
        &mut self,
        token: String,
        handle: &ConnectionHandle,
        control: &mpsc::UnboundedSender<Control>,
    ) {
        let generation = self.generation;
        let delay = self.pong_timeout;
        let control = control.clone();
        let expected = token.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = control.send(Control::PongTimeout {
                generation,
                token: expected,
            });
        });
        let guard = TaskGuard::new(task.abort_handle());
        handle.link(guard.clone());
        self.pong = Some((token, guard));
    }

    /// Matches a pong against the outstanding ping.
    pub(crate) fn pong_received(&mut self, token: &str) -> bool {
        if !self.pong.as_ref().is_some_and(|(expected, _)| expected == token) {
            return false;
        }
        if let Some((_, guard)) = self.pong.take() {
            guard.destroy();
        }
        true
    }

    /// Confirms a pong watch expiry.
    pub(crate) fn pong_timed_out(&mut self, generation: u64, token: &str) -> bool {
        if generation != self.generation
            || !self.pong.as_ref().is_some_and(|(expected, _)| expected == token)
        {
            return false;
        }
        self.pong = None;
        true
    }

    /// Cancels both timers and reports what was cancelled.
    pub(crate) fn stop(&mut self) -> Vec<PingEvent> {
        self.generation += 1;
        let mut events = Vec::new();
        if let Some(task) = self.ping.take() {
            if !task.is_destroyed() {
                events.push(PingEvent::Cancelled);
            }
            task.destroy();
        }
        if let Some((_, task)) = self.pong.take() {
            if !task.is_destroyed() {
                events.push(PingEvent::PongCancelled);
            }
            task.destroy();
        }
        events
    }
}

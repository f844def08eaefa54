// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Handle
//!
//! A capability scoped to one generation of a physical connection. Any task
//! may hold a handle and ask to write or disconnect through it; once the
//! connection it names is gone the handle stays inert and never reattaches
//! to a newer one.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;

use super::error::SignalError;
use super::transport::{ConnectionState, TransportResult};
use crate::state::StateManager;

/// Why a connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Requested by the application or by a server instruction.
    Manual,
    /// Socket failure, peer close, or keepalive timeout.
    Network,
}

impl DisconnectCause {
    /// Returns true if the network caused the disconnect.
    pub fn is_network(&self) -> bool {
        matches!(self, DisconnectCause::Network)
    }
}

/// Something torn down together with the connection it is linked to.
pub trait Destroyable: Send + Sync {
    /// Tears the object down. Must be idempotent.
    fn destroy(&self);

    /// Returns true once torn down.
    fn is_destroyed(&self) -> bool;
}

/// Aborts a background task when destroyed.
pub struct TaskGuard {
    abort: AbortHandle,
    destroyed: AtomicBool,
}

impl TaskGuard {
    /// Wraps the abort handle of a spawned task.
    pub fn new(abort: AbortHandle) -> Arc<Self> {
        Arc::new(TaskGuard {
            abort,
            destroyed: AtomicBool::new(false),
        })
    }
}

impl Destroyable for TaskGuard {
    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.abort.abort();
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst) || self.abort.is_finished()
    }
}

/// A frame queued for the I/O task, with its write acknowledgment.
pub(crate) struct Outbound {
    pub(crate) text: String,
    pub(crate) ack: oneshot::Sender<TransportResult<()>>,
}

struct HandleInner {
    id: u64,
    state: StateManager<ConnectionState>,
    destroyed: AtomicBool,
    /// Event delivery gate. Publication happens while holding this lock, so
    /// once it reads `false` no further event for the handle is published.
    attached: Mutex<bool>,
    cause: Mutex<Option<DisconnectCause>>,
    shutdown: watch::Sender<bool>,
    closed: watch::Sender<Option<DisconnectCause>>,
    writer: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    dependents: Mutex<Vec<Arc<dyn Destroyable>>>,
}

/// One generation of a physical connection.
///
/// Cloning is cheap; clones refer to the same generation.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: u64) -> Self {
        let state = ConnectionState::state_manager();
        state.set(ConnectionState::Connecting);

        ConnectionHandle {
            inner: Arc::new(HandleInner {
                id,
                state,
                destroyed: AtomicBool::new(false),
                attached: Mutex::new(true),
                cause: Mutex::new(None),
                shutdown: watch::Sender::new(false),
                closed: watch::Sender::new(None),
                writer: Mutex::new(None),
                dependents: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Monotonically increasing generation id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current state of this generation.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Returns true while writes are accepted.
    pub fn is_connected(&self) -> bool {
        self.inner.state.is(ConnectionState::Connected)
    }

    /// Returns true once the handle has been torn down.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Returns true once the socket is closed and the disconnect future has
    /// resolved.
    pub fn is_disconnected(&self) -> bool {
        self.inner.closed.borrow().is_some()
    }

    /// The cause recorded by the first disconnect request, if any.
    pub fn cause(&self) -> Option<DisconnectCause> {
        *self.inner.cause.lock()
    }

    /// Waits until the connection is fully closed.
    ///
    /// Resolves exactly once per generation; later callers get the same
    /// cause immediately.
    pub async fn disconnected(&self) -> DisconnectCause {
        let mut closed = self.inner.closed.subscribe();
        let cause = match closed.wait_for(Option::is_some).await {
            Ok(cause) => *cause,
            Err(_) => self.cause(),
        };
        cause.unwrap_or(DisconnectCause::Network)
    }

    /// Links a dependent torn down with this handle.
    ///
    /// Linking to an already destroyed handle destroys the dependent at once.
    pub fn link(&self, dependent: Arc<dyn Destroyable>) {
        if self.is_destroyed() {
            dependent.destroy();
            return;
        }
        let mut dependents = self.inner.dependents.lock();
        dependents.retain(|d| !d.is_destroyed());
        dependents.push(dependent);
    }

    /// Number of live dependents.
    pub fn dependent_count(&self) -> usize {
        self.inner
            .dependents
            .lock()
            .iter()
            .filter(|d| !d.is_destroyed())
            .count()
    }

    /// Returns true if both refer to the same generation.
    pub fn same(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Records the disconnect cause. Only the first call wins.
    pub(crate) fn request_disconnect(&self, cause: DisconnectCause) -> bool {
        let mut recorded = self.inner.cause.lock();
        if recorded.is_some() {
            return false;
        }
        *recorded = Some(cause);
        true
    }

    /// Detaches event delivery, drops the writer, signals the I/O task and
    /// tears down dependents.
    pub(crate) fn detach(&self) {
        {
            let mut attached = self.inner.attached.lock();
            *attached = false;
            self.inner.destroyed.store(true, Ordering::SeqCst);
        }
        self.inner.writer.lock().take();
        if self.inner.state.is(ConnectionState::Connected) {
            self.inner.state.transition(ConnectionState::Disconnecting);
        }
        self.inner.shutdown.send_replace(true);

        let dependents = std::mem::take(&mut *self.inner.dependents.lock());
        for dependent in dependents {
            dependent.destroy();
        }
    }

    /// Runs `publish` only while the handle is attached.
    pub(crate) fn deliver(&self, publish: impl FnOnce()) -> bool {
        let attached = self.inner.attached.lock();
        if *attached {
            publish();
            true
        } else {
            false
        }
    }

    pub(crate) fn attach_writer(&self, writer: mpsc::UnboundedSender<Outbound>) {
        *self.inner.writer.lock() = Some(writer);
    }

    pub(crate) fn transition(&self, to: ConnectionState) -> bool {
        self.inner.state.transition(to)
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Queues a frame for the I/O task.
    ///
    /// Fails fast unless the handle is connected.
    pub(crate) fn enqueue(
        &self,
        text: String,
    ) -> TransportResult<oneshot::Receiver<TransportResult<()>>> {
        if !self.is_connected() {
            return Err(SignalError::NotConnected);
        }
        let writer = self.inner.writer.lock();
        let writer = writer.as_ref().ok_or(SignalError::NotConnected)?;
        let (ack, rx) = oneshot::channel();
        writer
            .send(Outbound { text, ack })
            .map_err(|_| SignalError::ConnectionClosed)?;
        Ok(rx)
    }

    /// Marks the socket closed and resolves the disconnect future.
    pub(crate) fn finish(&self) {
        if !self.inner.state.is(ConnectionState::Disconnected) {
            self.inner.state.transition(ConnectionState::Disconnected);
        }
        let cause = self.cause().unwrap_or(DisconnectCause::Network);
        self.inner.closed.send_if_modified(|closed| {
            if closed.is_none() {
                *closed = Some(cause);
                true
            } else {
                false
            }
        });
    }
}

impl Destroyable for ConnectionHandle {
    fn destroy(&self) {
        if self.request_disconnect(DisconnectCause::Manual) {
            self.detach();
        }
    }

    fn is_destroyed(&self) -> bool {
        ConnectionHandle::is_destroyed(self)
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

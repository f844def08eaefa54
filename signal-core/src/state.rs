// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! State Manager
//!
//! Thread-safe finite-state-machine guard over an enum plus an explicit
//! transition table. Every read and write of the guarded state goes through
//! one internal lock.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, warn};

/// Errors raised by checked state operations.
///
/// These are programming errors: a caller asked for a move the table does
/// not allow, or a precondition on the current state did not hold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The requested transition is not in the table.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    /// The current state is not the one required.
    #[error("expected state {expected}, found {actual}")]
    UnexpectedState { expected: String, actual: String },
}

struct Inner<S> {
    current: S,
    edges: HashSet<(S, S)>,
}

/// Guarded state holder with an explicit table of legal edges.
///
/// # Example
///
/// ```ignore
/// use signal_core::state::StateManager;
///
/// let states = StateManager::new(Light::Off);
/// states.add(Light::Off, Light::On);
/// assert!(states.transition(Light::On));
/// assert!(!states.transition(Light::Blinking));
/// ```
pub struct StateManager<S> {
    inner: Mutex<Inner<S>>,
}

impl<S> StateManager<S>
where
    S: Copy + Eq + Hash + Debug,
{
    /// Creates a manager in `initial` with an empty transition table.
    pub fn new(initial: S) -> Self {
        StateManager {
            inner: Mutex::new(Inner {
                current: initial,
                edges: HashSet::new(),
            }),
        }
    }

    /// Registers one legal edge.
    pub fn add(&self, from: S, to: S) {
        self.inner.lock().edges.insert((from, to));
    }

    /// Forcibly sets the state, bypassing the table.
    ///
    /// Only meant for construction; runtime code uses [`transition`](Self::transition).
    pub fn set(&self, state: S) {
        self.inner.lock().current = state;
    }

    /// Returns the current state.
    pub fn get(&self) -> S {
        self.inner.lock().current
    }

    /// Returns true if the current state equals `state`.
    pub fn is(&self, state: S) -> bool {
        self.inner.lock().current == state
    }

    /// Returns true if the current state is any of `states`.
    pub fn is_any(&self, states: &[S]) -> bool {
        let current = self.inner.lock().current;
        states.contains(&current)
    }

    /// Returns true if a move to `to` would be accepted right now.
    pub fn can_transition(&self, to: S) -> bool {
        let inner = self.inner.lock();
        inner.edges.contains(&(inner.current, to))
    }

    /// Attempts a guarded move. Returns whether it happened.
    ///
    /// A rejected move leaves the state unchanged.
    pub fn transition(&self, to: S) -> bool {
        let mut inner = self.inner.lock();
        if inner.edges.contains(&(inner.current, to)) {
            inner.current = to;
            true
        } else {
            warn!(from = ?inner.current, to = ?to, "Rejected state transition");
            false
        }
    }

    /// Moves only if the current state is `from`. Returns whether it happened.
    pub fn transition_from(&self, from: S, to: S) -> bool {
        let mut inner = self.inner.lock();
        if inner.current == from && inner.edges.contains(&(from, to)) {
            inner.current = to;
            true
        } else {
            false
        }
    }

    /// Guarded move that fails loudly.
    ///
    /// Returns the previous state on success.
    pub fn try_transition(&self, to: S) -> Result<S, StateError> {
        let mut inner = self.inner.lock();
        let from = inner.current;
        if inner.edges.contains(&(from, to)) {
            inner.current = to;
            Ok(from)
        } else {
            error!(from = ?from, to = ?to, "Illegal state transition");
            Err(StateError::IllegalTransition {
                from: format!("{:?}", from),
                to: format!("{:?}", to),
            })
        }
    }

    /// Asserts the current state is `state`.
    pub fn ensure(&self, state: S) -> Result<(), StateError> {
        let current = self.get();
        if current == state {
            Ok(())
        } else {
            Err(StateError::UnexpectedState {
                expected: format!("{:?}", state),
                actual: format!("{:?}", current),
            })
        }
    }

    /// Asserts the current state is none of `states`.
    pub fn ensure_not(&self, states: &[S]) -> Result<(), StateError> {
        let current = self.get();
        if states.contains(&current) {
            Err(StateError::UnexpectedState {
                expected: format!("not one of {:?}", states),
                actual: format!("{:?}", current),
            })
        } else {
            Ok(())
        }
    }
}

impl<S: Debug> Debug for StateManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StateManager")
            .field("current", &inner.current)
            .field("edges", &inner.edges.len())
            .finish()
    }
}

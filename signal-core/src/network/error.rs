// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network Errors
//!
//! Error type shared by the transport, the reconnect strategy and the
//! signal provider.

use thiserror::Error;

use crate::state::StateError;

/// Errors produced by the signal client.
///
/// The type is `Clone` because connect and disconnect outcomes are shared
/// between every caller waiting on the same attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    /// The physical connect failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The socket closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A connect, bind or write did not finish in time.
    #[error("Connection timeout")]
    Timeout,

    /// The operation needs a connected transport.
    #[error("Transport not connected")]
    NotConnected,

    /// `connect()` was called while a connection is active.
    #[error("Transport already connected")]
    AlreadyConnected,

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Writing a frame failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Reading a frame failed.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame could not be decoded or encoded.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The server answered something the protocol does not allow.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Binding a session to this client failed.
    #[error("Bind failed: {0}")]
    BindFailed(String),

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Illegal state transition or failed state precondition.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Broad classes of failure and how each is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Socket failures; surfaced as a network disconnect and retried by the
    /// reconnect strategy.
    Transport,
    /// Malformed or unexpected commands; surfaced as an exception event.
    Protocol,
    /// Misuse of the API; never retried.
    Programming,
    /// A bounded wait ran out; fails only the operation that waited.
    Timeout,
}

impl SignalError {
    /// Classifies this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SignalError::ConnectionFailed(_)
            | SignalError::ConnectionClosed
            | SignalError::SendFailed(_)
            | SignalError::ReceiveFailed(_)
            | SignalError::Cancelled => ErrorCategory::Transport,
            SignalError::InvalidMessage(_)
            | SignalError::Protocol(_)
            | SignalError::BindFailed(_) => ErrorCategory::Protocol,
            SignalError::NotConnected
            | SignalError::AlreadyConnected
            | SignalError::Config(_)
            | SignalError::State(_) => ErrorCategory::Programming,
            SignalError::Timeout => ErrorCategory::Timeout,
        }
    }

    /// Returns true for errors that signal a bug in the caller.
    pub fn is_programming_error(&self) -> bool {
        self.category() == ErrorCategory::Programming
    }
}

impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        SignalError::InvalidMessage(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SignalError::ConnectionClosed,
            WsError::Utf8 => SignalError::InvalidMessage("invalid UTF-8 in text frame".into()),
            WsError::Io(err) => SignalError::ReceiveFailed(err.to_string()),
            other => SignalError::ConnectionFailed(other.to_string()),
        }
    }
}

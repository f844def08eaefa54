// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signal Commands
//!
//! Wire protocol between the client and the signal server. Every frame is
//! one JSON [`Envelope`]: an optional channel and sequence number around a
//! `type`-tagged [`Command`].
//!
//! ```text
//! {"channel":"inbox","sequence":42,"type":"signal","signals":[...]}
//! {"type":"ping","token":"...","timestamp":1700000000000,"request":true}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::network::SignalError;

/// Window key used for sequenced commands that name no channel.
pub const DEFAULT_CHANNEL: &str = "default";

/// Kind of device a presence describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceCategory {
    /// Desktop application.
    Desktop,
    /// Phone or tablet.
    Mobile,
    /// Browser session.
    Web,
    /// Automated client.
    Bot,
}

/// Describes who is connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Address of the connected user or device.
    pub address: String,
    /// Device category.
    pub category: PresenceCategory,
    /// Client user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Features this client supports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl Presence {
    /// Creates a presence without user agent or capabilities.
    pub fn new(address: impl Into<String>, category: PresenceCategory) -> Self {
        Presence {
            address: address.into(),
            category,
            user_agent: None,
            capabilities: Vec::new(),
        }
    }

    /// Returns true if both describe the same client.
    pub fn matches(&self, other: &Presence) -> bool {
        self.address == other.address && self.category == other.category
    }
}

/// A range of sequences to backfill: `start` exclusive, `end` inclusive.
///
/// An open `end` asks for everything after `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRange {
    /// Last sequence already seen.
    pub start: i64,
    /// Last sequence wanted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// One application-level signal pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal id.
    pub id: String,
    /// Scope the signal applies to, such as a conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Protocol commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Client handshake.
    Connect {
        /// Client id to resume, if any.
        client_id: Option<String>,
        /// Last known version per channel.
        #[serde(default)]
        versions: BTreeMap<String, i64>,
        /// Presence to announce.
        #[serde(default)]
        presence: Option<Presence>,
    },

    /// Server answer to [`Command::Connect`].
    ConnectAck {
        /// Whether the handshake was accepted.
        success: bool,
        /// Client id assigned by the server.
        #[serde(default)]
        client_id: Option<String>,
        /// Reason for a rejected handshake.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Request to resend missed sequences of one channel.
    Backfill {
        /// Channel to backfill. Distinct from the envelope's own `channel`.
        key: String,
        /// Missing ranges.
        ranges: Vec<SequenceRange>,
    },

    /// Presences the server knows about (server to client), or this
    /// client's own presence (client to server).
    Presence {
        /// Announced presences.
        presences: Vec<Presence>,
    },

    /// A session finished binding to this client.
    SubscriptionComplete {
        /// Session key of the bound session.
        session_key: String,
        /// Subscription id.
        subscription_id: String,
        /// Addresses covered by the subscription.
        #[serde(default)]
        addresses: Vec<String>,
    },

    /// Server-initiated disconnect.
    Disconnect {
        /// The client must not reconnect.
        #[serde(default)]
        ban: bool,
        /// The client should stop reconnecting.
        #[serde(default)]
        stop: bool,
        /// Host to reconnect to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        /// Port to reconnect to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        /// Delay before reconnecting.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reconnect_delay_secs: Option<u64>,
    },

    /// Keepalive. `request = false` marks a pong.
    Ping {
        /// Echoed by the answer.
        token: String,
        /// Sender clock in milliseconds.
        timestamp: u64,
        /// True for a ping, false for a pong.
        request: bool,
    },

    /// Application signals.
    Signal {
        /// Signals in delivery order.
        signals: Vec<Signal>,
    },
}

impl Command {
    /// Builds a ping request.
    pub fn ping(token: impl Into<String>, timestamp: u64) -> Self {
        Command::Ping {
            token: token.into(),
            timestamp,
            request: true,
        }
    }

    /// Builds a pong answering `token`.
    pub fn pong(token: impl Into<String>, timestamp: u64) -> Self {
        Command::Ping {
            token: token.into(),
            timestamp,
            request: false,
        }
    }

    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "connect",
            Command::ConnectAck { .. } => "connect_ack",
            Command::Backfill { .. } => "backfill",
            Command::Presence { .. } => "presence",
            Command::SubscriptionComplete { .. } => "subscription_complete",
            Command::Disconnect { .. } => "disconnect",
            Command::Ping { .. } => "ping",
            Command::Signal { .. } => "signal",
        }
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Channel of a sequenced command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Server-assigned sequence within the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    /// The command.
    #[serde(flatten)]
    pub command: Command,
}

impl Envelope {
    /// Wraps an unsequenced command.
    pub fn new(command: Command) -> Self {
        Envelope {
            channel: None,
            sequence: None,
            command,
        }
    }

    /// Wraps a command sequenced within `channel`.
    pub fn sequenced(channel: impl Into<String>, sequence: i64, command: Command) -> Self {
        Envelope {
            channel: Some(channel.into()),
            sequence: Some(sequence),
            command,
        }
    }

    /// Window key and sequence, if the command is sequenced.
    pub fn sequence_key(&self) -> Option<(&str, i64)> {
        let sequence = self.sequence?;
        let channel = self.channel.as_deref().unwrap_or(DEFAULT_CHANNEL);
        Some((channel, sequence))
    }

    /// Serializes to a text frame.
    pub fn encode(&self) -> Result<String, SignalError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a text frame.
    pub fn decode(text: &str) -> Result<Self, SignalError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl From<Command> for Envelope {
    fn from(command: Command) -> Self {
        Envelope::new(command)
    }
}

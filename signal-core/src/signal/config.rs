// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signal Configuration
//!
//! Every tunable of the signal client in one serde struct, loadable from
//! JSON or from `SIGNAL_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::network::{ReconnectPolicy, SignalError, TransportConfig};
use crate::window::WindowConfig;

/// Upper bound for the exponential reconnect backoff, one day.
pub const MAX_BACKOFF_LIMIT_SECS: u64 = 86_400;

/// Signal client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Signal server host.
    pub host: String,
    /// Ports in failover order.
    pub ports: Vec<u16>,
    /// WebSocket path.
    pub path: String,
    /// Use TLS.
    pub tls: bool,
    /// Per-port connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle time before a keepalive ping, in milliseconds.
    pub ping_timeout_ms: u64,
    /// Time allowed for a pong, in milliseconds.
    pub pong_timeout_ms: u64,
    /// Time allowed for a session bind, in milliseconds.
    pub bind_timeout_ms: u64,
    /// Reconnect delay after a server disconnect that names none, in seconds.
    pub server_reconnect_delay_secs: u64,
    /// Reconnect policy after network failures.
    pub reconnect: ReconnectPolicy,
    /// Sliding window settings, shared by every channel.
    pub window: WindowConfig,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            host: String::new(),
            ports: vec![443],
            path: "/".to_string(),
            tls: true,
            connect_timeout_ms: 10_000,
            ping_timeout_ms: 30_000,
            pong_timeout_ms: 10_000,
            bind_timeout_ms: 10_000,
            server_reconnect_delay_secs: 5,
            reconnect: ReconnectPolicy::default(),
            window: WindowConfig::default(),
        }
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T, SignalError> {
    raw.trim()
        .parse()
        .map_err(|_| SignalError::Config(format!("{} has invalid value {:?}", name, raw)))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, SignalError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SignalError::Config(format!(
            "{} has invalid value {:?}",
            name, raw
        ))),
    }
}

fn parse_ports(name: &str, raw: &str) -> Result<Vec<u16>, SignalError> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| parse(name, part))
        .collect()
}

impl SignalConfig {
    /// Creates the default configuration for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        SignalConfig {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Loads configuration from `SIGNAL_*` environment variables.
    ///
    /// Unset variables keep their defaults. The result is validated.
    pub fn from_env() -> Result<Self, SignalError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, using the same variable names
    /// as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SignalError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SignalConfig::default();

        if let Some(host) = lookup("SIGNAL_HOST") {
            config.host = host;
        }
        if let Some(raw) = lookup("SIGNAL_PORTS") {
            config.ports = parse_ports("SIGNAL_PORTS", &raw)?;
        }
        if let Some(path) = lookup("SIGNAL_PATH") {
            config.path = path;
        }
        if let Some(raw) = lookup("SIGNAL_TLS") {
            config.tls = parse_bool("SIGNAL_TLS", &raw)?;
        }

        let durations = [
            ("SIGNAL_CONNECT_TIMEOUT_MS", &mut config.connect_timeout_ms),
            ("SIGNAL_PING_TIMEOUT_MS", &mut config.ping_timeout_ms),
            ("SIGNAL_PONG_TIMEOUT_MS", &mut config.pong_timeout_ms),
            ("SIGNAL_BIND_TIMEOUT_MS", &mut config.bind_timeout_ms),
            ("SIGNAL_RECONNECT_DELAY_SECS", &mut config.server_reconnect_delay_secs),
            ("SIGNAL_WINDOW_TIMEOUT_MS", &mut config.window.timeout_ms),
        ];
        for (name, field) in durations {
            if let Some(raw) = lookup(name) {
                *field = parse(name, &raw)?;
            }
        }

        if let Some(raw) = lookup("SIGNAL_WINDOW_SIZE") {
            config.window.size = parse("SIGNAL_WINDOW_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("SIGNAL_WINDOW_MAX_PENDING") {
            config.window.max_pending = parse("SIGNAL_WINDOW_MAX_PENDING", &raw)?;
        }
        if let Some(raw) = lookup("SIGNAL_WINDOW_STEP") {
            config.window.step = parse("SIGNAL_WINDOW_STEP", &raw)?;
        }
        if let Some(raw) = lookup("SIGNAL_WINDOW_RELEASE_ON_TIMEOUT") {
            config.window.release_on_timeout =
                parse_bool("SIGNAL_WINDOW_RELEASE_ON_TIMEOUT", &raw)?;
        }

        config.reconnect = Self::policy_from_lookup(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn policy_from_lookup<F>(lookup: &F) -> Result<ReconnectPolicy, SignalError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = lookup("SIGNAL_RECONNECT_POLICY").unwrap_or_else(|| "exponential".into());
        match kind.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(ReconnectPolicy::None),
            "fixed" => {
                let delay_ms = match lookup("SIGNAL_RECONNECT_FIXED_DELAY_MS") {
                    Some(raw) => parse("SIGNAL_RECONNECT_FIXED_DELAY_MS", &raw)?,
                    None => 5_000,
                };
                Ok(ReconnectPolicy::Fixed { delay_ms })
            }
            "exponential" => {
                let (default_multiplier, default_max) = match ReconnectPolicy::default() {
                    ReconnectPolicy::Exponential {
                        multiplier,
                        max_backoff_secs,
                    } => (multiplier, max_backoff_secs),
                    _ => (2.0, 300),
                };
                let multiplier = match lookup("SIGNAL_RECONNECT_MULTIPLIER") {
                    Some(raw) => parse("SIGNAL_RECONNECT_MULTIPLIER", &raw)?,
                    None => default_multiplier,
                };
                let max_backoff_secs = match lookup("SIGNAL_RECONNECT_MAX_BACKOFF_SECS") {
                    Some(raw) => parse("SIGNAL_RECONNECT_MAX_BACKOFF_SECS", &raw)?,
                    None => default_max,
                };
                Ok(ReconnectPolicy::Exponential {
                    multiplier,
                    max_backoff_secs,
                })
            }
            other => Err(SignalError::Config(format!(
                "SIGNAL_RECONNECT_POLICY has invalid value {:?}",
                other
            ))),
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, SignalError> {
        let config: SignalConfig = serde_json::from_str(json)
            .map_err(|e| SignalError::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the client cannot run with.
    pub fn validate(&self) -> Result<(), SignalError> {
        if self.host.trim().is_empty() {
            return Err(SignalError::Config("host is empty".into()));
        }
        if self.ports.is_empty() {
            return Err(SignalError::Config("no ports configured".into()));
        }
        if self.ports.contains(&0) {
            return Err(SignalError::Config("port 0 is not allowed".into()));
        }
        if self.window.size == 0 {
            return Err(SignalError::Config("window size must be positive".into()));
        }
        if self.window.step <= 0 {
            return Err(SignalError::Config("window step must be positive".into()));
        }
        if self.window.max_pending == 0 {
            return Err(SignalError::Config("window max_pending must be positive".into()));
        }
        if self.connect_timeout_ms == 0 || self.ping_timeout_ms == 0 || self.pong_timeout_ms == 0
        {
            return Err(SignalError::Config("timeouts must be positive".into()));
        }
        if let ReconnectPolicy::Exponential {
            multiplier,
            max_backoff_secs,
        } = self.reconnect
        {
            if !(multiplier.is_finite() && multiplier > 0.0) {
                return Err(SignalError::Config(format!(
                    "reconnect multiplier must be positive, got {}",
                    multiplier
                )));
            }
            if max_backoff_secs > MAX_BACKOFF_LIMIT_SECS {
                return Err(SignalError::Config(format!(
                    "reconnect max_backoff_secs must be at most {}, got {}",
                    MAX_BACKOFF_LIMIT_SECS, max_backoff_secs
                )));
            }
        }
        for endpoint in self.transport_config().endpoints() {
            endpoint.url()?;
        }
        Ok(())
    }

    /// Settings for the socket transport.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            host: self.host.clone(),
            ports: self.ports.clone(),
            path: self.path.clone(),
            tls: self.tls,
            connect_timeout_ms: self.connect_timeout_ms,
        }
    }

    /// Idle time before a ping.
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Time allowed for a pong.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Time allowed for a bind.
    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }

    /// Fallback delay before reconnecting after a server disconnect.
    pub fn server_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.server_reconnect_delay_secs)
    }
}

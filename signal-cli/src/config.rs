//! CLI Configuration

use std::path::Path;

use anyhow::{bail, Context, Result};
use signal_core::{Presence, PresenceCategory, SignalConfig};

/// Overrides given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Server host.
    pub host: Option<String>,
    /// Ports in failover order.
    pub ports: Vec<u16>,
    /// WebSocket path.
    pub path: Option<String>,
    /// Dial `ws://` instead of `wss://`.
    pub insecure: bool,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Effective signal client configuration.
    pub signal: SignalConfig,
    /// Presence announced at handshake.
    pub presence: Option<Presence>,
    /// Channel versions to resume from.
    pub versions: Vec<(String, i64)>,
}

impl CliConfig {
    /// Builds the configuration from an optional JSON file, the `SIGNAL_*`
    /// environment and the command line, in increasing precedence.
    pub fn load(
        file: Option<&Path>,
        overrides: &Overrides,
        presence: Option<Presence>,
        versions: &[String],
    ) -> Result<Self> {
        let mut signal = match file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str::<SignalConfig>(&raw)
                    .with_context(|| format!("Invalid configuration in {}", path.display()))?
            }
            None => SignalConfig::from_lookup(|name| lookup(name, overrides))
                .context("Invalid SIGNAL_* environment")?,
        };

        if let Some(host) = &overrides.host {
            signal.host = host.clone();
        }
        if !overrides.ports.is_empty() {
            signal.ports = overrides.ports.clone();
        }
        if let Some(path) = &overrides.path {
            signal.path = path.clone();
        }
        if overrides.insecure {
            signal.tls = false;
        }
        signal.validate().context("Invalid configuration")?;

        Ok(CliConfig {
            signal,
            presence,
            versions: parse_versions(versions)?,
        })
    }
}

/// Environment lookup that lets command-line values stand in for the
/// variables validated by [`SignalConfig::from_lookup`].
fn lookup(name: &str, overrides: &Overrides) -> Option<String> {
    match name {
        "SIGNAL_HOST" if overrides.host.is_some() => overrides.host.clone(),
        "SIGNAL_PORTS" if !overrides.ports.is_empty() => Some(
            overrides
                .ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        "SIGNAL_TLS" if overrides.insecure => Some("false".into()),
        _ => std::env::var(name).ok(),
    }
}

/// Parses `channel=version` pairs.
pub fn parse_versions(raw: &[String]) -> Result<Vec<(String, i64)>> {
    raw.iter()
        .map(|pair| {
            let Some((channel, version)) = pair.split_once('=') else {
                bail!("Expected channel=version, got '{}'", pair);
            };
            if channel.is_empty() {
                bail!("Empty channel in '{}'", pair);
            }
            let version = version
                .trim()
                .parse::<i64>()
                .with_context(|| format!("Invalid version in '{}'", pair))?;
            Ok((channel.to_string(), version))
        })
        .collect()
}

/// Builds the presence announced at handshake, if an address is given.
pub fn presence(address: Option<String>, category: PresenceCategory) -> Option<Presence> {
    address.map(|address| {
        let mut presence = Presence::new(address, category);
        presence.user_agent = Some(format!("signal-cli/{}", env!("CARGO_PKG_VERSION")));
        presence
    })
}

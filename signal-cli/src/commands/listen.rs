//! Listen Command

use std::sync::Arc;

use anyhow::{Context, Result};
use signal_core::{MemorySettingsStore, SignalEvent, SignalProvider};
use tracing::debug;

use crate::config::CliConfig;
use crate::display;

/// Connects and prints events until Ctrl-C.
pub async fn run(config: &CliConfig, raw: bool) -> Result<()> {
    let settings = Arc::new(MemorySettingsStore::with_versions(config.versions.clone()));
    let mut builder = SignalProvider::builder(config.signal.clone()).settings(settings);
    if let Some(presence) = config.presence.clone() {
        builder = builder.presence(presence);
    }
    let provider = builder.build().context("Failed to start signal provider")?;
    let mut events = provider.subscribe();

    display::info(&format!(
        "Connecting to {} (ports {:?})",
        config.signal.host, config.signal.ports
    ));
    provider
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", config.signal.host))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if raw {
                    if let SignalEvent::CommandReceived { envelope } = &event {
                        println!("{}", envelope.encode()?);
                    }
                }
                display::event(&event);
            }
        }
    }

    provider.disconnect().await;
    display::info("Disconnected");
    Ok(())
}

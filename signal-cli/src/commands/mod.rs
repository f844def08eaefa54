//! CLI Commands

pub mod listen;

use anyhow::Result;

use crate::config::CliConfig;

/// Prints the effective signal configuration as JSON.
pub fn show_config(config: &CliConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.signal)?);
    Ok(())
}

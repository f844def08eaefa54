//! Signal CLI
//!
//! Command-line client for the signal session core: connects to a signal
//! server and prints what arrives.

mod commands;
mod config;
mod display;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use signal_core::PresenceCategory;
use tracing_subscriber::EnvFilter;

use config::{CliConfig, Overrides};

#[derive(Parser)]
#[command(name = "signal")]
#[command(version, about = "Real-time signal session client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Signal server host
    #[arg(long, global = true, env = "SIGNAL_HOST")]
    host: Option<String>,

    /// Ports to try, in order
    #[arg(long = "port", global = true, value_delimiter = ',')]
    ports: Vec<u16>,

    /// WebSocket path
    #[arg(long, global = true)]
    path: Option<String>,

    /// Connect without TLS
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Category {
    Desktop,
    Mobile,
    Web,
    Bot,
}

impl From<Category> for PresenceCategory {
    fn from(category: Category) -> Self {
        match category {
            Category::Desktop => PresenceCategory::Desktop,
            Category::Mobile => PresenceCategory::Mobile,
            Category::Web => PresenceCategory::Web,
            Category::Bot => PresenceCategory::Bot,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print events until interrupted
    Listen {
        /// Address to announce as presence
        #[arg(long)]
        address: Option<String>,

        /// Presence category
        #[arg(long, value_enum, default_value = "bot")]
        category: Category,

        /// Resume a channel from a version (channel=version)
        #[arg(long = "resume")]
        resume: Vec<String>,

        /// Print every released command as JSON
        #[arg(long)]
        raw: bool,
    },

    /// Print the effective configuration
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("signal_core=info".parse()?))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = Overrides {
        host: cli.host,
        ports: cli.ports,
        path: cli.path,
        insecure: cli.insecure,
    };

    match cli.command {
        Commands::Listen {
            address,
            category,
            resume,
            raw,
        } => {
            let presence = config::presence(address, category.into());
            let config = CliConfig::load(cli.config.as_deref(), &overrides, presence, &resume)?;
            commands::listen::run(&config, raw).await?;
        }
        Commands::Config => {
            let config = CliConfig::load(cli.config.as_deref(), &overrides, None, &[])?;
            commands::show_config(&config)?;
        }
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "signal", &mut io::stdout());
        }
    }

    Ok(())
}

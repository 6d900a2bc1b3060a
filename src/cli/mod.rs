pub mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hostbroker::BrokerConfig;

#[derive(Parser)]
#[command(name = "hostbroker")]
#[command(version)]
#[command(about = "Connect to hosts over pluggable protocols")]
#[command(long_about = "Connect to hosts over pluggable protocols.\n\nProtocols (local, docker, ssh) are discovered at startup and picked by name.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: ~/.config/hostbroker/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available protocols and the ones discovery skipped
    Protocols,

    /// Run a command on a host
    Exec {
        /// Named connection from the config file
        #[arg(short, long, conflicts_with = "protocol")]
        profile: Option<String>,

        /// Protocol to connect with
        #[arg(short = 'P', long, required_unless_present = "profile")]
        protocol: Option<String>,

        /// Connection option as key=value (repeatable)
        #[arg(short = 'o', long = "option", value_parser = commands::exec::parse_option)]
        options: Vec<(String, serde_json::Value)>,

        /// Command to execute
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        let config = self.load_config()?;

        match self.command {
            Commands::Protocols => commands::protocols::execute(&config),
            Commands::Exec {
                profile,
                protocol,
                options,
                command,
            } => commands::exec::execute(&config, profile, protocol, options, command).await,
        }
    }

    fn load_config(&self) -> anyhow::Result<BrokerConfig> {
        match &self.config {
            Some(path) => BrokerConfig::load_from(path)
                .with_context(|| format!("Failed to load {}", path.display())),
            None => Ok(BrokerConfig::load_or_default()?),
        }
    }
}

//! seqpilot CLI: the main entry point.
//!
//! Commands:
//! - `onboard`   Initialize config, plugin and audit directories
//! - `agent`     Interactive chat or single-message mode
//! - `tools`     Show the live tool catalog
//! - `providers` Show the provider chain and retry policy
//! - `memory`    Inspect or clear the tool-call audit log
//! - `config`    Validate configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "seqpilot",
    about = "seqpilot: LLM tool-calling orchestrator for genome browsing",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and directories
    Onboard,

    /// Chat with the assistant
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Connect to configured tool servers even if auto_connect is off
        #[arg(long)]
        connect: bool,
    },

    /// List every tool the assistant can call right now
    Tools {
        /// Connect to configured tool servers first
        #[arg(long)]
        connect: bool,
    },

    /// Show configured providers, fallback chain and retry policy
    Providers {
        /// Ping every provider in the active chain
        #[arg(long)]
        check: bool,
    },

    /// Tool-call audit log
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Show the most recent tool calls
    Recent {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Per-tool call counts, success rate and latency
    Stats,

    /// Delete every record
    Clear {
        /// Required to actually delete
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse and validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Agent { message, connect } => commands::agent::run(message, connect).await?,
        Commands::Tools { connect } => commands::tools::run(connect).await?,
        Commands::Providers { check } => commands::providers::run(check).await?,
        Commands::Memory { action } => match action {
            MemoryAction::Recent { limit } => commands::memory::recent(limit).await?,
            MemoryAction::Stats => commands::memory::stats().await?,
            MemoryAction::Clear { confirm } => commands::memory::clear(confirm).await?,
        },
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}

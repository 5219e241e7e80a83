//! # chatlink-cli
//!
//! Command-line interface for Chatlink.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chatlink_core::Config;
use chatlink_providers::SenderRegistry;

mod commands;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
    pub senders: SenderRegistry,
}

/// Chatlink - per-user chat sessions and message relay
#[derive(Parser)]
#[command(name = "chatlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Stored credential management
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    /// Send through the HTTP relay
    Relay {
        #[command(subcommand)]
        action: RelayAction,
    },
    /// Show version information
    Version,
    /// Diagnose installation issues
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Validate the effective configuration
    Validate,
}

#[derive(Subcommand)]
enum AuthAction {
    /// List users with stored credentials
    List,
    /// Delete a user's stored credentials
    Purge {
        /// User id
        user: String,
    },
}

#[derive(Subcommand)]
enum RelayAction {
    /// Send a message
    Send {
        /// User whose relay account is used
        #[arg(short, long)]
        user: String,
        /// Recipient phone number
        #[arg(short, long)]
        to: String,
        /// Message text
        #[arg(long)]
        text: String,
        /// Media URL, optionally followed by `|caption`
        #[arg(short, long, value_name = "URL[|CAPTION]")]
        media: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    let senders = SenderRegistry::from_config(&config);
    let ctx = Arc::new(AppContext { config, senders });

    match cli.command {
        Commands::Config { action } => {
            commands::config::handle(action, &ctx)?;
        }
        Commands::Auth { action } => {
            commands::auth::handle(action, &ctx).await?;
        }
        Commands::Relay { action } => {
            commands::relay::handle(action, &ctx).await?;
        }
        Commands::Version => {
            println!("chatlink {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Doctor => {
            commands::doctor::run(&ctx).await?;
        }
    }

    Ok(())
}

//! Diagnostic command to check installation.

use std::sync::Arc;

use chatlink_core::Config;
use chatlink_providers::RelayProvider;
use chatlink_session::{FileAuthStore, SessionConfig};

use crate::commands::config::print_validation;
use crate::AppContext;

pub async fn run(ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    // Check config directory
    let config_dir = Config::config_dir();
    println!("Config directory: {:?}", config_dir);
    if config_dir.exists() {
        println!("  ✓ Exists");
    } else {
        println!("  ✗ Does not exist (defaults are used)");
    }

    // Check credential directory
    let store = FileAuthStore::new(&ctx.config.session.auth_dir);
    println!("\nCredential directory: {:?}", store.root());
    if store.root().exists() {
        let users = store.list_users().await?;
        println!("  ✓ Exists ({} user(s))", users.len());
    } else {
        println!("  ✗ Does not exist (will be created on first pairing)");
    }

    // Session settings
    let session = SessionConfig::from_config(&ctx.config);
    println!("\nSessions:");
    println!("  Connection timeout: {:?}", session.connection_timeout);
    println!("  Pairing timeout: {:?}", session.pairing_timeout);
    println!("  Max pairing attempts: {}", session.max_pairing_attempts);
    println!(
        "  Reconnect delay: {:?} (max {:?})",
        session.reconnect_delay, session.max_reconnect_delay
    );
    println!("  Reaper interval: {:?}", session.reaper_interval);

    // Check relay accounts
    println!("\nRelay accounts:");
    let relay = RelayProvider::from_config(&ctx.config.relay)?;
    let accounts = relay.account_ids();
    if accounts.is_empty() {
        println!("  ✗ No relay accounts configured");
    } else {
        for user_id in accounts {
            match relay.credentials(user_id) {
                Ok(creds) => println!("  ✓ {} (instance {})", user_id, creds.instance_id),
                Err(e) => println!("  ✗ {}: {}", user_id, e),
            }
        }
    }

    match ctx.senders.default_sender() {
        Some(sender) => println!("\nDefault sender: {}", sender.id()),
        None => println!("\nDefault sender: ✗ none"),
    }

    println!("\nValidation:");
    print_validation(&ctx.config.validate());

    println!("\nDiagnostics complete.");
    Ok(())
}

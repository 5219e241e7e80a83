//! Stored credential commands.

use std::sync::Arc;

use chatlink_session::{AuthStore, FileAuthStore};

use crate::{AppContext, AuthAction};

pub async fn handle(action: AuthAction, ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    let store = FileAuthStore::new(&ctx.config.session.auth_dir);

    match action {
        AuthAction::List => {
            println!("Credential directory: {}\n", store.root().display());
            let users = store.list_users().await?;
            if users.is_empty() {
                println!("  No stored credentials.");
            } else {
                for (user_id, files) in users {
                    let marker = if files > 0 { "✓" } else { "✗" };
                    println!("  {} {} ({} files)", marker, user_id, files);
                }
            }
        }
        AuthAction::Purge { user } => {
            if !store.exists(&user).await? {
                println!("No stored credentials for '{}'", user);
                return Ok(());
            }
            store.purge(&user).await?;
            println!("Purged stored credentials for '{}'", user);
        }
    }
    Ok(())
}

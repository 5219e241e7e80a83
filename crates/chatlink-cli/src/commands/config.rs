//! Configuration management commands.

use std::sync::Arc;

use chatlink_core::config::ValidationResult;

use crate::{AppContext, ConfigAction};

pub fn handle(action: ConfigAction, ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", ctx.config.to_toml()?);
        }
        ConfigAction::Validate => {
            let result = ctx.config.validate();
            print_validation(&result);
            if !result.is_ok() {
                anyhow::bail!("configuration has {} error(s)", result.errors().len());
            }
        }
    }
    Ok(())
}

pub fn print_validation(result: &ValidationResult) {
    if result.issues.is_empty() {
        println!("  ✓ Configuration is valid");
        return;
    }
    for issue in result.errors() {
        println!("  ✗ {}: {}", issue.field, issue.message);
    }
    for issue in result.warnings() {
        println!("  ! {}: {}", issue.field, issue.message);
    }
}

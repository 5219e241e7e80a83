//! HTTP relay commands.

use std::sync::Arc;

use chatlink_core::{MediaItem, OutboundMessage};
use chatlink_providers::RelayProvider;

use crate::{AppContext, RelayAction};

pub async fn handle(action: RelayAction, ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    match action {
        RelayAction::Send {
            user,
            to,
            text,
            media,
        } => {
            let provider = RelayProvider::from_config(&ctx.config.relay)?;
            let message = media
                .iter()
                .map(|arg| parse_media(arg))
                .fold(OutboundMessage::new(to, text), OutboundMessage::with_media);

            let receipt = provider.send_message(&user, &message).await?;
            println!("✓ Sent message {}", receipt.message_id);
            if receipt.media_sent > 0 {
                println!("  {} media item(s) delivered", receipt.media_sent);
            }
        }
    }
    Ok(())
}

/// Parse `url` or `url|caption`.
fn parse_media(arg: &str) -> MediaItem {
    match arg.split_once('|') {
        Some((url, caption)) if !caption.trim().is_empty() => {
            MediaItem::new(url.trim()).with_caption(caption.trim())
        }
        Some((url, _)) => MediaItem::new(url.trim()),
        None => MediaItem::new(arg.trim()),
    }
}

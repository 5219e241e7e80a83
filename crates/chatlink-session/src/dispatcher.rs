//! Outbound message sequencing over a live session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use chatlink_core::config::DispatchSettings;
use chatlink_core::{Address, Lifecycle, MediaItem, MessageSender, OutboundMessage, SendReceipt};

use crate::error::SessionError;
use crate::registry::SessionRegistry;

/// Sends text and media through a user's connected session.
pub struct MessageDispatcher {
    registry: Arc<SessionRegistry>,
    media_pacing: Duration,
    address_domain: String,
}

impl MessageDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, settings: &DispatchSettings) -> Self {
        Self {
            registry,
            media_pacing: Duration::from_millis(settings.media_pacing_ms),
            address_domain: settings.address_domain.clone(),
        }
    }

    /// Override the pause before each media send.
    pub fn with_media_pacing(mut self, pacing: Duration) -> Self {
        self.media_pacing = pacing;
        self
    }

    /// Send the text, then each media item in order.
    ///
    /// Returns the message id of the text send. A failed media send stops
    /// the sequence; the text is not recalled.
    pub async fn send(
        &self,
        user_id: &str,
        recipient: &str,
        text: &str,
        media: &[MediaItem],
    ) -> Result<SendReceipt, SessionError> {
        if user_id.trim().is_empty() {
            return Err(SessionError::input("user id is required"));
        }
        if text.trim().is_empty() {
            return Err(SessionError::input("message text is required"));
        }

        let socket = match self.registry.socket(user_id) {
            Some((Lifecycle::Connected, Some(socket))) => socket,
            Some((lifecycle, _)) => {
                return Err(SessionError::NotConnected {
                    user_id: user_id.to_string(),
                    lifecycle,
                })
            }
            None => {
                return Err(SessionError::NotConnected {
                    user_id: user_id.to_string(),
                    lifecycle: Lifecycle::Uninitialized,
                })
            }
        };

        let address = Address::normalize(recipient, &self.address_domain)?;
        let message_id = socket.send_text(&address, text).await?;
        debug!(user_id = %user_id, to = %address, message_id = %message_id, "Text sent");

        let mut media_sent = 0;
        for (index, item) in media.iter().enumerate() {
            if item.url.trim().is_empty() {
                debug!(user_id = %user_id, index, "Skipping media item without URL");
                continue;
            }

            tokio::time::sleep(self.media_pacing).await;
            let caption = item.caption.as_deref().filter(|c| !c.is_empty());
            if let Err(e) = socket.send_media(&address, &item.url, caption).await {
                warn!(
                    user_id = %user_id,
                    message_id = %message_id,
                    index,
                    error = %e,
                    "Media send failed"
                );
                return Err(SessionError::MediaFailed {
                    message_id,
                    index,
                    message: e.to_string(),
                });
            }
            media_sent += 1;
        }

        info!(user_id = %user_id, message_id = %message_id, media_sent, "Message delivered");
        Ok(SendReceipt {
            message_id,
            media_sent,
        })
    }
}

#[async_trait]
impl MessageSender for MessageDispatcher {
    fn id(&self) -> &str {
        "session"
    }

    async fn send(
        &self,
        user_id: &str,
        message: &OutboundMessage,
    ) -> chatlink_core::Result<SendReceipt> {
        message.validate()?;
        let receipt = MessageDispatcher::send(
            self,
            user_id,
            &message.recipient,
            &message.text,
            &message.media,
        )
        .await?;
        Ok(receipt)
    }
}

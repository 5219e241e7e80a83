//! Outbound message primitives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A normalized chat address (`<digits>@<domain>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Normalize a recipient into the protocol's addressing form.
    ///
    /// Recipients already carrying `@<domain>` are kept as-is. Anything else
    /// is reduced to its digits, so `+56 9 1234-5678` becomes
    /// `56912345678@<domain>`.
    pub fn normalize(recipient: &str, domain: &str) -> Result<Self> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Err(Error::Input("recipient is required".to_string()));
        }

        let suffix = format!("@{}", domain);
        if recipient.ends_with(&suffix) {
            return Ok(Self(recipient.to_string()));
        }

        let digits: String = recipient.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(Error::Input(format!(
                "recipient '{}' contains no phone digits",
                recipient
            )));
        }

        Ok(Self(format!("{}{}", digits, suffix)))
    }

    /// The address as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A media attachment sent after the text body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Publicly fetchable media URL
    pub url: String,
    /// Optional caption shown with the media
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl MediaItem {
    /// Create a media item without a caption.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            caption: None,
        }
    }

    /// Attach a caption.
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// A text message with optional trailing media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Raw recipient as supplied by the caller
    pub recipient: String,
    /// Text body, sent first
    pub text: String,
    /// Media items, sent in order after the text
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

impl OutboundMessage {
    /// Create a text-only message.
    pub fn new(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            text: text.into(),
            media: Vec::new(),
        }
    }

    /// Append a media item.
    pub fn with_media(mut self, item: MediaItem) -> Self {
        self.media.push(item);
        self
    }

    /// Reject messages that can never be delivered.
    pub fn validate(&self) -> Result<()> {
        if self.recipient.trim().is_empty() {
            return Err(Error::Input("recipient is required".to_string()));
        }
        if self.text.is_empty() {
            return Err(Error::Input("message text is required".to_string()));
        }
        Ok(())
    }
}

/// Acknowledgement of a delivered text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider-assigned id of the text message
    pub message_id: String,
    /// Number of media items delivered after the text
    pub media_sent: usize,
}

/// Anything that can deliver an outbound message on behalf of a user.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sender identifier.
    fn id(&self) -> &str;

    /// Deliver the message. The text goes first, then each media item.
    async fn send(&self, user_id: &str, message: &OutboundMessage) -> Result<SendReceipt>;
}

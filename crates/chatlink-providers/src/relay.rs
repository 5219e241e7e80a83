//! HTTP relay provider.
//!
//! Delivers messages through a hosted relay REST API instead of a local
//! protocol session. Every part of a message (text, each media URL, each
//! caption) is a separate `POST {base}/{instance}/messages/chat` call.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use chatlink_core::config::{RelayAccount, RelayConfig};
use chatlink_core::{MessageSender, OutboundMessage, SendReceipt};

use crate::error::RelayError;

/// Default relay API base URL.
const RELAY_API_URL: &str = "https://api.ultramsg.com";

/// Resolved credentials of one relay account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCredentials {
    pub instance_id: String,
    pub token: String,
}

/// Retry and pacing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTiming {
    /// Attempts per send sequence
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub initial_retry_delay: Duration,
    /// Upper bound for the retry delay
    pub max_retry_delay: Duration,
    /// Pause before each media URL
    pub media_pacing: Duration,
    /// Pause before each caption
    pub caption_pacing: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl RelayTiming {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            initial_retry_delay: Duration::from_millis(config.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(config.max_retry_delay_ms),
            media_pacing: Duration::from_millis(config.media_pacing_ms),
            caption_pacing: Duration::from_millis(config.caption_pacing_ms),
            request_timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_retry_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_retry_delay)
            .min(self.max_retry_delay)
    }
}

impl Default for RelayTiming {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    token: &'a str,
    to: &'a str,
    body: &'a str,
}

/// Relay response body. Fields vary between success and failure.
#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ChatResponse {
    fn message_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn error(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Strip the leading `+` the relay does not accept.
pub fn format_phone(to: &str) -> &str {
    let to = to.trim();
    to.strip_prefix('+').unwrap_or(to)
}

/// Provider that sends through the hosted relay API.
pub struct RelayProvider {
    client: Client,
    base_url: String,
    accounts: HashMap<String, RelayAccount>,
    timing: RelayTiming,
}

impl RelayProvider {
    /// Create a provider from configuration.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let timing = RelayTiming::from_config(config);
        let client = Client::builder().timeout(timing.request_timeout).build()?;
        let base_url = if config.base_url.is_empty() {
            RELAY_API_URL.to_string()
        } else {
            config.base_url.trim_end_matches('/').to_string()
        };

        Ok(Self {
            client,
            base_url,
            accounts: config.accounts.clone(),
            timing,
        })
    }

    /// Override the retry and pacing settings.
    pub fn with_timing(mut self, timing: RelayTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Add or replace the account of a user.
    pub fn with_account(mut self, user_id: impl Into<String>, account: RelayAccount) -> Self {
        self.accounts.insert(user_id.into(), account);
        self
    }

    /// Retry and pacing settings.
    pub fn timing(&self) -> &RelayTiming {
        &self.timing
    }

    /// Users with a configured account.
    pub fn account_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.accounts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Endpoint for chat messages of an instance.
    pub fn chat_url(&self, instance_id: &str) -> String {
        format!("{}/{}/messages/chat", self.base_url, instance_id)
    }

    /// Resolve the credentials of a user's account.
    pub fn credentials(&self, user_id: &str) -> Result<RelayCredentials, RelayError> {
        let account = self
            .accounts
            .get(user_id)
            .ok_or_else(|| RelayError::MissingAccount(user_id.to_string()))?;

        let instance_id = account
            .instance_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RelayError::IncompleteCredentials {
                user_id: user_id.to_string(),
                missing: "instance_id",
            })?;
        let token = account
            .resolve_token()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RelayError::IncompleteCredentials {
                user_id: user_id.to_string(),
                missing: "token",
            })?;

        Ok(RelayCredentials { instance_id, token })
    }

    /// Send a message, retrying the whole sequence on failure.
    #[instrument(skip(self, message), fields(request_id = tracing::field::Empty))]
    pub async fn send_message(
        &self,
        user_id: &str,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, RelayError> {
        message
            .validate()
            .map_err(|e| RelayError::InvalidMessage(e.to_string()))?;

        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let credentials = self.credentials(user_id)?;
        let to = format_phone(&message.recipient);

        info!(
            to = %to,
            length = message.text.len(),
            media = message.media.len(),
            "Sending through relay"
        );

        let max_retries = self.timing.max_retries;
        let mut attempt = 1;
        loop {
            match self
                .send_sequence(&credentials, to, message, &request_id)
                .await
            {
                Ok(receipt) => {
                    info!(attempt, message_id = %receipt.message_id, "Relay send succeeded");
                    return Ok(receipt);
                }
                Err(e) if attempt < max_retries => {
                    let delay = self.timing.retry_delay(attempt);
                    warn!(
                        attempt,
                        max_retries,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Relay send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, max_retries, error = %e, "Relay send failed");
                    return Err(e);
                }
            }
        }
    }

    /// Text first, then each media URL and its caption.
    async fn send_sequence(
        &self,
        credentials: &RelayCredentials,
        to: &str,
        message: &OutboundMessage,
        request_id: &str,
    ) -> Result<SendReceipt, RelayError> {
        let message_id = self
            .post_chat(credentials, to, &message.text, request_id)
            .await?
            .unwrap_or_else(|| request_id.to_string());

        let mut media_sent = 0;
        for (index, item) in message.media.iter().enumerate() {
            if item.url.trim().is_empty() {
                continue;
            }

            tokio::time::sleep(self.timing.media_pacing).await;
            self.post_chat(
                credentials,
                to,
                &item.url,
                &format!("{}-img{}", request_id, index),
            )
            .await?;

            if let Some(caption) = item.caption.as_deref().filter(|c| !c.is_empty()) {
                tokio::time::sleep(self.timing.caption_pacing).await;
                self.post_chat(
                    credentials,
                    to,
                    caption,
                    &format!("{}-caption{}", request_id, index),
                )
                .await?;
            }
            media_sent += 1;
        }

        Ok(SendReceipt {
            message_id,
            media_sent,
        })
    }

    /// One relay call. Returns the relay's message id when it reports one.
    async fn post_chat(
        &self,
        credentials: &RelayCredentials,
        to: &str,
        body: &str,
        request_id: &str,
    ) -> Result<Option<String>, RelayError> {
        let url = self.chat_url(&credentials.instance_id);
        debug!(request_id = %request_id, url = %url, length = body.len(), "Relay request");

        let response = self
            .client
            .post(&url)
            .json(&ChatRequest {
                token: &credentials.token,
                to,
                body,
            })
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let parsed: ChatResponse = serde_json::from_str(&text).unwrap_or_default();
        if let Some(error) = parsed.error() {
            return Err(RelayError::Rejected(error));
        }

        debug!(request_id = %request_id, response = %text, "Relay response");
        Ok(parsed.message_id())
    }

    fn map_transport_error(&self, e: reqwest::Error) -> RelayError {
        if e.is_timeout() {
            RelayError::Timeout {
                elapsed_ms: self.timing.request_timeout.as_millis() as u64,
            }
        } else {
            RelayError::Http(e)
        }
    }
}

#[async_trait]
impl MessageSender for RelayProvider {
    fn id(&self) -> &str {
        "relay"
    }

    async fn send(
        &self,
        user_id: &str,
        message: &OutboundMessage,
    ) -> chatlink_core::Result<SendReceipt> {
        Ok(self.send_message(user_id, message).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> RelayProvider {
        let mut config = RelayConfig::default();
        config.base_url = "https://relay.example/".to_string();
        config.accounts.insert(
            "u1".to_string(),
            RelayAccount {
                instance_id: Some("instance42".to_string()),
                token: Some("secret".to_string()),
                token_env: None,
            },
        );
        config.accounts.insert(
            "no-token".to_string(),
            RelayAccount {
                instance_id: Some("instance7".to_string()),
                token: None,
                token_env: Some("CHATLINK_TEST_UNSET_RELAY_TOKEN".to_string()),
            },
        );
        RelayProvider::from_config(&config).unwrap()
    }

    #[test]
    fn test_retry_delay_backoff() {
        let timing = RelayTiming::default();
        assert_eq!(timing.retry_delay(1), Duration::from_millis(2_000));
        assert_eq!(timing.retry_delay(2), Duration::from_millis(4_000));
        assert_eq!(timing.retry_delay(3), Duration::from_millis(8_000));
        assert_eq!(timing.retry_delay(4), Duration::from_millis(10_000));
        assert_eq!(timing.retry_delay(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_timing_from_config() {
        let timing = RelayTiming::default();
        assert_eq!(timing.max_retries, 3);
        assert_eq!(timing.request_timeout, Duration::from_secs(30));
        assert_eq!(timing.media_pacing, Duration::from_millis(1_000));
        assert_eq!(timing.caption_pacing, Duration::from_millis(500));

        let mut config = RelayConfig::default();
        config.max_retries = 0;
        assert_eq!(RelayTiming::from_config(&config).max_retries, 1);
    }

    #[test]
    fn test_chat_url() {
        assert_eq!(
            provider().chat_url("instance42"),
            "https://relay.example/instance42/messages/chat"
        );
    }

    #[test]
    fn test_format_phone() {
        assert_eq!(format_phone("+56912345678"), "56912345678");
        assert_eq!(format_phone("56912345678"), "56912345678");
        assert_eq!(format_phone(" +1555 "), "1555");
    }

    #[test]
    fn test_credentials_resolution() {
        let provider = provider();
        assert_eq!(
            provider.credentials("u1").unwrap(),
            RelayCredentials {
                instance_id: "instance42".to_string(),
                token: "secret".to_string(),
            }
        );
        assert!(matches!(
            provider.credentials("ghost"),
            Err(RelayError::MissingAccount(_))
        ));
        assert!(matches!(
            provider.credentials("no-token"),
            Err(RelayError::IncompleteCredentials { missing: "token", .. })
        ));
        assert_eq!(provider.account_ids(), vec!["no-token", "u1"]);
    }

    #[test]
    fn test_response_parsing() {
        let ok: ChatResponse = serde_json::from_str(r#"{"sent":"true","message":"ok","id":981}"#).unwrap();
        assert_eq!(ok.message_id().as_deref(), Some("981"));
        assert!(ok.error().is_none());

        let rejected: ChatResponse =
            serde_json::from_str(r#"{"error":"Wrong token. Please provide token"}"#).unwrap();
        assert_eq!(
            rejected.error().as_deref(),
            Some("Wrong token. Please provide token")
        );

        let nested: ChatResponse =
            serde_json::from_str(r#"{"error":[{"to":"invalid number"}]}"#).unwrap();
        assert!(nested.error().unwrap().contains("invalid number"));
    }

    #[tokio::test]
    async fn test_invalid_message_not_sent() {
        let err = provider()
            .send_message("u1", &OutboundMessage::new("+56911112222", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidMessage(_)));
    }
}

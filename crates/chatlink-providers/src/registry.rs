//! Sender registry for choosing how a message leaves the process.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use chatlink_core::{Config, MessageSender};

use crate::relay::RelayProvider;

/// Registry of available message senders.
pub struct SenderRegistry {
    senders: HashMap<String, Arc<dyn MessageSender>>,
    default_sender: Option<String>,
}

impl SenderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
            default_sender: None,
        }
    }

    /// Register the senders the configuration enables.
    ///
    /// The relay is registered when at least one relay account exists.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();

        if !config.relay.accounts.is_empty() {
            match RelayProvider::from_config(&config.relay) {
                Ok(relay) => registry.register(Arc::new(relay)),
                Err(e) => warn!(error = %e, "Relay provider unavailable"),
            }
        }

        registry
    }

    /// Register a sender. The first one registered becomes the default.
    pub fn register(&mut self, sender: Arc<dyn MessageSender>) {
        let id = sender.id().to_string();
        if self.default_sender.is_none() {
            self.default_sender = Some(id.clone());
        }
        self.senders.insert(id, sender);
    }

    /// Get a sender by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn MessageSender>> {
        self.senders.get(id).cloned()
    }

    /// Get the default sender.
    pub fn default_sender(&self) -> Option<Arc<dyn MessageSender>> {
        self.default_sender.as_ref().and_then(|id| self.get(id))
    }

    /// Set the default sender.
    pub fn set_default(&mut self, id: &str) -> bool {
        if self.senders.contains_key(id) {
            self.default_sender = Some(id.to_string());
            true
        } else {
            false
        }
    }

    /// List registered sender ids.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.senders.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SenderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatlink_core::config::RelayAccount;
    use chatlink_core::{OutboundMessage, SendReceipt};

    struct EchoSender(&'static str);

    #[async_trait]
    impl MessageSender for EchoSender {
        fn id(&self) -> &str {
            self.0
        }

        async fn send(
            &self,
            _user_id: &str,
            message: &OutboundMessage,
        ) -> chatlink_core::Result<SendReceipt> {
            Ok(SendReceipt {
                message_id: message.text.clone(),
                media_sent: 0,
            })
        }
    }

    #[test]
    fn test_first_registered_is_default() {
        let mut registry = SenderRegistry::new();
        registry.register(Arc::new(EchoSender("session")));
        registry.register(Arc::new(EchoSender("relay")));

        assert_eq!(registry.default_sender().unwrap().id(), "session");
        assert!(registry.set_default("relay"));
        assert_eq!(registry.default_sender().unwrap().id(), "relay");
        assert!(!registry.set_default("fax"));
        assert_eq!(registry.list(), vec!["relay", "session"]);
    }

    #[test]
    fn test_from_config_registers_relay_with_accounts() {
        let mut config = Config::default();
        assert!(SenderRegistry::from_config(&config).list().is_empty());

        config.relay.accounts.insert(
            "u1".to_string(),
            RelayAccount {
                instance_id: Some("instance42".to_string()),
                token: Some("secret".to_string()),
                token_env: None,
            },
        );
        let registry = SenderRegistry::from_config(&config);
        assert_eq!(registry.list(), vec!["relay"]);
    }
}

//! Configuration system for Chatlink.

use std::collections::HashMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Main configuration struct for Chatlink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session lifecycle settings
    pub session: SessionSettings,
    /// Options handed to the protocol socket factory
    pub socket: SocketSettings,
    /// Idle reaper settings
    pub reaper: ReaperSettings,
    /// Outbound dispatch settings
    pub dispatch: DispatchSettings,
    /// HTTP relay provider settings
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Directory holding one credential directory per user
    pub auth_dir: PathBuf,
    /// How long a fresh socket may take to open or show a QR code
    pub connection_timeout_ms: u64,
    /// How long a QR code may stay unscanned before pairing is abandoned
    pub pairing_timeout_ms: u64,
    /// QR codes issued before pairing is abandoned
    pub max_pairing_attempts: u32,
    /// Base delay before reconnecting after a transient close
    pub reconnect_delay_ms: u64,
    /// Upper bound for the reconnect delay
    pub max_reconnect_delay_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auth_dir: Config::data_dir().join("auth"),
            connection_timeout_ms: 60_000,
            pairing_timeout_ms: 60_000,
            max_pairing_attempts: 5,
            reconnect_delay_ms: 5_000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    /// Client identification triple (name, version, platform)
    pub browser: [String; 3],
    /// Timeout for individual protocol queries
    pub default_query_timeout_ms: u64,
    /// Ask the service to generate link previews
    pub link_previews: bool,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            browser: [
                "Chrome (Linux)".to_string(),
                String::new(),
                String::new(),
            ],
            default_query_timeout_ms: 60_000,
            link_previews: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperSettings {
    /// Seconds between sweeps
    pub interval_secs: u64,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Pause before each media send
    pub media_pacing_ms: u64,
    /// Domain appended to phone numbers
    pub address_domain: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            media_pacing_ms: 1_000,
            address_domain: "s.whatsapp.net".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the relay REST API
    pub base_url: String,
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Attempts per send sequence
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub initial_retry_delay_ms: u64,
    /// Upper bound for the retry delay
    pub max_retry_delay_ms: u64,
    /// Pause before each media URL
    pub media_pacing_ms: u64,
    /// Pause before each caption
    pub caption_pacing_ms: u64,
    /// Relay accounts keyed by user id
    pub accounts: HashMap<String, RelayAccount>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.ultramsg.com".to_string(),
            timeout_ms: 30_000,
            max_retries: 3,
            initial_retry_delay_ms: 2_000,
            max_retry_delay_ms: 10_000,
            media_pacing_ms: 1_000,
            caption_pacing_ms: 500,
            accounts: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayAccount {
    /// Relay instance id
    pub instance_id: Option<String>,
    /// API token (can be set directly or via environment)
    pub token: Option<String>,
    /// Environment variable name for the token
    pub token_env: Option<String>,
}

impl RelayAccount {
    /// Resolve the token from either direct value or environment variable.
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(ref token) = self.token {
            return Some(token.clone());
        }
        if let Some(ref env_var) = self.token_env {
            if let Ok(token) = std::env::var(env_var) {
                return Some(token);
            }
        }
        None
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "session.pairing_timeout_ms")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_dir = Self::config_dir();

        Figment::new()
            .merge(figment::providers::Serialized::defaults(Config::default()))
            .merge(Toml::file(config_dir.join("config.toml")))
            .merge(Toml::file(".chatlink/config.toml"))
            .merge(Env::prefixed("CHATLINK_").split("__"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        let session = &self.session;

        if session.auth_dir.as_os_str().is_empty() {
            result.add_error("session.auth_dir", "auth_dir cannot be empty");
        }

        for (field, value) in [
            ("session.connection_timeout_ms", session.connection_timeout_ms),
            ("session.pairing_timeout_ms", session.pairing_timeout_ms),
            ("session.reconnect_delay_ms", session.reconnect_delay_ms),
            ("socket.default_query_timeout_ms", self.socket.default_query_timeout_ms),
            ("relay.timeout_ms", self.relay.timeout_ms),
        ] {
            if value == 0 {
                result.add_error(field, "must be greater than 0");
            }
        }

        if session.max_pairing_attempts == 0 {
            result.add_error("session.max_pairing_attempts", "max_pairing_attempts must be at least 1");
        }

        if session.reconnect_delay_ms > session.max_reconnect_delay_ms {
            result.add_error(
                "session.max_reconnect_delay_ms",
                "max_reconnect_delay_ms must not be lower than reconnect_delay_ms",
            );
        }

        if self.reaper.interval_secs == 0 {
            result.add_error("reaper.interval_secs", "interval_secs must be greater than 0");
        } else if self.reaper.interval_secs > 24 * 60 * 60 {
            result.add_warning(
                "reaper.interval_secs",
                "interval is longer than a day, orphaned sessions will linger",
            );
        }

        if self.dispatch.address_domain.is_empty() || self.dispatch.address_domain.contains('@') {
            result.add_error(
                "dispatch.address_domain",
                format!("Invalid address domain '{}'", self.dispatch.address_domain),
            );
        }

        if !self.relay.base_url.starts_with("http://") && !self.relay.base_url.starts_with("https://") {
            result.add_error("relay.base_url", "base_url must start with http:// or https://");
        }

        if self.relay.max_retries == 0 {
            result.add_error("relay.max_retries", "max_retries must be at least 1");
        }

        for (user_id, account) in &self.relay.accounts {
            if account.instance_id.as_deref().map(str::is_empty).unwrap_or(true) {
                result.add_warning(
                    format!("relay.accounts.{}.instance_id", user_id),
                    "instance_id is missing, relay sends for this user will fail",
                );
            }
            if account.token.as_ref().map(|t| t.is_empty()).unwrap_or(false) {
                result.add_warning(format!("relay.accounts.{}.token", user_id), "token is empty string");
            }
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("chatlink"))
            .unwrap_or_else(|| PathBuf::from("~/.config/chatlink"))
    }

    /// Get the data directory (for credential directories, etc.).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("chatlink"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/chatlink"))
    }

    /// Serialize the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok(), "Default config should be valid: {:?}", result.issues);
    }

    #[test]
    fn test_zero_pairing_attempts_is_error() {
        let mut config = Config::default();
        config.session.max_pairing_attempts = 0;
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "session.max_pairing_attempts"));
    }

    #[test]
    fn test_zero_timeout_is_error() {
        let mut config = Config::default();
        config.session.pairing_timeout_ms = 0;
        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "session.pairing_timeout_ms"));
    }

    #[test]
    fn test_reconnect_cap_below_base_is_error() {
        let mut config = Config::default();
        config.session.reconnect_delay_ms = 10_000;
        config.session.max_reconnect_delay_ms = 1_000;
        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "session.max_reconnect_delay_ms"));
    }

    #[test]
    fn test_invalid_relay_url() {
        let mut config = Config::default();
        config.relay.base_url = "api.example.com".to_string();
        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "relay.base_url"));
    }

    #[test]
    fn test_long_reaper_interval_is_warning() {
        let mut config = Config::default();
        config.reaper.interval_secs = 2 * 24 * 60 * 60;
        let result = config.validate();
        assert!(result.is_ok());
        assert!(result.warnings().iter().any(|w| w.field == "reaper.interval_secs"));
    }

    #[test]
    fn test_relay_account_without_instance_warns() {
        let mut config = Config::default();
        config.relay.accounts.insert("u1".to_string(), RelayAccount::default());
        let result = config.validate();
        assert!(result.is_ok());
        assert!(result.warnings().iter().any(|w| w.field == "relay.accounts.u1.instance_id"));
    }

    #[test]
    fn test_token_resolution_prefers_direct_value() {
        let account = RelayAccount {
            instance_id: Some("instance1".to_string()),
            token: Some("direct".to_string()),
            token_env: Some("CHATLINK_TEST_UNSET_TOKEN".to_string()),
        };
        assert_eq!(account.resolve_token().as_deref(), Some("direct"));
    }

    #[test]
    fn test_config_renders_as_toml() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[session]"));
        assert!(rendered.contains("max_pairing_attempts = 5"));
    }
}

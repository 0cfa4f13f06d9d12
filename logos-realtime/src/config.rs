//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::BackoffPolicy;

/// Which push transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// WebSocket text frames
    #[default]
    #[serde(alias = "ws")]
    WebSocket,
    /// HTTP Server-Sent Events
    #[serde(alias = "eventsource")]
    Sse,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Stream endpoint (`ws://`, `wss://`, `http://` or `https://`)
    pub url: String,
    /// Bearer credential sent when the connection is opened
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    /// Fail attempts up front when no credential is configured
    pub require_auth: bool,
    pub transport: TransportKind,
    /// First retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Retry delay ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Exclusive upper bound of the random jitter in milliseconds
    pub max_jitter_ms: u64,
    /// Consecutive failures before auto-retry stops (None = never stop)
    pub max_attempts: Option<u32>,
    /// Time allowed for an attempt to report open (None = no deadline)
    pub connect_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9090/events".to_string(),
            auth_token: None,
            require_auth: false,
            transport: TransportKind::WebSocket,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_jitter_ms: 1_000,
            max_attempts: Some(5),
            connect_timeout_ms: Some(10_000),
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Short delays for tests against a local server.
    pub fn for_testing(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_delay_ms: 20,
            max_delay_ms: 200,
            max_jitter_ms: 10,
            max_attempts: Some(5),
            connect_timeout_ms: Some(2_000),
            ..Self::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("url must not be empty".into()));
        }
        if self.base_delay_ms == 0 {
            return Err(ConfigError::Invalid("base_delay_ms must be positive".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("connect_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

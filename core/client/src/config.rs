//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use filerelay_cloud::{CallbackBase, Endpoints};
use filerelay_common::{Error, Result, Security};

/// Configuration for the cloud client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Application API key.
    pub api_key: String,
    /// Signed policy, when the account enforces security.
    pub security: Option<Security>,
    /// URL scheme the host app registered for authentication redirects.
    pub callback_scheme: String,
    /// Host part of redirect URLs.
    pub callback_host: String,
    /// Remote API base URLs.
    pub endpoints: Endpoints,
    /// How many times one request may demand authentication.
    pub max_auth_retries: u32,
    /// How long a parked request waits for its redirect. `None` waits forever.
    pub pending_timeout_secs: Option<u64>,
    /// Upper bound on simultaneously parked requests.
    pub max_pending: usize,
    /// Issue the warm-up request when the client is built.
    pub prefetch_on_start: bool,
    /// Buffered resume signals per listener.
    pub signal_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            security: None,
            callback_scheme: "filerelay".to_string(),
            callback_host: "cloud".to_string(),
            endpoints: Endpoints::default(),
            max_auth_retries: 3,
            pending_timeout_secs: Some(600),
            max_pending: 32,
            prefetch_on_start: true,
            signal_capacity: 16,
        }
    }
}

impl ClientConfig {
    /// Configuration with defaults and the given api key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn with_security(mut self, security: Security) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_callback(mut self, scheme: impl Into<String>, host: impl Into<String>) -> Self {
        self.callback_scheme = scheme.into();
        self.callback_host = host.into();
        self
    }

    pub fn with_max_auth_retries(mut self, retries: u32) -> Self {
        self.max_auth_retries = retries;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pending_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.prefetch_on_start = enabled;
        self
    }

    pub fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout_secs.map(Duration::from_secs)
    }

    /// Base from which per-request redirect URLs are derived.
    pub fn callback_base(&self) -> Result<CallbackBase> {
        CallbackBase::new(self.callback_scheme.clone(), self.callback_host.clone())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the configuration before building a client.
    ///
    /// # Errors
    /// - Empty api key
    /// - Malformed callback scheme or host
    /// - Zero retries, pending capacity or signal capacity
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("api_key is required".to_string()));
        }
        self.callback_base()?;
        if self.max_auth_retries == 0 {
            return Err(Error::Config("max_auth_retries must be at least 1".to_string()));
        }
        if self.max_pending == 0 {
            return Err(Error::Config("max_pending must be at least 1".to_string()));
        }
        if self.signal_capacity == 0 {
            return Err(Error::Config("signal_capacity must be at least 1".to_string()));
        }
        if self.pending_timeout_secs == Some(0) {
            return Err(Error::Config("pending_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_needs_api_key() {
        let config = ClientConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(ClientConfig::new("KEY").validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ClientConfig::from_json(
            r#"{ "api_key": "KEY", "callback_scheme": "myapp", "pending_timeout_secs": null }"#,
        )
        .unwrap();

        assert_eq!(config.callback_scheme, "myapp");
        assert_eq!(config.callback_host, "cloud");
        assert_eq!(config.max_auth_retries, 3);
        assert!(config.pending_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_scheme = ClientConfig::new("KEY").with_callback("my app", "cloud");
        assert!(bad_scheme.validate().is_err());

        let no_retries = ClientConfig::new("KEY").with_max_auth_retries(0);
        assert!(no_retries.validate().is_err());

        let no_pending = ClientConfig::new("KEY").with_max_pending(0);
        assert!(no_pending.validate().is_err());

        assert!(ClientConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = ClientConfig::new("KEY")
            .with_security(Security::new("pol", "sig").unwrap())
            .with_pending_timeout(Some(Duration::from_secs(30)));

        let json = serde_json::to_string(&config).unwrap();
        let deserialized = ClientConfig::from_json(&json).unwrap();

        assert_eq!(deserialized.api_key, "KEY");
        assert_eq!(deserialized.pending_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(deserialized.security, config.security);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filerelay.json");
        tokio::fs::write(&path, r#"{ "api_key": "FILEKEY" }"#).await.unwrap();

        let config = ClientConfig::load(&path).await.unwrap();
        assert_eq!(config.api_key, "FILEKEY");

        let missing = ClientConfig::load(dir.path().join("missing.json")).await;
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}

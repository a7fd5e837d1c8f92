//! Agent configuration
//!
//! Read once at startup; the agent never consults the environment
//! mid-request.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::privacy::DEFAULT_EPSILON;
use crate::types::SaltSource;

/// Service address used when `QUANTUM_SERVICE_URL` is unset
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:5001";

/// Salt used when `PRIVACY_SALT` is unset. Public, so pseudonyms made with
/// it are not protected against anyone who can guess identifiers.
pub const DEFAULT_PRIVACY_SALT: &str = "default_salt";

pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Outcome agent configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the external probabilistic-computation service
    pub service_url: String,

    /// Pseudonymization salt
    pub privacy_salt: String,

    /// Whether `privacy_salt` came from configuration
    pub salt_source: SaltSource,

    /// Deployment environment name
    pub environment: String,

    /// Largest batch accepted by `run_batch`
    pub max_batch_size: usize,

    /// Pause between consecutive local trials, in milliseconds
    pub trial_pacing_ms: u64,

    /// Differential-privacy parameter for aggregates
    pub epsilon: f64,

    /// Timeout for the availability probe, in milliseconds
    pub probe_timeout_ms: u64,

    /// Timeout for trial requests, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            privacy_salt: DEFAULT_PRIVACY_SALT.to_string(),
            salt_source: SaltSource::UsingDefault,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            max_batch_size: 100,
            trial_pacing_ms: 50,
            epsilon: DEFAULT_EPSILON,
            probe_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("service_url", &self.service_url)
            .field("privacy_salt", &"<redacted>")
            .field("salt_source", &self.salt_source)
            .field("environment", &self.environment)
            .field("max_batch_size", &self.max_batch_size)
            .field("trial_pacing_ms", &self.trial_pacing_ms)
            .field("epsilon", &self.epsilon)
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `QUANTUM_SERVICE_URL`, `PRIVACY_SALT` and `QFLIP_ENV`
    /// (falling back to `NODE_ENV`), substituting defaults for anything unset
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        match non_empty("QUANTUM_SERVICE_URL") {
            Some(url) => config.service_url = url.trim_end_matches('/').to_string(),
            None => tracing::warn!(
                "QUANTUM_SERVICE_URL not set, using default {}",
                DEFAULT_SERVICE_URL
            ),
        }

        match non_empty("PRIVACY_SALT") {
            Some(salt) => {
                config.privacy_salt = salt;
                config.salt_source = SaltSource::Configured;
            }
            None => tracing::warn!("PRIVACY_SALT not set, pseudonyms use the public default salt"),
        }

        if let Some(env) = non_empty("QFLIP_ENV").or_else(|| non_empty("NODE_ENV")) {
            config.environment = env;
        }

        config
    }

    pub fn with_service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_privacy_salt(mut self, salt: impl Into<String>) -> Self {
        self.privacy_salt = salt.into();
        self.salt_source = SaltSource::Configured;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    pub fn with_trial_pacing(mut self, pacing: Duration) -> Self {
        self.trial_pacing_ms = pacing.as_millis() as u64;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_timeouts(mut self, probe: Duration, request: Duration) -> Self {
        self.probe_timeout_ms = probe.as_millis() as u64;
        self.request_timeout_ms = request.as_millis() as u64;
        self
    }

    pub fn trial_pacing(&self) -> Duration {
        Duration::from_millis(self.trial_pacing_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AgentConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.service_url, DEFAULT_SERVICE_URL);
        assert_eq!(config.privacy_salt, DEFAULT_PRIVACY_SALT);
        assert_eq!(config.salt_source, SaltSource::UsingDefault);
        assert_eq!(config.environment, DEFAULT_ENVIRONMENT);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.trial_pacing(), Duration::from_millis(50));
    }

    #[test]
    fn test_values_from_environment() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("QUANTUM_SERVICE_URL", "https://quantum.example.com/"),
            ("PRIVACY_SALT", "pepper"),
            ("NODE_ENV", "production"),
        ]));
        assert_eq!(config.service_url, "https://quantum.example.com");
        assert_eq!(config.privacy_salt, "pepper");
        assert_eq!(config.salt_source, SaltSource::Configured);
        assert_eq!(config.environment, "production");
    }

    #[test]
    fn test_empty_salt_counts_as_unset() {
        let config = AgentConfig::from_lookup(lookup_from(&[("PRIVACY_SALT", "  ")]));
        assert_eq!(config.salt_source, SaltSource::UsingDefault);
    }

    #[test]
    fn test_qflip_env_takes_precedence() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("QFLIP_ENV", "staging"),
            ("NODE_ENV", "production"),
        ]));
        assert_eq!(config.environment, "staging");
    }

    #[test]
    fn test_config_builder() {
        let config = AgentConfig::new()
            .with_service_url("http://127.0.0.1:9000/")
            .with_privacy_salt("s")
            .with_max_batch_size(10)
            .with_trial_pacing(Duration::ZERO)
            .with_epsilon(0.5);

        assert_eq!(config.service_url, "http://127.0.0.1:9000");
        assert_eq!(config.salt_source, SaltSource::Configured);
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.trial_pacing_ms, 0);
        assert_eq!(config.epsilon, 0.5);
    }

    #[test]
    fn test_config_serialization() {
        let config = AgentConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.service_url, parsed.service_url);
        assert_eq!(config.salt_source, parsed.salt_source);
    }

    #[test]
    fn test_debug_redacts_salt() {
        let config = AgentConfig::new().with_privacy_salt("pepper-1234");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("pepper-1234"));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains(DEFAULT_SERVICE_URL));
    }
}

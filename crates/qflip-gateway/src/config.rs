//! Gateway configuration

use qflip_core::AgentConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::{GatewayError, Result, DEFAULT_HOST, DEFAULT_PORT};

/// Development frontends always allowed by CORS
const DEV_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:3000"];

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Origins allowed to make credentialed cross-origin requests
    pub allowed_origins: Vec<String>,

    /// Production frontend, if any
    pub frontend_url: Option<String>,

    /// Maximum trials per quantum-flip request
    pub max_trials_per_request: usize,

    /// Maximum records returned by the history endpoint
    pub history_limit: usize,

    /// Requests per user per minute
    pub rate_limit_per_minute: u32,

    /// Bearer tokens accepted by the static identity resolver
    pub api_tokens: Vec<ApiToken>,

    /// Outcome agent configuration
    pub agent: AgentConfig,
}

/// A bearer token bound to a user id
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub user_id: String,
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiToken")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            allowed_origins: DEV_ORIGINS.iter().map(|o| o.to_string()).collect(),
            frontend_url: None,
            max_trials_per_request: 100,
            history_limit: 100,
            rate_limit_per_minute: 60,
            api_tokens: Vec::new(),
            agent: AgentConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `HOST`, `PORT`, `FRONTEND_URL`, `QFLIP_API_TOKENS` and
    /// the agent's own variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self {
            agent: AgentConfig::from_lookup(&lookup),
            ..Self::default()
        };

        if let Some(host) = non_empty("HOST") {
            config.host = host;
        }
        if let Some(port) = non_empty("PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| GatewayError::InvalidConfig(format!("invalid PORT: {}", port)))?;
        }
        if let Some(url) = non_empty("FRONTEND_URL") {
            config = config.with_frontend_url(url);
        }
        if let Some(tokens) = non_empty("QFLIP_API_TOKENS") {
            config.api_tokens = parse_api_tokens(&tokens)?;
        }
        config.agent.max_batch_size = config.max_trials_per_request;

        Ok(config)
    }

    /// Set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the production frontend and allow it through CORS
    pub fn with_frontend_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        if !self.allowed_origins.contains(&url) {
            self.allowed_origins.push(url.clone());
        }
        self.frontend_url = Some(url);
        self
    }

    /// Set the per-request trial limit, for both the route and the agent
    pub fn with_max_trials(mut self, max: usize) -> Self {
        self.max_trials_per_request = max;
        self.agent.max_batch_size = max;
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    /// Accept `token` as a bearer credential for `user_id`
    pub fn with_api_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.api_tokens.push(ApiToken {
            token: token.into(),
            user_id: user_id.into(),
        });
        self
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.agent = agent;
        self.agent.max_batch_size = self.max_trials_per_request;
        self
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| GatewayError::InvalidConfig(format!("invalid socket address: {}", e)))
    }

    /// Load configuration from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.agent.max_batch_size = config.max_trials_per_request;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Parse `token:user,token2:user2`
fn parse_api_tokens(raw: &str) -> Result<Vec<ApiToken>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((token, user)) if !token.is_empty() && !user.is_empty() => Ok(ApiToken {
                token: token.to_string(),
                user_id: user.to_string(),
            }),
            _ => Err(GatewayError::InvalidConfig(
                "QFLIP_API_TOKENS entries must look like token:user".to_string(),
            )),
        })
        .collect()
}

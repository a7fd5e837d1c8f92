//! Request authentication and per-user rate limiting
//!
//! Token issuance (OAuth2 sign-in, JWT signing) happens elsewhere. The
//! gateway only resolves an already-issued bearer token to a user.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ApiToken;

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
        }
    }
}

impl std::fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Maps a bearer token to the user it was issued for
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `None` when the token is unknown, expired or malformed
    async fn resolve(&self, token: &str) -> Option<UserIdentity>;
}

/// Resolver backed by a fixed token table
pub struct StaticTokenResolver {
    tokens: HashMap<String, UserIdentity>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self {
            tokens: HashMap::new(),
        }
    }

    pub fn from_tokens(tokens: &[ApiToken]) -> Self {
        let mut resolver = Self::new();
        for entry in tokens {
            resolver.insert(entry.token.clone(), UserIdentity::new(entry.user_id.clone()));
        }
        resolver
    }

    pub fn insert(&mut self, token: impl Into<String>, identity: UserIdentity) {
        self.tokens.insert(token.into(), identity);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for StaticTokenResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Option<UserIdentity> {
        self.tokens.get(token).cloned()
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Rate limit entry
#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitEntry {
    fn new() -> Self {
        Self {
            count: 1,
            window_start: Instant::now(),
        }
    }

    fn increment(&mut self) -> u32 {
        self.count += 1;
        self.count
    }

    fn is_expired(&self, window: Duration) -> bool {
        self.window_start.elapsed() > window
    }
}

/// Fixed-window request limiter keyed by user id
pub struct RateLimiter {
    entries: Arc<RwLock<HashMap<String, RateLimitEntry>>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self::with_window(limit_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            limit,
            window,
        }
    }

    /// Count a request; `false` once the user is over the limit
    pub fn check(&self, user_id: &str) -> bool {
        let mut entries = self.entries.write();

        if let Some(entry) = entries.get_mut(user_id) {
            if entry.is_expired(self.window) {
                *entry = RateLimitEntry::new();
                self.limit > 0
            } else {
                entry.increment() <= self.limit
            }
        } else {
            entries.insert(user_id.to_string(), RateLimitEntry::new());
            self.limit > 0
        }
    }

    /// Requests counted in the current window, and the limit
    pub fn status(&self, user_id: &str) -> (u32, u32) {
        let entries = self.entries.read();
        let count = entries.get(user_id).map(|e| e.count).unwrap_or(0);
        (count, self.limit)
    }

    /// Drop entries whose window has passed
    pub fn cleanup(&self) {
        let mut entries = self.entries.write();
        entries.retain(|_, e| !e.is_expired(self.window));
    }
}

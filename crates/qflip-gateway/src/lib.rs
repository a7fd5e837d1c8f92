//! QFlip Gateway - HTTP surface for coin flips
//!
//! This crate exposes the QFlip outcome agent over HTTP: public and
//! authenticated coin flips, quantum batches with privacy-preserving
//! statistics, and per-user flip history.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  QFlip Gateway                   │
//! ├──────────────────────────────────────────────────┤
//! │   CORS ─► Trace ─► Router (/health, /api/Routes) │
//! │                        │                         │
//! │            ┌───────────▼───────────┐             │
//! │            │  Bearer auth + limit  │             │
//! │            └───────────┬───────────┘             │
//! │          ┌─────────────┼─────────────┐           │
//! │    ┌─────▼─────┐ ┌─────▼─────┐ ┌─────▼─────┐     │
//! │    │  Outcome  │ │ FlipStore │ │ Identity  │     │
//! │    │   Agent   │ │           │ │ Resolver  │     │
//! │    └───────────┘ └───────────┘ └───────────┘     │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod store;

pub use auth::{IdentityResolver, RateLimiter, StaticTokenResolver, UserIdentity};
pub use config::{ApiToken, GatewayConfig};
pub use error::{GatewayError, Result};
pub use gateway::{AuthenticatedUser, Gateway, GatewayState};
pub use store::{FlipRecord, FlipStore, InMemoryFlipStore};

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8976;

/// Default host
pub const DEFAULT_HOST: &str = "127.0.0.1";

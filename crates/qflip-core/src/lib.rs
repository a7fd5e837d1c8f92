//! QFlip Core - coin-flip agent with privacy-preserving fallback
//!
//! This crate produces coin-flip trials for the QFlip gateway. Trials are
//! delegated to an external probabilistic-computation service when it is
//! reachable and generated locally otherwise.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     OutcomeAgent                     │
//! │   probe ─► remote call ─► results                    │
//! │     └──────── failure ──► local batch                │
//! ├──────────────┬──────────────┬────────────────────────┤
//! │ RandomOutcome│ Pseudonymizer│ PrivacyNoiseInjector   │
//! │  Generator   │ (SHA-256)    │ (Laplace, eps)         │
//! ├──────────────┴──────────────┴────────────────────────┤
//! │           ExternalServiceClient (reqwest)            │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod client;
pub mod config;
pub mod entropy;
pub mod error;
pub mod privacy;
pub mod pseudonym;
pub mod types;

pub use agent::{OutcomeAgent, ServiceState};
pub use client::{ExternalBatch, ExternalFlip, ExternalServiceClient, ExternalTrial, TrialService};
pub use config::AgentConfig;
pub use entropy::RandomOutcomeGenerator;
pub use error::{CoreError, Result};
pub use privacy::PrivacyNoiseInjector;
pub use pseudonym::Pseudonymizer;
pub use types::{
    tally, AggregateStatistic, Outcome, SaltSource, ServiceInfo, Trial, TrialOrigin,
};

/// Core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

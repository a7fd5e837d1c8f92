//! Core data model: outcomes, trials and aggregate statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CoreError;

/// Backend label stamped on locally generated trials
pub const LOCAL_BACKEND: &str = "classical_fallback";

/// Backend label assumed for external trials that do not report one
pub const DEFAULT_EXTERNAL_BACKEND: &str = "qiskit_simulator";

/// One side of the coin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Heads,
    Tails,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Heads => "Heads",
            Outcome::Tails => "Tails",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("heads") {
            Ok(Outcome::Heads)
        } else if s.eq_ignore_ascii_case("tails") {
            Ok(Outcome::Tails)
        } else {
            Err(CoreError::MalformedResponse(format!(
                "unknown outcome: {:?}",
                s
            )))
        }
    }
}

/// Where a trial was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOrigin {
    /// Generated in-process by the fallback generator
    Local,
    /// Returned by the external probabilistic-computation service
    External,
}

/// A single coin-flip trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub outcome: Outcome,

    pub timestamp: DateTime<Utc>,

    pub origin: TrialOrigin,

    /// Shared by every trial of one request
    pub batch_id: String,

    /// Uncorrelated per-trial session token
    pub session_id: String,

    /// Per-trial pseudonym of the requesting user, when one was derived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,

    /// 1-based position in the batch
    pub trial_number: u32,

    pub circuit_depth: u32,

    pub gate_count: u32,

    pub backend: String,

    /// Number of shots the service ran (single-flip path only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shots: Option<u32>,
}

impl Trial {
    /// Build a locally generated trial with default circuit metadata
    pub fn local(
        outcome: Outcome,
        batch_id: impl Into<String>,
        session_id: impl Into<String>,
        trial_number: u32,
    ) -> Self {
        Self {
            outcome,
            timestamp: Utc::now(),
            origin: TrialOrigin::Local,
            batch_id: batch_id.into(),
            session_id: session_id.into(),
            participant_id: None,
            trial_number,
            circuit_depth: 1,
            gate_count: 1,
            backend: LOCAL_BACKEND.to_string(),
            shots: None,
        }
    }

    pub fn with_participant(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    pub fn is_external(&self) -> bool {
        self.origin == TrialOrigin::External
    }
}

/// Heads/tails counts, possibly perturbed for differential privacy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatistic {
    pub heads_count: u64,
    pub tails_count: u64,
    pub total_trials: u64,
    /// Epsilon spent on this aggregate, in [0, 1]
    pub privacy_budget_used: f64,
    pub privacy_preserved: bool,
}

/// Count heads and tails in a batch
pub fn tally(trials: &[Trial]) -> (u64, u64) {
    trials.iter().fold((0, 0), |(h, t), trial| match trial.outcome {
        Outcome::Heads => (h + 1, t),
        Outcome::Tails => (h, t + 1),
    })
}

/// Whether the pseudonymization salt came from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaltSource {
    Configured,
    UsingDefault,
}

/// Non-secret description of the agent's runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub quantum_service_url: String,
    pub privacy_salt: SaltSource,
    pub environment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parsing() {
        assert_eq!("Heads".parse::<Outcome>().unwrap(), Outcome::Heads);
        assert_eq!("tails".parse::<Outcome>().unwrap(), Outcome::Tails);
        assert!("edge".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_local_trial_defaults() {
        let trial = Trial::local(Outcome::Heads, "batch", "session", 1);
        assert_eq!(trial.origin, TrialOrigin::Local);
        assert_eq!(trial.circuit_depth, 1);
        assert_eq!(trial.gate_count, 1);
        assert_eq!(trial.backend, LOCAL_BACKEND);
        assert!(!trial.is_external());
    }

    #[test]
    fn test_trial_serializes_camel_case() {
        let trial = Trial::local(Outcome::Tails, "b", "s", 3).with_participant("p");
        let json = serde_json::to_value(&trial).unwrap();
        assert_eq!(json["batchId"], "b");
        assert_eq!(json["trialNumber"], 3);
        assert_eq!(json["outcome"], "Tails");
        assert_eq!(json["origin"], "local");
        assert!(json.get("shots").is_none());
    }

    #[test]
    fn test_tally() {
        let trials = vec![
            Trial::local(Outcome::Heads, "b", "s1", 1),
            Trial::local(Outcome::Tails, "b", "s2", 2),
            Trial::local(Outcome::Heads, "b", "s3", 3),
        ];
        assert_eq!(tally(&trials), (2, 1));
        assert_eq!(tally(&[]), (0, 0));
    }
}

//! Outcome agent: remote-first coin flips with local fallback
//!
//! Every request probes the external service first:
//!
//! ```text
//!   probe ──► Available   ──► one remote call ──► results
//!         │                        │ failure
//!         └─► Unavailable ─────────┴──────────► local generation
//! ```
//!
//! The batch path always falls back on failure and never mixes remote and
//! local trials. The single-flip path falls back on transport failures but
//! surfaces application errors reported by the service.

use chrono::Utc;
use std::sync::Arc;

use crate::client::{ExternalBatch, ExternalFlip, ExternalServiceClient, ExternalTrial, TrialService};
use crate::config::AgentConfig;
use crate::entropy::RandomOutcomeGenerator;
use crate::error::{CoreError, Result};
use crate::privacy::PrivacyNoiseInjector;
use crate::pseudonym::Pseudonymizer;
use crate::types::{
    tally, AggregateStatistic, ServiceInfo, Trial, TrialOrigin, DEFAULT_EXTERNAL_BACKEND,
};

/// Privacy flag sent with every remote batch request
const REMOTE_PRIVACY_MODE: bool = true;

/// Result of the availability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Available,
    Unavailable,
}

/// Orchestrates trial generation for one request at a time.
/// Holds only read-only configuration, so one instance is shared across requests.
pub struct OutcomeAgent {
    config: AgentConfig,
    service: Arc<dyn TrialService>,
    generator: RandomOutcomeGenerator,
    pseudonymizer: Pseudonymizer,
    noise: PrivacyNoiseInjector,
}

impl OutcomeAgent {
    /// Create an agent talking to the configured service over HTTP
    pub fn new(config: AgentConfig) -> Result<Self> {
        let client = ExternalServiceClient::from_config(&config)?;
        Self::with_service(config, Arc::new(client))
    }

    /// Create an agent backed by any [`TrialService`]
    pub fn with_service(config: AgentConfig, service: Arc<dyn TrialService>) -> Result<Self> {
        let noise = PrivacyNoiseInjector::new(config.epsilon)?;
        let pseudonymizer = Pseudonymizer::new(config.privacy_salt.clone(), config.salt_source);

        Ok(Self {
            config,
            service,
            generator: RandomOutcomeGenerator::new(),
            pseudonymizer,
            noise,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn pseudonymizer(&self) -> &Pseudonymizer {
        &self.pseudonymizer
    }

    pub async fn probe(&self) -> ServiceState {
        if self.service.is_available().await {
            ServiceState::Available
        } else {
            ServiceState::Unavailable
        }
    }

    /// One flip from the local generator, never touching the network
    pub fn classical_flip(&self) -> Trial {
        Trial::local(
            self.generator.generate(),
            self.pseudonymizer.session_token(),
            self.pseudonymizer.session_token(),
            1,
        )
    }

    /// One flip, delegated to the external service when it is reachable.
    ///
    /// An application error reported by the service is returned to the
    /// caller instead of being replaced by a local flip.
    pub async fn single_flip(&self) -> Result<Trial> {
        if self.probe().await == ServiceState::Unavailable {
            tracing::warn!("Using classical fallback, quantum service unavailable");
            return Ok(self.classical_flip());
        }

        tracing::info!("Requesting quantum flip from {}", self.service.base_url());
        match self.service.quantum_flip().await {
            Ok(flip) => {
                tracing::info!("Quantum result received: {}", flip.outcome);
                Ok(self.external_flip(flip))
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!("Quantum flip failed ({}), using classical fallback", e);
                Ok(self.classical_flip())
            }
            Err(e) => {
                tracing::error!("Quantum service rejected flip: {}", e);
                Err(e)
            }
        }
    }

    /// Run `count` trials for `user_id`.
    ///
    /// Prefers a single remote batch call; any failure there (including an
    /// application error) regenerates the whole batch locally.
    pub async fn run_batch(&self, count: usize, user_id: &str) -> Result<Vec<Trial>> {
        self.validate_count(count)?;
        tracing::info!("Agent requesting {} trials", count);

        if self.probe().await == ServiceState::Available {
            match self
                .service
                .quantum_trials(count, user_id, REMOTE_PRIVACY_MODE)
                .await
            {
                Ok(batch) => {
                    tracing::info!(
                        "Received {} quantum results from {}",
                        batch.results.len(),
                        self.service.base_url()
                    );
                    return Ok(self.external_batch(batch, user_id));
                }
                Err(e) => {
                    tracing::warn!(
                        "Quantum trials failed at {} ({}), using classical fallback",
                        self.service.base_url(),
                        e
                    );
                }
            }
        } else {
            tracing::warn!("Using classical fallback for batch, quantum service unavailable");
        }

        Ok(self.local_batch(count, user_id).await)
    }

    fn validate_count(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(CoreError::EmptyBatch);
        }
        if count > self.config.max_batch_size {
            return Err(CoreError::BatchTooLarge {
                requested: count,
                max: self.config.max_batch_size,
            });
        }
        Ok(())
    }

    /// Sequential local trials sharing one pseudonymous batch id
    async fn local_batch(&self, count: usize, user_id: &str) -> Vec<Trial> {
        let batch_id = self.pseudonymizer.pseudonymize(user_id);
        let pacing = self.config.trial_pacing();
        let mut trials: Vec<Trial> = Vec::with_capacity(count);

        tracing::info!("Running {} classical trials", count);
        for index in 0..count {
            if index > 0 && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }

            let participant = self
                .pseudonymizer
                .pseudonymize(&format!("{}{}", user_id, index));
            let mut trial = Trial::local(
                self.generator.generate(),
                batch_id.clone(),
                self.pseudonymizer.session_token(),
                index as u32 + 1,
            )
            .with_participant(participant);

            // Wall-clock time may step backwards; keep the batch ordered.
            if let Some(prev) = trials.last() {
                trial.timestamp = trial.timestamp.max(prev.timestamp);
            }

            tracing::debug!("Trial {} -> {}", trial.trial_number, trial.outcome);
            trials.push(trial);
        }

        tracing::info!("Completed {} classical trials", count);
        trials
    }

    fn external_flip(&self, flip: ExternalFlip) -> Trial {
        Trial {
            outcome: flip.outcome,
            timestamp: flip.timestamp.unwrap_or_else(Utc::now),
            origin: TrialOrigin::External,
            batch_id: self.pseudonymizer.session_token(),
            session_id: self.pseudonymizer.session_token(),
            participant_id: None,
            trial_number: 1,
            circuit_depth: flip.circuit_depth.unwrap_or(1).max(1),
            gate_count: flip.gate_count.unwrap_or(1).max(1),
            backend: DEFAULT_EXTERNAL_BACKEND.to_string(),
            shots: flip.shots,
        }
    }

    /// Results come back in service order; gaps in metadata are filled so
    /// every trial satisfies the local invariants
    fn external_batch(&self, batch: ExternalBatch, user_id: &str) -> Vec<Trial> {
        let fallback_batch_id = batch
            .batch_id
            .clone()
            .unwrap_or_else(|| self.pseudonymizer.pseudonymize(user_id));

        batch
            .results
            .into_iter()
            .enumerate()
            .map(|(index, item)| self.external_trial(item, index, &fallback_batch_id))
            .collect()
    }

    fn external_trial(&self, item: ExternalTrial, index: usize, fallback_batch_id: &str) -> Trial {
        Trial {
            outcome: item.outcome,
            timestamp: item.timestamp.unwrap_or_else(Utc::now),
            origin: TrialOrigin::External,
            batch_id: item
                .batch_id
                .unwrap_or_else(|| fallback_batch_id.to_string()),
            session_id: item
                .session_id
                .unwrap_or_else(|| self.pseudonymizer.session_token()),
            participant_id: item.participant_id,
            trial_number: item.trial_number.unwrap_or(index as u32 + 1),
            circuit_depth: item.circuit_depth.unwrap_or(1).max(1),
            gate_count: item.gate_count.unwrap_or(1).max(1),
            backend: item
                .backend
                .unwrap_or_else(|| DEFAULT_EXTERNAL_BACKEND.to_string()),
            shots: None,
        }
    }

    /// Counts with Laplace noise at the configured epsilon
    pub fn noise_aggregate(&self, heads: u64, tails: u64, total: u64) -> AggregateStatistic {
        AggregateStatistic {
            heads_count: self.noise.add_noise(heads),
            tails_count: self.noise.add_noise(tails),
            total_trials: total,
            privacy_budget_used: self.noise.privacy_budget_used(),
            privacy_preserved: true,
        }
    }

    /// Counts as observed, for callers that opted out of privacy mode
    pub fn exact_aggregate(&self, heads: u64, tails: u64, total: u64) -> AggregateStatistic {
        AggregateStatistic {
            heads_count: heads,
            tails_count: tails,
            total_trials: total,
            privacy_budget_used: 0.0,
            privacy_preserved: false,
        }
    }

    pub fn aggregate_trials(&self, trials: &[Trial], privacy_mode: bool) -> AggregateStatistic {
        let (heads, tails) = tally(trials);
        let total = trials.len() as u64;
        if privacy_mode {
            self.noise_aggregate(heads, tails, total)
        } else {
            self.exact_aggregate(heads, tails, total)
        }
    }

    pub fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            quantum_service_url: self.config.service_url.clone(),
            privacy_salt: self.pseudonymizer.salt_source(),
            environment: self.config.environment.clone(),
        }
    }
}

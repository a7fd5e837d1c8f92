//! Client for the external probabilistic-computation service
//!
//! Response bodies are normalized here, at the boundary: field-name variants
//! (`batch_id` / `batchId` and friends) collapse into one canonical shape
//! before anything else in the crate sees them.
//!
//! Endpoints:
//! - `GET  {base}/health`          availability probe, 2xx means available
//! - `POST {base}/quantum-flip`    one flip, `{outcomes, circuit_depth, gate_count, shots}`
//! - `POST {base}/quantum-trials`  batch, `{success, total_trials, results}` or `{success: false, error}`

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AgentConfig;
use crate::error::{CoreError, Result};
use crate::types::Outcome;

/// One flip as reported by the service
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalFlip {
    pub outcome: Outcome,
    pub circuit_depth: Option<u32>,
    pub gate_count: Option<u32>,
    pub shots: Option<u32>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// One batch item as reported by the service
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalTrial {
    pub outcome: Outcome,
    pub batch_id: Option<String>,
    pub session_id: Option<String>,
    pub participant_id: Option<String>,
    pub trial_number: Option<u32>,
    pub circuit_depth: Option<u32>,
    pub gate_count: Option<u32>,
    pub backend: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A successful batch response
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalBatch {
    pub batch_id: Option<String>,
    pub total_trials: Option<u64>,
    pub results: Vec<ExternalTrial>,
}

/// Operations the outcome agent needs from the external service
#[async_trait]
pub trait TrialService: Send + Sync {
    /// Probe the service; any failure or timeout means unavailable
    async fn is_available(&self) -> bool;

    /// Request a single flip
    async fn quantum_flip(&self) -> Result<ExternalFlip>;

    /// Request a batch of trials in one call
    async fn quantum_trials(
        &self,
        count: usize,
        user_id: &str,
        privacy_mode: bool,
    ) -> Result<ExternalBatch>;

    /// Base address, for logging
    fn base_url(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct TrialsRequest<'a> {
    count: usize,
    user_id: &'a str,
    privacy_mode: bool,
}

#[derive(Debug, Deserialize)]
struct FlipResponse {
    #[serde(default)]
    outcomes: Vec<String>,
    #[serde(default, alias = "circuitDepth")]
    circuit_depth: Option<u32>,
    #[serde(default, alias = "gateCount")]
    gate_count: Option<u32>,
    #[serde(default)]
    shots: Option<u32>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrialsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, alias = "totalTrials")]
    total_trials: Option<u64>,
    #[serde(default, alias = "batchId")]
    batch_id: Option<String>,
    #[serde(default)]
    results: Vec<WireTrial>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTrial {
    outcome: String,
    #[serde(default, alias = "batchId")]
    batch_id: Option<String>,
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(default, alias = "userId")]
    user_id: Option<String>,
    #[serde(default, alias = "trialNumber")]
    trial_number: Option<u32>,
    #[serde(default, alias = "circuitDepth")]
    circuit_depth: Option<u32>,
    #[serde(default, alias = "gateCount")]
    gate_count: Option<u32>,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl WireTrial {
    fn normalize(self) -> Result<ExternalTrial> {
        Ok(ExternalTrial {
            outcome: self.outcome.parse()?,
            batch_id: self.batch_id,
            session_id: self.session_id,
            participant_id: self.user_id,
            trial_number: self.trial_number,
            circuit_depth: self.circuit_depth,
            gate_count: self.gate_count,
            backend: self.backend,
            timestamp: self.timestamp.as_deref().and_then(parse_timestamp),
        })
    }
}

/// Accept RFC 3339 or the naive ISO-8601 form (`2024-05-01T12:00:00.123456`),
/// the latter read as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// HTTP implementation of [`TrialService`]
pub struct ExternalServiceClient {
    base_url: String,
    http_client: reqwest::Client,
    probe_timeout: Duration,
}

impl ExternalServiceClient {
    pub fn new(base_url: impl Into<String>, probe_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CoreError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            probe_timeout,
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Self::new(
            config.service_url.clone(),
            config.probe_timeout(),
            config.request_timeout(),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Transport(format!(
                "HTTP {} from {}: {}",
                status, path, error_text
            )));
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TrialService for ExternalServiceClient {
    async fn is_available(&self) -> bool {
        let probe = self
            .http_client
            .get(self.endpoint("health"))
            .timeout(self.probe_timeout)
            .send()
            .await;

        match probe {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!("Quantum service health check returned {}", resp.status());
                false
            }
            Err(e) => {
                tracing::warn!("Quantum service not available: {}", e);
                false
            }
        }
    }

    async fn quantum_flip(&self) -> Result<ExternalFlip> {
        let body: FlipResponse = self.post_json("quantum-flip", &serde_json::json!({})).await?;

        if let Some(error) = body.error {
            return Err(CoreError::ServiceApplication(error));
        }
        if body.success == Some(false) {
            return Err(CoreError::ServiceApplication(
                "service reported failure without a message".to_string(),
            ));
        }

        let first = body
            .outcomes
            .first()
            .ok_or_else(|| CoreError::MalformedResponse("empty outcomes list".to_string()))?;

        Ok(ExternalFlip {
            outcome: first.parse()?,
            circuit_depth: body.circuit_depth,
            gate_count: body.gate_count,
            shots: body.shots,
            timestamp: body.timestamp.as_deref().and_then(parse_timestamp),
        })
    }

    async fn quantum_trials(
        &self,
        count: usize,
        user_id: &str,
        privacy_mode: bool,
    ) -> Result<ExternalBatch> {
        let request = TrialsRequest {
            count,
            user_id,
            privacy_mode,
        };
        let body: TrialsResponse = self.post_json("quantum-trials", &request).await?;

        if !body.success {
            return Err(CoreError::ServiceApplication(
                body.error
                    .unwrap_or_else(|| "service reported failure without a message".to_string()),
            ));
        }

        let results = body
            .results
            .into_iter()
            .map(WireTrial::normalize)
            .collect::<Result<Vec<_>>>()?;

        Ok(ExternalBatch {
            batch_id: body.batch_id,
            total_trials: body.total_trials,
            results,
        })
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::{get, post}, Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str) -> ExternalServiceClient {
        ExternalServiceClient::new(base, Duration::from_secs(2), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2024-05-01T12:00:00Z").is_some());
        assert!(parse_timestamp("2024-05-01T12:00:00.123456+02:00").is_some());
        let naive = parse_timestamp("2024-05-01T12:00:00.123456").unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-05-01T12:00:00.123456+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_wire_trial_accepts_both_casings() {
        let snake: WireTrial = serde_json::from_value(serde_json::json!({
            "outcome": "Heads",
            "batch_id": "b1",
            "session_id": "s1",
            "circuit_depth": 2,
            "gate_count": 2,
            "trial_number": 1
        }))
        .unwrap();
        let camel: WireTrial = serde_json::from_value(serde_json::json!({
            "outcome": "Heads",
            "batchId": "b1",
            "sessionId": "s1",
            "circuitDepth": 2,
            "gateCount": 2,
            "trialNumber": 1
        }))
        .unwrap();

        assert_eq!(snake.normalize().unwrap(), camel.normalize().unwrap());
    }

    #[test]
    fn test_wire_trial_rejects_unknown_outcome() {
        let wire: WireTrial =
            serde_json::from_value(serde_json::json!({ "outcome": "Edge" })).unwrap();
        assert!(matches!(
            wire.normalize(),
            Err(CoreError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_healthy_service() {
        let base = serve(Router::new().route("/health", get(|| async { "ok" }))).await;
        assert!(client(&base).is_available().await);
    }

    #[tokio::test]
    async fn test_probe_unhealthy_service() {
        let base = serve(Router::new().route(
            "/health",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        assert!(!client(&base).is_available().await);
    }

    #[tokio::test]
    async fn test_probe_unreachable_service() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(!client(&format!("http://{}", addr)).is_available().await);
    }

    #[tokio::test]
    async fn test_quantum_flip_maps_first_outcome() {
        let base = serve(Router::new().route(
            "/quantum-flip",
            post(|| async {
                Json(serde_json::json!({
                    "outcomes": ["Tails"],
                    "counts": {"0": 1},
                    "quantum": true,
                    "circuit_depth": 2,
                    "gate_count": 2,
                    "shots": 1,
                    "timestamp": "2024-05-01T12:00:00.5"
                }))
            }),
        ))
        .await;

        let flip = client(&base).quantum_flip().await.unwrap();
        assert_eq!(flip.outcome, Outcome::Tails);
        assert_eq!(flip.circuit_depth, Some(2));
        assert_eq!(flip.shots, Some(1));
        assert!(flip.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_quantum_flip_application_error() {
        let base = serve(Router::new().route(
            "/quantum-flip",
            post(|| async { Json(serde_json::json!({ "success": false, "error": "x" })) }),
        ))
        .await;

        let err = client(&base).quantum_flip().await.unwrap_err();
        assert_eq!(err, CoreError::ServiceApplication("x".to_string()));
    }

    #[tokio::test]
    async fn test_quantum_flip_server_error_is_transport() {
        let base = serve(Router::new().route(
            "/quantum-flip",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "boom" })),
                )
            }),
        ))
        .await;

        let err = client(&base).quantum_flip().await.unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
    }

    #[tokio::test]
    async fn test_quantum_trials_success() {
        let base = serve(Router::new().route(
            "/quantum-trials",
            post(|Json(req): Json<serde_json::Value>| async move {
                let count = req["count"].as_u64().unwrap();
                assert_eq!(req["user_id"], "user42");
                assert_eq!(req["privacy_mode"], true);
                let results: Vec<_> = (0..count)
                    .map(|i| {
                        serde_json::json!({
                            "outcome": if i % 2 == 0 { "Heads" } else { "Tails" },
                            "batch_id": "remote-batch",
                            "session_id": format!("s{}", i),
                            "trial_number": i + 1,
                            "circuit_depth": 2,
                            "gate_count": 2
                        })
                    })
                    .collect();
                Json(serde_json::json!({
                    "success": true,
                    "total_trials": count,
                    "batch_id": "remote-batch",
                    "results": results
                }))
            }),
        ))
        .await;

        let batch = client(&base).quantum_trials(3, "user42", true).await.unwrap();
        assert_eq!(batch.total_trials, Some(3));
        assert_eq!(batch.results.len(), 3);
        assert_eq!(batch.results[1].outcome, Outcome::Tails);
        assert_eq!(batch.results[2].session_id.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn test_quantum_trials_application_error() {
        let base = serve(Router::new().route(
            "/quantum-trials",
            post(|| async { Json(serde_json::json!({ "success": false, "error": "x" })) }),
        ))
        .await;

        let err = client(&base).quantum_trials(2, "u", true).await.unwrap_err();
        assert_eq!(err, CoreError::ServiceApplication("x".to_string()));
    }
}

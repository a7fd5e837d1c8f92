//! Main Gateway implementation
//!
//! HTTP routes for coin flips, quantum batches and flip history.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use qflip_core::types::DEFAULT_EXTERNAL_BACKEND;
use qflip_core::{AggregateStatistic, Outcome, OutcomeAgent, Trial};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{bearer_token, IdentityResolver, RateLimiter, StaticTokenResolver, UserIdentity};
use crate::config::GatewayConfig;
use crate::store::{FlipRecord, FlipStore, InMemoryFlipStore};
use crate::{GatewayError, Result};

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Gateway state shared across handlers
#[derive(Clone)]
pub struct GatewayState {
    pub config: GatewayConfig,
    pub agent: Arc<OutcomeAgent>,
    pub store: Arc<dyn FlipStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub rate_limiter: Arc<RateLimiter>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl GatewayState {
    /// State with an HTTP-backed agent, in-memory store and static tokens
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let agent = Arc::new(OutcomeAgent::new(config.agent.clone())?);
        let identity = Arc::new(StaticTokenResolver::from_tokens(&config.api_tokens));
        Ok(Self::with_components(
            config,
            agent,
            Arc::new(InMemoryFlipStore::new()),
            identity,
        ))
    }

    pub fn with_components(
        config: GatewayConfig,
        agent: Arc<OutcomeAgent>,
        store: Arc<dyn FlipStore>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute)),
            config,
            agent,
            store,
            identity,
            shutdown_tx,
        }
    }
}

/// Caller resolved from the bearer token, already counted against the rate limit
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserIdentity);

#[async_trait]
impl FromRequestParts<Arc<GatewayState>> for AuthenticatedUser {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| GatewayError::Unauthorized("Missing bearer token".to_string()))?;

        let identity = state
            .identity
            .resolve(token)
            .await
            .ok_or_else(|| GatewayError::Unauthorized("Invalid or expired token".to_string()))?;

        if !state.rate_limiter.check(&identity.id) {
            tracing::warn!("Rate limit exceeded for user {}", identity.id);
            return Err(GatewayError::RateLimitExceeded(identity.id));
        }

        Ok(Self(identity))
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveFlipRequest {
    pub result: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantumFlipRequest {
    #[serde(default = "default_trials")]
    pub trials: i64,
    #[serde(default = "default_privacy_mode")]
    pub privacy_mode: bool,
}

fn default_trials() -> i64 {
    1
}

fn default_privacy_mode() -> bool {
    true
}

impl Default for QuantumFlipRequest {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            privacy_mode: default_privacy_mode(),
        }
    }
}

impl QuantumFlipRequest {
    /// Parse a request body. Only an empty body falls back to the defaults;
    /// anything else must be well-typed JSON sent as JSON.
    pub fn from_body(headers: &HeaderMap, body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        if !is_json_content_type(headers) {
            return Err(GatewayError::BadRequest(
                "Expected request with `Content-Type: application/json`".to_string(),
            ));
        }
        Json::<Self>::from_bytes(body)
            .map(|Json(request)| request)
            .map_err(|rejection| GatewayError::BadRequest(rejection.body_text()))
    }
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|essence| {
            let essence = essence.trim().to_ascii_lowercase();
            essence == "application/json"
                || (essence.starts_with("application/") && essence.ends_with("+json"))
        })
        .unwrap_or(false)
}

/// Response payload of a quantum batch
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: Option<String>,
    pub trials: usize,
    /// Every trial came from the external service
    pub quantum: bool,
    pub backend: String,
    pub statistics: AggregateStatistic,
    pub last_result: Option<Outcome>,
    pub saved_count: usize,
}

/// Main Gateway
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Create a new gateway with configuration
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Ok(Self::with_state(GatewayState::new(config)?))
    }

    pub fn with_state(state: GatewayState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Get gateway state
    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Build the Axum router
    pub fn build_router(&self) -> Router {
        let api = Router::new()
            .route(
                "/flip",
                get(Self::handle_public_flip).post(Self::handle_save_flip),
            )
            .route("/quantum-flip", post(Self::handle_quantum_flip))
            .route("/quantum-flip/single", post(Self::handle_single_flip))
            .route("/history", get(Self::handle_history))
            .route("/service-info", get(Self::handle_service_info));

        Router::new()
            .route("/health", get(Self::handle_health))
            .nest("/api/Routes", api)
            .fallback(Self::handle_not_found)
            .layer(self.cors_layer())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .state
            .config
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    }

    /// Start the gateway server
    pub async fn start(&self) -> Result<()> {
        let addr = self.state.config.socket_addr()?;
        let router = self.build_router();

        tracing::info!("QFlip gateway starting on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();

        // Spawn rate limiter cleanup
        let limiter = self.state.rate_limiter.clone();
        let mut cleanup_shutdown = self.state.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => limiter.cleanup(),
                    _ = cleanup_shutdown.recv() => break,
                }
            }
            tracing::debug!("Rate limiter cleanup stopped");
        });

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        Ok(())
    }

    /// Shutdown the gateway
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
        tracing::info!("Gateway shutdown initiated");
    }

    // HTTP handlers

    async fn handle_health() -> impl IntoResponse {
        Json(serde_json::json!({
            "status": "OK",
            "timestamp": Utc::now().to_rfc3339(),
            "service": "qflip-gateway",
            "version": crate::VERSION,
            "coreVersion": qflip_core::VERSION,
        }))
    }

    async fn handle_not_found(uri: Uri) -> GatewayError {
        GatewayError::NotFound(uri.path().to_string())
    }

    /// Unauthenticated flip, nothing stored
    async fn handle_public_flip(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
        Json(serde_json::json!({ "result": state.agent.classical_flip().outcome }))
    }

    async fn handle_save_flip(
        State(state): State<Arc<GatewayState>>,
        AuthenticatedUser(user): AuthenticatedUser,
        Json(body): Json<SaveFlipRequest>,
    ) -> Result<impl IntoResponse> {
        let result: Outcome = body
            .result
            .parse()
            .map_err(|_| GatewayError::BadRequest("result must be Heads or Tails".to_string()))?;

        tracing::info!("Saving classical flip for user {}: {}", user, result);
        let saved = state
            .store
            .save(FlipRecord::classical(result, user.id.clone()))
            .await?;

        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "success": true, "data": saved })),
        ))
    }

    async fn handle_quantum_flip(
        State(state): State<Arc<GatewayState>>,
        AuthenticatedUser(user): AuthenticatedUser,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<impl IntoResponse> {
        let request = QuantumFlipRequest::from_body(&headers, &body)?;
        let max = state.config.max_trials_per_request;

        if request.trials > max as i64 {
            return Err(GatewayError::BadRequest(format!(
                "Maximum {} trials per request",
                max
            )));
        }
        if request.trials < 1 {
            return Err(GatewayError::BadRequest(
                "At least 1 trial per request".to_string(),
            ));
        }
        let count = request.trials as usize;

        tracing::info!("Quantum flip request: {} trials for user {}", count, user);
        let trials = state.agent.run_batch(count, &user.id).await?;

        // Records keep the raw user id so history lookups work.
        let mut saved_count = 0;
        for trial in &trials {
            state
                .store
                .save(FlipRecord::from_trial(trial, user.id.clone(), request.privacy_mode))
                .await?;
            saved_count += 1;
        }

        let statistics = state.agent.aggregate_trials(&trials, request.privacy_mode);
        let summary = BatchSummary {
            batch_id: trials.first().map(|t| t.batch_id.clone()),
            trials: trials.len(),
            quantum: !trials.is_empty() && trials.iter().all(Trial::is_external),
            backend: trials
                .first()
                .map(|t| t.backend.clone())
                .unwrap_or_else(|| DEFAULT_EXTERNAL_BACKEND.to_string()),
            statistics,
            last_result: trials.last().map(|t| t.outcome),
            saved_count,
        };

        tracing::info!(
            "Quantum flip completed for {}: {} trials saved",
            user,
            saved_count
        );

        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "success": true, "data": summary })),
        ))
    }

    async fn handle_single_flip(
        State(state): State<Arc<GatewayState>>,
        AuthenticatedUser(user): AuthenticatedUser,
    ) -> Result<impl IntoResponse> {
        let trial = state.agent.single_flip().await?;
        let saved = state
            .store
            .save(FlipRecord::from_trial(&trial, user.id.clone(), false))
            .await?;

        Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "success": true, "data": saved })),
        ))
    }

    async fn handle_history(
        State(state): State<Arc<GatewayState>>,
        AuthenticatedUser(user): AuthenticatedUser,
    ) -> Result<impl IntoResponse> {
        let history = state
            .store
            .history(&user.id, state.config.history_limit)
            .await?;

        tracing::info!("Found {} flips for user {}", history.len(), user);

        Ok(Json(serde_json::json!({
            "success": true,
            "count": history.len(),
            "data": history,
            "userId": user.id,
        })))
    }

    async fn handle_service_info(
        State(state): State<Arc<GatewayState>>,
        AuthenticatedUser(_user): AuthenticatedUser,
    ) -> impl IntoResponse {
        Json(serde_json::json!({
            "success": true,
            "data": state.agent.service_info(),
        }))
    }
}

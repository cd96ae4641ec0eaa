//! REST handlers for campaign runs, topic events, stats and health checks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use campaign_core::types::{DeliveryStats, RunSummary};
use campaign_core::CampaignError;
use campaign_orchestration::CampaignEngine;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: CampaignEngine,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Engine error rendered as an HTTP response.
pub struct ApiError(pub CampaignError);

impl From<CampaignError> for ApiError {
    fn from(err: CampaignError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            CampaignError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            CampaignError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
            CampaignError::RunInProgress(_) => (StatusCode::CONFLICT, "run_in_progress"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
        } else {
            warn!(error = %self.0, "Request rejected");
        }
        let body = ErrorResponse {
            error: code.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// POST /api/v1/orchestration/run/:campaign_id: run a campaign now.
pub async fn run_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<RunSummary>, ApiError> {
    info!(campaign_id = %campaign_id, "Manual campaign run requested");
    let summary = state.engine.run_campaign(&campaign_id).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct TopicEvent {
    pub topic: String,
}

#[derive(Debug, Serialize)]
pub struct TopicEventResponse {
    pub topic: String,
    pub campaigns_triggered: u32,
    pub summary: Option<RunSummary>,
}

/// POST /api/v1/events: run the scheduled campaign for a topic, if any.
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<TopicEvent>,
) -> Result<Json<TopicEventResponse>, ApiError> {
    let topic = event.topic.trim().to_string();
    if topic.is_empty() {
        return Err(ApiError(CampaignError::Validation(vec![
            campaign_core::FieldError::new("topic", "must not be empty"),
        ])));
    }
    let summary = state.engine.trigger_topic(&topic).await?;
    Ok(Json(TopicEventResponse {
        campaigns_triggered: u32::from(summary.is_some()),
        topic,
        summary,
    }))
}

/// GET /api/v1/stats: delivery dashboard counters.
pub async fn stats(State(state): State<AppState>) -> Result<Json<DeliveryStats>, ApiError> {
    Ok(Json(state.engine.stats().await?))
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /live: Liveness check.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

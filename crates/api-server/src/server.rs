//! API server: HTTP routes plus the Prometheus metrics exporter.

use crate::rest::{self, AppState};
use crate::webhooks;
use axum::routing::{get, post};
use axum::Router;
use campaign_core::config::AppConfig;
use campaign_orchestration::CampaignEngine;
use std::net::SocketAddr;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the application router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Campaign execution
        .route("/api/v1/orchestration/run/:campaign_id", post(rest::run_campaign))
        .route("/api/v1/events", post(rest::ingest_event))
        .route("/api/v1/stats", get(rest::stats))
        // Provider webhooks
        .route("/twilio/status", post(webhooks::status_callback))
        .route("/twilio/inbound", post(webhooks::inbound_message))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    engine: CampaignEngine,
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: CampaignEngine) -> Self {
        Self { config, engine }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            engine: self.engine.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

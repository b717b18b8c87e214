//! Route table and request handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use modsync::snapshot::IngestRequest;
use modsync::{CycleAnalysisResult, HealthReport, IngestReport, SyncService};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Service every handler delegates to
    pub service: SyncService,
}

impl AppState {
    /// Wrap a service.
    #[must_use]
    pub fn new(service: SyncService) -> Self {
        Self { service }
    }
}

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/analyse", get(analyse))
        .route("/analyze", get(analyse))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.service.health().await)
}

async fn ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestReport>, ApiError> {
    let Json(request) = body?;
    let report = state.service.ingest(request.into_payloads()).await?;
    Ok(Json(report))
}

async fn analyse(
    State(state): State<AppState>,
) -> Result<Json<CycleAnalysisResult>, ApiError> {
    Ok(Json(state.service.analyze().await?))
}

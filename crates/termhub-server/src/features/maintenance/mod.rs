//! Maintenance routes

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::error::AppError;
use crate::features::FeatureState;

/// Create maintenance routes
pub fn maintenance_routes() -> Router<FeatureState> {
    Router::new().route("/maintenance/flush", post(flush_cache))
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub removed: Vec<String>,
}

/// Delete all cached artifacts regardless of age
///
/// POST /maintenance/flush
async fn flush_cache(State(state): State<FeatureState>) -> Result<Json<FlushResponse>, AppError> {
    let removed = state.jobs.flush_all().await?;
    Ok(Json(FlushResponse { removed }))
}

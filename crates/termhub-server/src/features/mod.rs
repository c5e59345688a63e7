//! Feature modules implementing the termhub API
//!
//! # Features
//!
//! - **jobs**: submit aggregation jobs, poll them, download artifacts
//! - **resources**: the resource catalogue with local dump availability
//! - **maintenance**: cache flush
//!
//! Each feature exposes a `*_routes()` function returning a router over
//! [`FeatureState`].

pub mod jobs;
pub mod maintenance;
pub mod resources;

use axum::Router;
use std::sync::Arc;

use crate::jobs::JobManager;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// Build manager; also owns the registry and dump directory
    pub jobs: Arc<JobManager>,
}

/// Creates the API router with all feature routes mounted
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .merge(jobs::jobs_routes())
        .merge(resources::resources_routes())
        .merge(maintenance::maintenance_routes())
        .with_state(state)
}

//! Job routes

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::error::AppError;
use crate::features::FeatureState;
use crate::jobs::{JobRequest, JobStatus};

/// Create job routes
pub fn jobs_routes() -> Router<FeatureState> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/download", get(download_job))
        .route("/jobs/:job_id/stats", get(get_job_stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct FormatQuery {
    #[serde(default)]
    pub zipped: bool,
}

fn status_response(status: JobStatus) -> Response {
    let code = match status {
        JobStatus::Ready { .. } => StatusCode::OK,
        JobStatus::Building { .. } => StatusCode::ACCEPTED,
        // a failed build is a result, not a server error
        JobStatus::Failed { .. } => StatusCode::OK,
        JobStatus::NotFound { .. } => StatusCode::NOT_FOUND,
    };
    (code, Json(status)).into_response()
}

/// Submit an aggregation job
///
/// POST /jobs
async fn submit_job(
    State(state): State<FeatureState>,
    Json(request): Json<JobRequest>,
) -> Result<Response, AppError> {
    let status = state.jobs.submit(request).await?;
    Ok(status_response(status))
}

/// Poll a job
///
/// GET /jobs/:job_id?zipped=true
async fn get_job(
    State(state): State<FeatureState>,
    Path(job_id): Path<String>,
    Query(format): Query<FormatQuery>,
) -> Result<Response, AppError> {
    let status = state.jobs.status(&job_id, format.zipped).await?;
    Ok(status_response(status))
}

/// Stream a ready artifact
///
/// GET /jobs/:job_id/download?zipped=true
async fn download_job(
    State(state): State<FeatureState>,
    Path(job_id): Path<String>,
    Query(format): Query<FormatQuery>,
) -> Result<Response, AppError> {
    let path = state.jobs.download(&job_id, format.zipped).await?;
    let file = tokio::fs::File::open(&path).await?;
    let length = file.metadata().await?.len();

    let (content_type, ext) = if format.zipped {
        ("application/zip", "zip")
    } else {
        ("text/tab-separated-values; charset=utf-8", "tsv")
    };
    let disposition = format!("attachment; filename=\"termhub-{}.{}\"", &job_id[..12], ext);

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// Aggregation statistics of a ready job
///
/// GET /jobs/:job_id/stats
async fn get_job_stats(
    State(state): State<FeatureState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let stats = state.jobs.stats(&job_id).await?;
    Ok((StatusCode::OK, Json(stats)).into_response())
}

//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use termhub_ingest::IngestError;
use thiserror::Error;

/// Errors raised while keying, dispatching or reading a job
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job worker failed: {0}")]
    Worker(String),
}

impl JobError {
    /// Message safe to show a client polling the job
    ///
    /// Request problems are reported verbatim; everything else stays in the
    /// server log.
    pub fn user_message(&self) -> String {
        match self {
            JobError::Ingest(
                e @ (IngestError::MissingDump { .. }
                | IngestError::UnknownResource(_)
                | IngestError::InvalidRenaming { .. }
                | IngestError::UnknownPostfilter(_)),
            ) => e.to_string(),
            JobError::InvalidRequest(message) => message.clone(),
            _ => "The term list could not be built".to_string(),
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Io(ref e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "An IO error occurred".to_string())
            },
            AppError::Job(ref e) => match e {
                JobError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                JobError::Ingest(IngestError::UnknownResource(_)) => {
                    (StatusCode::NOT_FOUND, e.user_message())
                },
                JobError::InvalidRequest(_)
                | JobError::Ingest(
                    IngestError::MissingDump { .. }
                    | IngestError::InvalidRenaming { .. }
                    | IngestError::UnknownPostfilter(_),
                ) => (StatusCode::BAD_REQUEST, e.user_message()),
                _ => {
                    tracing::error!("Job error: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, e.user_message())
                },
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_internal_errors() {
        let err = JobError::Io(std::io::Error::other("/secret/path: disk full"));
        assert_eq!(err.user_message(), "The term list could not be built");

        let err = JobError::Ingest(IngestError::UnknownResource("nope".to_string()));
        assert_eq!(err.user_message(), "Unknown resource: nope");
    }

    #[test]
    fn test_status_codes() {
        let response = AppError::Job(JobError::NotFound("abc".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::Job(JobError::Ingest(IngestError::MissingDump {
            resource: "mesh".to_string(),
            path: "desc2024.xml".to_string(),
        }))
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::Job(JobError::Worker("panicked".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

//! Termhub Server Library
//!
//! HTTP service that builds aggregated term lists on demand.
//!
//! # Overview
//!
//! - **Jobs**: every request is keyed by a content hash over its parameters
//!   and the mtimes of the dumps it reads ([`jobs::key`]); identical requests
//!   share one build and one artifact
//! - **Workers**: builds run on a bounded pool, one slot per resource plus one
//! - **Artifacts**: tables, zips, statistics and error sidecars live in one
//!   directory, reaped once untouched for the configured period
//! - **API**: axum routes under `/api/v1` with CORS and request tracing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use termhub_ingest::{config::IngestConfig, resources::Registry};
//! use termhub_server::{api, config::Config, jobs::JobManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let ingest = Arc::new(IngestConfig::from_env()?);
//!     let registry = Arc::new(Registry::builtin(&ingest)?);
//!     let jobs = Arc::new(JobManager::new(&config.jobs, ingest, registry)?);
//!     api::serve(api::AppState { jobs }, &config).await
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod jobs;
pub mod middleware;

// Re-export commonly used types
pub use error::{AppError, JobError};

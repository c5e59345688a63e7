//! termhub-server - Main entry point

use anyhow::{Context, Result};
use std::sync::Arc;
use termhub_common::logging::{init_logging, LogConfig};
use termhub_ingest::config::IngestConfig;
use termhub_ingest::resources::Registry;
use tracing::info;

use termhub_server::{
    api::{self, AppState},
    config::Config,
    jobs::JobManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("termhub-server")
        .filter_directives("termhub_server=debug,termhub_ingest=info,tower_http=debug")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    info!("Starting termhub server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let ingest = IngestConfig::from_env().context("Failed to load ingest configuration")?;
    ingest.validate()?;
    let ingest = Arc::new(ingest);
    let registry = Arc::new(Registry::builtin(&ingest)?);

    let jobs = JobManager::new(&config.jobs, Arc::clone(&ingest), registry)
        .with_context(|| format!("Failed to open {}", config.jobs.artifact_dir.display()))?;
    info!(
        workers = jobs.worker_count(),
        dump_dir = %ingest.dump_dir.display(),
        artifact_dir = %config.jobs.artifact_dir.display(),
        "Job manager ready"
    );

    api::serve(AppState { jobs: Arc::new(jobs) }, &config).await
}

//! Asynchronous build manager
//!
//! Requests are keyed with [`job_key`]; a key that is already ready is served
//! from disk, one that is building is only observed, and anything else is
//! dispatched to a bounded worker pool. After every build the reaper sweeps
//! artifacts nobody asked for within the reap threshold.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use termhub_ingest::aggregate::{AggregateOptions, Aggregator};
use termhub_ingest::config::IngestConfig;
use termhub_ingest::resources::Registry;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::artifacts::{ArtifactState, ArtifactStore};
use super::key::{is_job_id, job_key, JobRequest};
use crate::config::JobsConfig;
use crate::error::JobError;

/// Writes one job's table
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    /// Write the table for `options` into `out` and return its statistics
    async fn build(&self, options: AggregateOptions, out: PathBuf) -> Result<Value, JobError>;
}

/// Runs the aggregation engine on a blocking thread
pub struct AggregatorBuilder {
    aggregator: Arc<Aggregator>,
}

impl AggregatorBuilder {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator: Arc::new(aggregator),
        }
    }
}

#[async_trait]
impl ArtifactBuilder for AggregatorBuilder {
    async fn build(&self, options: AggregateOptions, out: PathBuf) -> Result<Value, JobError> {
        let aggregator = Arc::clone(&self.aggregator);
        tokio::task::spawn_blocking(move || -> Result<Value, JobError> {
            let mut writer = BufWriter::new(File::create(&out)?);
            let report = aggregator.run(&options, &mut writer)?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            for failed in &report.failed {
                warn!(resource = %failed.resource, error = %failed.message, "Resource left out of job");
            }
            Ok(serde_json::to_value(&report).map_err(io::Error::from)?)
        })
        .await
        .map_err(|e| JobError::Worker(e.to_string()))?
    }
}

/// What a client learns about a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Ready { job_id: String, size: u64, zipped: bool },
    Building { job_id: String },
    Failed { job_id: String, message: String },
    NotFound { job_id: String },
}

impl JobStatus {
    pub fn job_id(&self) -> &str {
        match self {
            JobStatus::Ready { job_id, .. }
            | JobStatus::Building { job_id }
            | JobStatus::Failed { job_id, .. }
            | JobStatus::NotFound { job_id } => job_id,
        }
    }
}

pub struct JobManager {
    store: ArtifactStore,
    registry: Arc<Registry>,
    dump_dir: PathBuf,
    builder: Arc<dyn ArtifactBuilder>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    in_flight: Mutex<HashSet<String>>,
    reap_after: Duration,
    stale_build: Duration,
}

impl JobManager {
    /// Manager building with the aggregation engine
    pub fn new(
        config: &JobsConfig,
        ingest: Arc<IngestConfig>,
        registry: Arc<Registry>,
    ) -> io::Result<Self> {
        let dump_dir = ingest.dump_dir.clone();
        let builder = AggregatorBuilder::new(Aggregator::new(ingest, Arc::clone(&registry)));
        Self::with_builder(config, dump_dir, registry, Arc::new(builder))
    }

    pub fn with_builder(
        config: &JobsConfig,
        dump_dir: impl Into<PathBuf>,
        registry: Arc<Registry>,
        builder: Arc<dyn ArtifactBuilder>,
    ) -> io::Result<Self> {
        // one slot per resource plus one, so a slow resource cannot starve the rest
        let worker_count = config.workers.unwrap_or(registry.len() + 1).max(1);
        Ok(Self {
            store: ArtifactStore::open(&config.artifact_dir)?,
            registry,
            dump_dir: dump_dir.into(),
            builder,
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            in_flight: Mutex::new(HashSet::new()),
            reap_after: config.reap_after(),
            stale_build: config.stale_build(),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve, observe or dispatch the job for `request`
    pub async fn submit(self: &Arc<Self>, request: JobRequest) -> Result<JobStatus, JobError> {
        let id = job_key(&request.options, &self.registry, &self.dump_dir)?;

        let dispatch = {
            let mut in_flight = self.in_flight();
            if in_flight.contains(&id) {
                debug!(job_id = %id, "Job already building");
                return Ok(JobStatus::Building { job_id: id });
            }
            let dispatch = match self.store.state(&id)? {
                ArtifactState::Ready { .. } => false,
                ArtifactState::Building { age } if age < self.stale_build => {
                    debug!(job_id = %id, "Job building in another process");
                    return Ok(JobStatus::Building { job_id: id });
                },
                ArtifactState::Building { age } => {
                    warn!(job_id = %id, age_secs = age.as_secs(), "Replacing stale build");
                    true
                },
                ArtifactState::Failed { .. } | ArtifactState::Missing => true,
            };
            if dispatch {
                self.store.begin(&id)?;
                in_flight.insert(id.clone());
            }
            dispatch
        };

        if !dispatch {
            self.store.touch(&id)?;
            debug!(job_id = %id, "Serving cached job");
            return self.ready(id, request.zipped).await;
        }

        info!(job_id = %id, resources = ?request.options.resources, "Dispatching job");
        let manager = Arc::clone(self);
        let job_id = id.clone();
        tokio::spawn(async move { manager.run(job_id, request.options).await });
        Ok(JobStatus::Building { job_id: id })
    }

    async fn run(self: Arc<Self>, id: String, options: AggregateOptions) {
        let result = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(_permit) => {
                let started = Instant::now();
                let result = self
                    .builder
                    .build(options, self.store.building_path(&id))
                    .await;
                info!(
                    job_id = %id,
                    ok = result.is_ok(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job build finished"
                );
                result
            },
            Err(_) => Err(JobError::Worker("worker pool closed".to_string())),
        };
        self.finish(&id, result);
        self.reap().await;
    }

    fn finish(&self, id: &str, result: Result<Value, JobError>) {
        let recorded = match result {
            Ok(stats) => self.store.commit(id, &stats).map(|_| ()),
            Err(e) => {
                error!(job_id = %id, error = ?e, "Job build failed");
                self.store.fail(id, &e.user_message())
            },
        };
        if let Err(e) = recorded {
            error!(job_id = %id, error = %e, "Failed to record job outcome");
            if let Err(e) = self.store.fail(id, "The term list could not be built") {
                error!(job_id = %id, error = %e, "Failed to write error sidecar");
            }
        }
        // published before release, so observers go building -> ready/failed
        self.in_flight().remove(id);
    }

    async fn reap(&self) {
        let store = self.store.clone();
        let max_age = self.reap_after;
        match tokio::task::spawn_blocking(move || store.reap(max_age)).await {
            Ok(Ok(removed)) if !removed.is_empty() => {
                info!(count = removed.len(), "Reaped expired artifacts");
            },
            Ok(Ok(_)) => {},
            Ok(Err(e)) => warn!(error = %e, "Artifact reaping failed"),
            Err(e) => warn!(error = %e, "Artifact reaper panicked"),
        }
    }

    async fn ready(&self, job_id: String, zipped: bool) -> Result<JobStatus, JobError> {
        let path = self.artifact(&job_id, zipped).await?;
        let size = tokio::fs::metadata(&path).await?.len();
        Ok(JobStatus::Ready {
            job_id,
            size,
            zipped,
        })
    }

    async fn artifact(&self, id: &str, zipped: bool) -> Result<PathBuf, JobError> {
        if !zipped {
            return Ok(self.store.table_path(id));
        }
        let store = self.store.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.zipped(&id))
            .await
            .map_err(|e| JobError::Worker(e.to_string()))?
            .map_err(JobError::from)
    }

    /// Current state of `id` without dispatching anything
    pub async fn status(&self, id: &str, zipped: bool) -> Result<JobStatus, JobError> {
        let job_id = id.to_string();
        if !is_job_id(id) {
            return Ok(JobStatus::NotFound { job_id });
        }
        if self.in_flight().contains(id) {
            return Ok(JobStatus::Building { job_id });
        }
        match self.store.state(id)? {
            ArtifactState::Ready { .. } => self.ready(job_id, zipped).await,
            ArtifactState::Building { age } if age < self.stale_build => {
                Ok(JobStatus::Building { job_id })
            },
            // a crashed build; resubmitting replaces it
            ArtifactState::Building { .. } | ArtifactState::Missing => {
                Ok(JobStatus::NotFound { job_id })
            },
            ArtifactState::Failed { message } => Ok(JobStatus::Failed { job_id, message }),
        }
    }

    /// Path of a ready artifact; keeps it alive
    pub async fn download(&self, id: &str, zipped: bool) -> Result<PathBuf, JobError> {
        if !is_job_id(id) || self.in_flight().contains(id) {
            return Err(JobError::NotFound(id.to_string()));
        }
        match self.store.state(id)? {
            ArtifactState::Ready { .. } => {
                self.store.touch(id)?;
                self.artifact(id, zipped).await
            },
            _ => Err(JobError::NotFound(id.to_string())),
        }
    }

    /// Statistics of a ready job
    pub async fn stats(&self, id: &str) -> Result<Value, JobError> {
        if !is_job_id(id) {
            return Err(JobError::NotFound(id.to_string()));
        }
        match tokio::fs::read(self.store.stats_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).map_err(io::Error::from)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(JobError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every finished artifact; returns the removed file names
    pub async fn flush_all(&self) -> Result<Vec<String>, JobError> {
        let store = self.store.clone();
        let removed = tokio::task::spawn_blocking(move || store.flush())
            .await
            .map_err(|e| JobError::Worker(e.to_string()))??;
        info!(count = removed.len(), "Flushed job artifacts");
        Ok(removed)
    }
}

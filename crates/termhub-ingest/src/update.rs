//! Update orchestration
//!
//! [`Updater::update`] decides whether a resource needs fetching and then
//! runs its recipes into claimed staging files:
//!
//! 1. wait for (or fail on) a live `.tmp` sentinel of another process
//! 2. unless forced: skip if fetched within `min_update_freq`, then ask the
//!    StatLog whether the remote changed; a failed check goes through the
//!    [`CheckFailurePolicy`]
//! 3. claim sentinels, download, extract, commit all dumps together
//! 4. record the fetch in the StatLog
//!
//! A failed download resets the StatLog so the next run starts over; the
//! previous dumps stay in place.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::pipeline::staging::live_sentinel;
use crate::pipeline::{Executor, Recipe, Staging};
use crate::remote::{address_key, RemoteClient, SizeProbe};
use crate::resources::{Registry, ResourceDescriptor};
use crate::statlog::{self, StatLog};

/// Result of asking the StatLog about the remote
#[derive(Debug)]
pub enum ChangeCheckOutcome {
    Unchanged,
    Changed,
    Failed(IngestError),
}

/// Confirmation callback: `(resource, error) -> update anyway?`
pub type Prompt = Arc<dyn Fn(&str, &IngestError) -> bool + Send + Sync>;

/// What to do when the remote change check fails
#[derive(Clone, Default)]
pub enum CheckFailurePolicy {
    Ask(Prompt),
    #[default]
    Skip,
    Force,
    /// Update only if the last fetch is older than the fallback period
    ForceFallback,
}

impl fmt::Debug for CheckFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFailurePolicy::Ask(_) => f.write_str("Ask(..)"),
            CheckFailurePolicy::Skip => f.write_str("Skip"),
            CheckFailurePolicy::Force => f.write_str("Force"),
            CheckFailurePolicy::ForceFallback => f.write_str("ForceFallback"),
        }
    }
}

/// Behaviour when another process is updating the same dumps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    #[default]
    FailFast,
    /// Poll with doubling intervals, capped at the configured wait interval
    Wait,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Skip both throttles and the change check
    pub force: bool,
    pub on_check_failure: CheckFailurePolicy,
    pub wait: WaitPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    UpToDate,
    Updated { files: Vec<PathBuf> },
    Skipped { reason: String },
}

/// Local state of one resource
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub name: String,
    pub dumps: Vec<PathBuf>,
    pub available: bool,
    pub modified: Option<i64>,
    pub checked: i64,
    pub changed: bool,
    pub updating: bool,
}

pub struct Updater {
    config: Arc<IngestConfig>,
    registry: Arc<Registry>,
    client: RemoteClient,
    probe: Arc<dyn SizeProbe>,
    first_poll: Duration,
}

impl Updater {
    pub fn new(config: Arc<IngestConfig>, registry: Arc<Registry>) -> Result<Self> {
        let client = RemoteClient::new(&config)?;
        Ok(Self {
            probe: Arc::new(client.clone()),
            config,
            registry,
            client,
            first_poll: Duration::from_secs(1),
        })
    }

    /// Replace the size probe used for change checks
    pub fn with_probe(mut self, probe: Arc<dyn SizeProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// First poll interval while waiting for a concurrent update
    pub fn with_first_poll(mut self, interval: Duration) -> Self {
        self.first_poll = interval;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn update(&self, name: &str, options: &UpdateOptions) -> Result<UpdateOutcome> {
        let resource = Arc::clone(self.registry.get(name)?);
        if let Some(variable) = resource.missing_credential {
            return Err(IngestError::Config(format!(
                "{} requires {} to be set",
                name, variable
            )));
        }

        let dir = &self.config.dump_dir;
        let dumps = resource.dump_paths(dir);
        self.await_sentinels(name, &dumps, options.wait).await?;

        let mut log = StatLog::load(dir, name, &dumps)?;
        if !options.force {
            if log.sufficiently_recent(self.config.min_update_freq()) {
                info!(resource = %name, "Fetched recently, skipping check");
                return Ok(UpdateOutcome::UpToDate);
            }
            match self.check(&mut log, &resource).await {
                ChangeCheckOutcome::Unchanged => {
                    info!(resource = %name, "Remote unchanged");
                    return Ok(UpdateOutcome::UpToDate);
                },
                ChangeCheckOutcome::Changed => {},
                ChangeCheckOutcome::Failed(e) => {
                    if let Some(reason) = self.on_check_failure(name, e, &log, options).await? {
                        return Ok(UpdateOutcome::Skipped { reason });
                    }
                },
            }
        }

        let staging = Staging::claim(dir, &resource.dump_names(), self.config.concurrent_update_dead())?;
        match self.fetch_all(&resource, staging).await {
            Ok((files, sizes)) => {
                log.mark_fetched(sizes)?;
                info!(resource = %name, files = files.len(), "Update complete");
                Ok(UpdateOutcome::Updated { files })
            },
            Err(e) => {
                error!(resource = %name, error = %e, "Update failed");
                if !e.is_transient() {
                    if let Err(reset) = log.reset() {
                        warn!(resource = %name, error = %reset, "Failed to reset StatLog");
                    }
                }
                Err(e)
            },
        }
    }

    /// Update each resource independently
    pub async fn update_many(
        &self,
        names: &[String],
        options: &UpdateOptions,
    ) -> Vec<(String, Result<UpdateOutcome>)> {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let result = self.update(name, options).await;
            if let Err(e) = &result {
                warn!(resource = %name, error = %e, "Resource not updated");
            }
            results.push((name.clone(), result));
        }
        results
    }

    pub fn status(&self, name: &str) -> Result<ResourceStatus> {
        let resource = self.registry.get(name)?;
        let dir = &self.config.dump_dir;
        let dumps = resource.dump_paths(dir);
        let log = StatLog::load(dir, name, &dumps)?;
        let updating = live_sentinel(&dumps, self.config.concurrent_update_dead())?.is_some();
        Ok(ResourceStatus {
            name: name.to_string(),
            available: resource.is_available(dir),
            dumps,
            modified: log.modified,
            checked: log.checked,
            changed: log.changed,
            updating,
        })
    }

    async fn check(&self, log: &mut StatLog, resource: &ResourceDescriptor) -> ChangeCheckOutcome {
        let urls = resource.urls();
        match log
            .has_changed(self.probe.as_ref(), &urls, self.config.min_check_freq())
            .await
        {
            Ok(true) => ChangeCheckOutcome::Changed,
            Ok(false) => ChangeCheckOutcome::Unchanged,
            Err(e) => ChangeCheckOutcome::Failed(e),
        }
    }

    /// `Ok(None)` to proceed with the update, `Ok(Some(reason))` to skip it
    async fn on_check_failure(
        &self,
        name: &str,
        err: IngestError,
        log: &StatLog,
        options: &UpdateOptions,
    ) -> Result<Option<String>> {
        warn!(resource = %name, error = %err, policy = ?options.on_check_failure, "Change check failed");
        match &options.on_check_failure {
            CheckFailurePolicy::Skip => Ok(Some(format!("change check failed: {}", err))),
            CheckFailurePolicy::Force => Ok(None),
            CheckFailurePolicy::ForceFallback => {
                let period = i64::try_from(self.config.fallback_period().as_secs()).unwrap_or(i64::MAX);
                let stale = log
                    .modified
                    .map_or(true, |modified| statlog::now() - modified >= period);
                if stale {
                    Ok(None)
                } else {
                    Ok(Some(format!("change check failed and last fetch is recent: {}", err)))
                }
            },
            CheckFailurePolicy::Ask(prompt) => {
                let prompt = Arc::clone(prompt);
                let resource = name.to_string();
                let (proceed, err) = tokio::task::spawn_blocking(move || {
                    let proceed = prompt(&resource, &err);
                    (proceed, err)
                })
                .await
                .map_err(|e| IngestError::Pipeline(format!("prompt failed: {}", e)))?;
                if proceed {
                    Ok(None)
                } else {
                    Ok(Some(format!("declined after failed change check: {}", err)))
                }
            },
        }
    }

    async fn await_sentinels(&self, name: &str, dumps: &[PathBuf], wait: WaitPolicy) -> Result<()> {
        let dead = self.config.concurrent_update_dead();
        let cap = self.config.concurrent_update_wait_interval();
        let mut delay = self.first_poll.min(cap);
        loop {
            let Some(sentinel) = live_sentinel(dumps, dead)? else {
                return Ok(());
            };
            if wait == WaitPolicy::FailFast {
                return Err(IngestError::ConcurrentUpdateInProgress {
                    resource: name.to_string(),
                    sentinel: sentinel.display().to_string(),
                });
            }
            info!(resource = %name, sentinel = %sentinel.display(), ?delay, "Waiting for concurrent update");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(cap);
        }
    }

    /// Run every recipe into `staging`, then commit; returns the committed
    /// files and the sizes seen per URL
    async fn fetch_all(
        &self,
        resource: &ResourceDescriptor,
        mut staging: Staging,
    ) -> Result<(Vec<PathBuf>, Vec<(String, Option<u64>)>)> {
        let mut sizes = Vec::with_capacity(resource.recipes.len());
        for recipe in &resource.recipes {
            let url = recipe.url().to_string();
            let fetched = self
                .client
                .fetch(&url, run_recipe(recipe.clone(), staging, self.config.spill_threshold_bytes))
                .await
                .map_err(|e| as_download_failure(&url, e))?;
            staging = fetched.value;
            sizes.push((url, fetched.size));
        }
        let files = staging.commit()?;
        Ok((files, sizes))
    }
}

/// Blocking consumer running one recipe; hands the staging back on success
fn run_recipe(
    recipe: Recipe,
    mut staging: Staging,
    spill_threshold: usize,
) -> impl FnOnce(crate::pipeline::Stream<'_>) -> Result<Staging> + Send + 'static {
    move |stream| {
        Executor::new(&mut staging, spill_threshold).run(stream, &recipe)?;
        Ok(staging)
    }
}

fn as_download_failure(url: &str, err: IngestError) -> IngestError {
    match err {
        IngestError::TransientNetwork { .. }
        | IngestError::DownloadFailed { .. }
        | IngestError::ConcurrentUpdateInProgress { .. } => err,
        other => IngestError::DownloadFailed {
            address: address_key(url).to_string(),
            message: other.to_string(),
        },
    }
}

//! Ingestion configuration
//!
//! Paths, throttles and credentials for keeping local dumps in sync. Built
//! once at process start and passed by reference to every component.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IngestError, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Default directory holding the local dump copies.
pub const DEFAULT_DUMP_DIR: &str = "./data/dumps";

/// Skip any remote check if the dump was fetched within this window (1 day).
pub const DEFAULT_MIN_UPDATE_FREQ_SECS: u64 = 24 * 3600;

/// Skip a remote size probe if one ran within this window (4 hours).
pub const DEFAULT_MIN_CHECK_FREQ_SECS: u64 = 4 * 3600;

/// A `.tmp` sentinel older than this belongs to a dead update (2 hours).
pub const DEFAULT_CONCURRENT_UPDATE_DEAD_SECS: u64 = 2 * 3600;

/// Upper bound of the poll interval while waiting for a concurrent update.
pub const DEFAULT_CONCURRENT_UPDATE_WAIT_SECS: u64 = 60;

/// ForceFallback policy: update anyway when the dump is older than this (30 days).
pub const DEFAULT_FALLBACK_PERIOD_SECS: u64 = 30 * 24 * 3600;

/// Merge buffers stay in memory up to this size, then spill to disk (64 MiB).
pub const DEFAULT_SPILL_THRESHOLD_BYTES: usize = 64 * 1024 * 1024;

/// Default HTTP timeout for probes and downloads (1 hour; dumps are large).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 3600;

/// Default number of attempts for a remote size probe.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// MeSH release used in the dump URLs when none is configured.
pub const DEFAULT_MESH_YEAR: u16 = 2025;

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub dump_dir: PathBuf,
    /// Optional directory with `<resource>.cui.tsv` concordance tables
    pub cui_dir: Option<PathBuf>,
    pub min_update_freq_secs: u64,
    pub min_check_freq_secs: u64,
    pub concurrent_update_dead_secs: u64,
    pub concurrent_update_wait_secs: u64,
    pub fallback_period_secs: u64,
    pub spill_threshold_bytes: usize,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub user_agent: String,
    pub mesh_year: u16,
    /// UMLS license key, required for RxNorm downloads
    #[serde(skip_serializing)]
    pub umls_api_key: Option<String>,
    /// First Base36 OID issued by aggregation runs
    pub oid_start: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from(DEFAULT_DUMP_DIR),
            cui_dir: None,
            min_update_freq_secs: DEFAULT_MIN_UPDATE_FREQ_SECS,
            min_check_freq_secs: DEFAULT_MIN_CHECK_FREQ_SECS,
            concurrent_update_dead_secs: DEFAULT_CONCURRENT_UPDATE_DEAD_SECS,
            concurrent_update_wait_secs: DEFAULT_CONCURRENT_UPDATE_WAIT_SECS,
            fallback_period_secs: DEFAULT_FALLBACK_PERIOD_SECS,
            spill_threshold_bytes: DEFAULT_SPILL_THRESHOLD_BYTES,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: format!("termhub-ingest/{}", env!("CARGO_PKG_VERSION")),
            mesh_year: DEFAULT_MESH_YEAR,
            umls_api_key: None,
            oid_start: 0,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment (and `.env`) on top of the defaults
    ///
    /// Variables: `TERMHUB_DUMP_DIR`, `TERMHUB_CUI_DIR`,
    /// `TERMHUB_MIN_UPDATE_FREQ`, `TERMHUB_MIN_CHECK_FREQ`,
    /// `TERMHUB_CONCURRENT_UPDATE_DEAD`, `TERMHUB_CONCURRENT_UPDATE_WAIT`,
    /// `TERMHUB_FALLBACK_PERIOD`, `TERMHUB_SPILL_THRESHOLD`,
    /// `TERMHUB_HTTP_TIMEOUT`, `TERMHUB_MAX_RETRIES`, `TERMHUB_USER_AGENT`,
    /// `TERMHUB_MESH_YEAR`, `UMLS_API_KEY`, `TERMHUB_OID_START`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            dump_dir: env_or("TERMHUB_DUMP_DIR", defaults.dump_dir),
            cui_dir: std::env::var("TERMHUB_CUI_DIR").ok().map(PathBuf::from),
            min_update_freq_secs: parse_env("TERMHUB_MIN_UPDATE_FREQ", defaults.min_update_freq_secs)?,
            min_check_freq_secs: parse_env("TERMHUB_MIN_CHECK_FREQ", defaults.min_check_freq_secs)?,
            concurrent_update_dead_secs: parse_env(
                "TERMHUB_CONCURRENT_UPDATE_DEAD",
                defaults.concurrent_update_dead_secs,
            )?,
            concurrent_update_wait_secs: parse_env(
                "TERMHUB_CONCURRENT_UPDATE_WAIT",
                defaults.concurrent_update_wait_secs,
            )?,
            fallback_period_secs: parse_env("TERMHUB_FALLBACK_PERIOD", defaults.fallback_period_secs)?,
            spill_threshold_bytes: parse_env(
                "TERMHUB_SPILL_THRESHOLD",
                defaults.spill_threshold_bytes,
            )?,
            http_timeout_secs: parse_env("TERMHUB_HTTP_TIMEOUT", defaults.http_timeout_secs)?,
            max_retries: parse_env("TERMHUB_MAX_RETRIES", defaults.max_retries)?,
            user_agent: std::env::var("TERMHUB_USER_AGENT").unwrap_or(defaults.user_agent),
            mesh_year: parse_env("TERMHUB_MESH_YEAR", defaults.mesh_year)?,
            umls_api_key: std::env::var("UMLS_API_KEY").ok().filter(|k| !k.is_empty()),
            oid_start: parse_env("TERMHUB_OID_START", defaults.oid_start)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dump_dir.as_os_str().is_empty() {
            return Err(IngestError::Config("dump directory cannot be empty".to_string()));
        }
        if self.max_retries == 0 {
            return Err(IngestError::Config("max_retries must be at least 1".to_string()));
        }
        if self.concurrent_update_wait_secs == 0 {
            return Err(IngestError::Config(
                "concurrent update wait interval must be greater than 0".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(IngestError::Config("HTTP timeout must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn min_update_freq(&self) -> Duration {
        Duration::from_secs(self.min_update_freq_secs)
    }

    pub fn min_check_freq(&self) -> Duration {
        Duration::from_secs(self.min_check_freq_secs)
    }

    pub fn concurrent_update_dead(&self) -> Duration {
        Duration::from_secs(self.concurrent_update_dead_secs)
    }

    pub fn concurrent_update_wait_interval(&self) -> Duration {
        Duration::from_secs(self.concurrent_update_wait_secs)
    }

    pub fn fallback_period(&self) -> Duration {
        Duration::from_secs(self.fallback_period_secs)
    }

    /// Configuration rooted at a scratch directory, for tests and tooling
    pub fn with_dump_dir(dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            dump_dir: dump_dir.into(),
            ..Self::default()
        }
    }
}

fn env_or(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| IngestError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

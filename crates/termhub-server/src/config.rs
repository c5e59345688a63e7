//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Default directory for job artifacts.
pub const DEFAULT_ARTIFACT_DIR: &str = "./jobs";

/// Artifacts untouched for this long are reaped (35 days).
pub const DEFAULT_REAP_AFTER_SECS: u64 = 35 * 24 * 60 * 60;

/// A building marker older than this belongs to a crashed build (6 hours).
pub const DEFAULT_STALE_BUILD_SECS: u64 = 6 * 60 * 60;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub jobs: JobsConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Job cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub artifact_dir: PathBuf,
    pub reap_after_secs: u64,
    pub stale_build_secs: u64,
    /// Worker pool size; defaults to the number of resources plus one
    pub workers: Option<usize>,
}

impl JobsConfig {
    pub fn reap_after(&self) -> Duration {
        Duration::from_secs(self.reap_after_secs)
    }

    pub fn stale_build(&self) -> Duration {
        Duration::from_secs(self.stale_build_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("TERMHUB_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_parse("TERMHUB_PORT").unwrap_or(DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parse("TERMHUB_SHUTDOWN_TIMEOUT")
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_parse("CORS_ALLOW_CREDENTIALS").unwrap_or(true),
            },
            jobs: JobsConfig {
                artifact_dir: std::env::var("TERMHUB_ARTIFACT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_ARTIFACT_DIR)),
                reap_after_secs: env_parse("TERMHUB_REAP_AFTER").unwrap_or(DEFAULT_REAP_AFTER_SECS),
                stale_build_secs: env_parse("TERMHUB_STALE_BUILD")
                    .unwrap_or(DEFAULT_STALE_BUILD_SECS),
                workers: env_parse("TERMHUB_WORKERS"),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.jobs.artifact_dir.as_os_str().is_empty() {
            anyhow::bail!("Artifact directory cannot be empty");
        }

        if self.jobs.workers == Some(0) {
            anyhow::bail!("Worker count must be greater than 0");
        }

        if self.jobs.stale_build_secs == 0 {
            anyhow::bail!("Stale build threshold must be greater than 0");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            jobs: JobsConfig {
                artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
                reap_after_secs: DEFAULT_REAP_AFTER_SECS,
                stale_build_secs: DEFAULT_STALE_BUILD_SECS,
                workers: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.jobs.reap_after(), Duration::from_secs(35 * 86_400));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.jobs.workers = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}

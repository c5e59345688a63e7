//! Termhub Ingest Library
//!
//! Keeps local copies of biomedical terminology dumps fresh and aggregates
//! them into one normalized term table.
//!
//! # Components
//!
//! - **Remote sync**: [`update::Updater`] checks [`statlog::StatLog`]s,
//!   downloads over HTTP or FTP ([`remote`]) and extracts through declarative
//!   [`pipeline`] recipes
//! - **Readers**: [`records`] turns dump files into concepts (canonical TSV,
//!   OBO, streaming XML, delimited columns, taxonomy dmp)
//! - **Aggregation**: [`aggregate::Aggregator`] writes the term table with
//!   cross-lookup deduplication and statistics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use termhub_ingest::aggregate::{AggregateOptions, Aggregator};
//! use termhub_ingest::config::IngestConfig;
//! use termhub_ingest::resources::Registry;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Arc::new(IngestConfig::from_env()?);
//! let registry = Arc::new(Registry::builtin(&config)?);
//! let aggregator = Aggregator::new(config, registry);
//!
//! let options = AggregateOptions {
//!     resources: vec!["mesh".to_string(), "ctd_chem".to_string()],
//!     skip_cross_lookup: true,
//!     ..AggregateOptions::default()
//! };
//! let report = aggregator.run(&options, &mut std::io::stdout().lock())?;
//! eprintln!("{} rows", report.rows_written);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod aggregate;
pub mod base36;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod records;
pub mod remote;
pub mod resources;
pub mod statlog;
pub mod update;

pub use error::{IngestError, Result};

//! termhub-ingest - Dump synchronization and term list aggregation

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use termhub_common::logging::{init_logging, LogConfig, LogLevel};
use termhub_ingest::aggregate::{AggregateOptions, Aggregator, Postfilter};
use termhub_ingest::config::IngestConfig;
use termhub_ingest::error::IngestError;
use termhub_ingest::records::RenamingRules;
use termhub_ingest::resources::Registry;
use termhub_ingest::update::{CheckFailurePolicy, UpdateOptions, UpdateOutcome, Updater, WaitPolicy};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "termhub-ingest")]
#[command(author, version, about = "Terminology dump synchronization and aggregation")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Dump directory (overrides TERMHUB_DUMP_DIR)
    #[arg(long, global = true)]
    dump_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch resources whose remote changed
    Update {
        /// Resources to update (default: all)
        resources: Vec<String>,

        /// Skip the freshness throttles and the change check
        #[arg(short, long)]
        force: bool,

        /// What to do when the change check fails
        #[arg(long, value_enum, default_value_t = OnCheckFailure::Ask)]
        on_check_failure: OnCheckFailure,

        /// Wait for concurrent updates instead of failing
        #[arg(long)]
        wait: bool,
    },

    /// Show local sync state
    Status {
        /// Resources to show (default: all)
        resources: Vec<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Aggregate resources into one term table
    Aggregate {
        /// Resources to aggregate
        #[arg(required = true)]
        resources: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Drop pairs a resource shares with its reference resource
        #[arg(long)]
        skip_cross_lookup: bool,

        /// Write ids as URIs
        #[arg(long)]
        uri_ids: bool,

        /// Key rows by generated OIDs instead of CUIs
        #[arg(long)]
        oid: bool,

        /// Term postfilters (short_terms, numeric_terms)
        #[arg(long = "postfilter")]
        postfilters: Vec<Postfilter>,

        /// Resource label renaming, FROM=TO (FROM may be a regex)
        #[arg(long = "rename-resource", value_parser = parse_rule)]
        rename_resource: Vec<(String, String)>,

        /// Entity type renaming, FROM=TO (FROM may be a regex)
        #[arg(long = "rename-entity", value_parser = parse_rule)]
        rename_entity: Vec<(String, String)>,

        /// Write statistics as JSON to this file
        #[arg(long)]
        stats: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OnCheckFailure {
    Ask,
    Skip,
    Force,
    Fallback,
}

fn parse_rule(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .ok_or_else(|| format!("expected FROM=TO, got '{}'", s))
}

fn check_failure_policy(choice: OnCheckFailure) -> CheckFailurePolicy {
    match choice {
        OnCheckFailure::Ask => CheckFailurePolicy::Ask(Arc::new(|resource: &str, err: &IngestError| {
            inquire::Confirm::new(&format!(
                "Could not check {} for changes ({}). Update anyway?",
                resource, err
            ))
            .with_default(false)
            .prompt()
            .unwrap_or(false)
        })),
        OnCheckFailure::Skip => CheckFailurePolicy::Skip,
        OnCheckFailure::Force => CheckFailurePolicy::Force,
        OnCheckFailure::Fallback => CheckFailurePolicy::ForceFallback,
    }
}

fn selected(requested: Vec<String>, registry: &Registry) -> Vec<String> {
    if requested.is_empty() {
        registry.names().into_iter().map(String::from).collect()
    } else {
        requested
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("termhub-ingest")
        .build()
        .merge_env()?;
    init_logging(&log_config)?;

    let mut config = IngestConfig::from_env().context("Failed to load configuration")?;
    if let Some(dir) = cli.dump_dir {
        config.dump_dir = dir;
    }
    config.validate()?;
    let config = Arc::new(config);
    let registry = Arc::new(Registry::builtin(&config)?);

    match cli.command {
        Command::Update {
            resources,
            force,
            on_check_failure,
            wait,
        } => {
            let updater = Updater::new(Arc::clone(&config), Arc::clone(&registry))?;
            let options = UpdateOptions {
                force,
                on_check_failure: check_failure_policy(on_check_failure),
                wait: if wait { WaitPolicy::Wait } else { WaitPolicy::FailFast },
            };
            let names = selected(resources, &registry);
            let mut failures = 0;
            for (name, result) in updater.update_many(&names, &options).await {
                match result {
                    Ok(UpdateOutcome::UpToDate) => println!("{:<20} up to date", name),
                    Ok(UpdateOutcome::Updated { files }) => {
                        println!("{:<20} updated ({} files)", name, files.len())
                    },
                    Ok(UpdateOutcome::Skipped { reason }) => {
                        println!("{:<20} skipped: {}", name, reason)
                    },
                    Err(e) => {
                        failures += 1;
                        println!("{:<20} FAILED: {}", name, e);
                    },
                }
            }
            if failures > 0 {
                bail!("{} resource(s) failed to update", failures);
            }
        },
        Command::Status { resources, json } => {
            let updater = Updater::new(Arc::clone(&config), Arc::clone(&registry))?;
            let mut statuses = Vec::new();
            for name in selected(resources, &registry) {
                statuses.push(updater.status(&name)?);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                for status in statuses {
                    let fetched = status
                        .modified
                        .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
                        .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
                    println!(
                        "{:<20} {:<9} fetched {}{}{}",
                        status.name,
                        if status.available { "available" } else { "missing" },
                        fetched,
                        if status.changed { ", remote changed" } else { "" },
                        if status.updating { ", update in progress" } else { "" },
                    );
                }
            }
        },
        Command::Aggregate {
            resources,
            output,
            skip_cross_lookup,
            uri_ids,
            oid,
            postfilters,
            rename_resource,
            rename_entity,
            stats,
        } => {
            let options = AggregateOptions {
                resources,
                skip_cross_lookup,
                uri_ids,
                oid_schema: oid,
                postfilters,
                renaming: RenamingRules {
                    resource: rename_resource,
                    entity_type: rename_entity,
                },
            };
            let aggregator = Aggregator::new(Arc::clone(&config), Arc::clone(&registry));
            aggregator.check_available(&options.resources)?;

            let report = match &output {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    aggregator.run(&options, &mut BufWriter::new(file))?
                },
                None => aggregator.run(&options, &mut BufWriter::new(io::stdout().lock()))?,
            };
            info!(
                rows = report.rows_written,
                failed = report.failed.len(),
                "Aggregation complete"
            );
            if let Some(path) = stats {
                let mut file = File::create(&path)?;
                serde_json::to_writer_pretty(&mut file, &report)?;
                file.write_all(b"\n")?;
            }
            for failed in &report.failed {
                eprintln!("{}: {}", failed.resource, failed.message);
            }
        },
    }

    Ok(())
}

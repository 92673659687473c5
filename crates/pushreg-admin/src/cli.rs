use crate::config::AdminConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pushreg_registry::{
    BackfillJob, BackfillOptions, DedupeEngine, DedupeOptions, MemoryDeviceStore, PiiCodec,
    RegistryMetrics,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pushreg-admin")]
#[command(about = "pushreg device registry maintenance", long_about = None)]
pub struct Cli {
    /// Config file (.toml or .json).
    #[arg(short, long, env = "PUSHREG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Device snapshot to operate on; overrides the config file.
    #[arg(short, long, env = "PUSHREG_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Merge device rows that share a token hash.
    Dedupe {
        /// Write merges and deletions.
        #[arg(long)]
        apply: bool,
        /// Only report; takes precedence over --apply.
        #[arg(long)]
        dry_run: bool,
        #[arg(long, value_parser = parse_positive)]
        page_size: Option<usize>,
    },
    /// Compute token hashes for rows that predate hashing.
    Backfill {
        #[arg(long)]
        dry_run: bool,
        #[arg(long, value_parser = parse_positive)]
        chunk_size: Option<usize>,
    },
}

fn parse_positive(value: &str) -> std::result::Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected a positive integer, got '{}'", value)),
    }
}

#[derive(Serialize)]
struct Report<T: Serialize> {
    command: &'static str,
    summary: T,
    metrics: pushreg_registry::MetricsSnapshot,
}

/// Process exit code for a run with `failures` failed operations.
pub fn exit_code(failures: u64) -> i32 {
    if failures > 0 {
        1
    } else {
        0
    }
}

impl Command {
    /// Dedupe options for this invocation; a dry-run flag always wins.
    pub fn dedupe_options(&self, config: &AdminConfig) -> Option<DedupeOptions> {
        match self {
            Command::Dedupe {
                apply,
                dry_run,
                page_size,
            } => Some(DedupeOptions {
                apply: *apply && !*dry_run,
                page_size: config.dedupe_page_size(*page_size),
            }),
            _ => None,
        }
    }

    pub fn backfill_options(&self, config: &AdminConfig) -> Option<BackfillOptions> {
        match self {
            Command::Backfill {
                dry_run,
                chunk_size,
            } => Some(BackfillOptions {
                chunk_size: config.backfill_chunk_size(*chunk_size),
                dry_run: *dry_run,
            }),
            _ => None,
        }
    }
}

impl Cli {
    /// Execute the subcommand and return the process exit code.
    pub async fn run(self) -> Result<i32> {
        let config = AdminConfig::load(self.config.as_deref())?;
        let snapshot = self
            .snapshot
            .clone()
            .unwrap_or_else(|| config.snapshot.clone());
        let store = Arc::new(
            MemoryDeviceStore::load_json(&snapshot)
                .await
                .with_context(|| format!("loading device snapshot {}", snapshot.display()))?,
        );
        let metrics = Arc::new(RegistryMetrics::new());
        info!(snapshot = %snapshot.display(), rows = store.len().await, "Loaded device snapshot");

        if let Some(options) = self.command.dedupe_options(&config) {
            let summary = DedupeEngine::new(store.clone(), metrics.clone())
                .run(&options)
                .await;
            if options.apply && !summary.aborted {
                save(&store, &snapshot).await?;
            }
            let code = exit_code(summary.failures);
            print_report("dedupe", summary, &metrics)?;
            return Ok(code);
        }

        if let Some(options) = self.command.backfill_options(&config) {
            let codec = Arc::new(PiiCodec::from_env().context("loading PII keys")?);
            let summary = BackfillJob::new(store.clone(), codec, metrics.clone())
                .run(&options)
                .await;
            if !options.dry_run && !summary.aborted {
                save(&store, &snapshot).await?;
            }
            let code = exit_code(summary.failures);
            print_report("backfill", summary, &metrics)?;
            return Ok(code);
        }

        Ok(0)
    }
}

async fn save(store: &MemoryDeviceStore, path: &Path) -> Result<()> {
    store
        .save_json(path)
        .await
        .with_context(|| format!("writing device snapshot {}", path.display()))
}

fn print_report<T: Serialize>(
    command: &'static str,
    summary: T,
    metrics: &RegistryMetrics,
) -> Result<()> {
    let report = Report {
        command,
        summary,
        metrics: metrics.snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

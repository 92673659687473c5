//! One-shot migration that computes token hashes for legacy device rows.

use crate::crypto::PiiCodec;
use crate::error::Result;
use crate::metrics::RegistryMetrics;
use crate::record::{CreatedCursor, DevicePatch, DeviceRecord, TokenHash};
use crate::store::DeviceStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Rows requested per page when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// How a backfill run behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillOptions {
    /// Rows per page fetch.
    pub chunk_size: usize,
    /// Compute and log hashes without writing them.
    pub dry_run: bool,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            dry_run: false,
        }
    }
}

/// Result of one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillSummary {
    /// Rows examined.
    pub processed: u64,
    /// Rows hashed (or that would be, in dry-run).
    pub updated: u64,
    /// Rows with nothing to hash.
    pub skipped: u64,
    /// Page fetch and per-row failures.
    pub failures: u64,
    /// True if no writes were attempted.
    pub dry_run: bool,
    /// True if a page fetch failed and the run stopped early.
    pub aborted: bool,
}

impl BackfillSummary {
    /// True if the run finished without any failure.
    pub fn is_success(&self) -> bool {
        self.failures == 0
    }
}

enum RowOutcome {
    Updated,
    Skipped,
}

/// Walks rows with a null hash in creation order and fills the hash in.
pub struct BackfillJob {
    store: Arc<dyn DeviceStore>,
    codec: Arc<PiiCodec>,
    metrics: Arc<RegistryMetrics>,
}

impl BackfillJob {
    /// Create a job over `store`.
    pub fn new(
        store: Arc<dyn DeviceStore>,
        codec: Arc<PiiCodec>,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            store,
            codec,
            metrics,
        }
    }

    /// Run the migration to completion. Per-row failures never stop the run.
    pub async fn run(&self, options: &BackfillOptions) -> BackfillSummary {
        let chunk_size = options.chunk_size.max(1);
        let mut summary = BackfillSummary {
            dry_run: options.dry_run,
            ..Default::default()
        };
        let mut cursor: Option<CreatedCursor> = None;

        loop {
            let rows = match self.store.unhashed_page(cursor.as_ref(), chunk_size).await {
                Ok(rows) => rows,
                Err(e) => {
                    error!(error = %e, "Failed to read devices for backfill");
                    summary.failures += 1;
                    summary.aborted = true;
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }
            let page_len = rows.len();
            cursor = rows.last().map(DeviceRecord::created_cursor);

            for row in &rows {
                summary.processed += 1;
                match self.backfill_row(row, options.dry_run).await {
                    Ok(RowOutcome::Updated) => summary.updated += 1,
                    Ok(RowOutcome::Skipped) => summary.skipped += 1,
                    Err(e) => {
                        error!(device_id = %row.id, error = %e, "Failed to backfill device");
                        summary.failures += 1;
                    }
                }
            }

            if page_len < chunk_size {
                break;
            }
        }

        info!(
            processed = summary.processed,
            updated = summary.updated,
            skipped = summary.skipped,
            failures = summary.failures,
            dry_run = summary.dry_run,
            "Backfill finished"
        );
        summary
    }

    async fn backfill_row(&self, row: &DeviceRecord, dry_run: bool) -> Result<RowOutcome> {
        if row.token_hash.is_some() {
            return Ok(RowOutcome::Skipped);
        }
        if row.token.is_none() {
            warn!(device_id = %row.id, "Skipping device without token");
            return Ok(RowOutcome::Skipped);
        }

        let plain = self.codec.decrypt(row.token.as_ref())?;
        if plain.is_empty() {
            warn!(device_id = %row.id, "Skipping device: decryption yielded empty token");
            return Ok(RowOutcome::Skipped);
        }
        let hash = self.codec.hash(&plain)?;

        if dry_run {
            info!(dry_run = true, device_id = %row.id, "Would set token hash");
            return Ok(RowOutcome::Updated);
        }
        self.write_hash(row, hash).await?;
        Ok(RowOutcome::Updated)
    }

    async fn write_hash(&self, row: &DeviceRecord, hash: TokenHash) -> Result<()> {
        let patch = DevicePatch {
            token_hash: Some(hash),
            ..Default::default()
        };
        if !self.store.update(&row.id, &patch).await? {
            return Err(crate::error::RegistryError::Storage(format!(
                "device {} disappeared before update",
                row.id
            )));
        }
        self.metrics.record_backfilled();
        Ok(())
    }
}

//! Keyset-paginated deduplication of device rows sharing a token hash.
//!
//! Rows are read in `(token_hash, id)` order, one page at a time. Groups that
//! may continue on the next page are carried over by [`GroupAccumulator`], so a
//! group is merged only once every row with its hash has been seen. Each closed
//! group collapses into one canonical survivor that absorbs the freshest
//! activity of the group.

use crate::grouping::GroupAccumulator;
use crate::metrics::RegistryMetrics;
use crate::record::{DeviceId, DevicePatch, DeviceRecord, HashCursor};
use crate::store::DeviceStore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Rows requested per page when nothing else is configured.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// How a dedupe run behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeOptions {
    /// Write merges and deletions; otherwise only count and log them.
    pub apply: bool,
    /// Rows per page fetch.
    pub page_size: usize,
}

impl Default for DedupeOptions {
    fn default() -> Self {
        Self {
            apply: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Result of one dedupe run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeSummary {
    /// Duplicate groups found.
    pub groups: u64,
    /// Groups whose canonical row was updated (or would be, in dry-run).
    pub merged: u64,
    /// Rows deleted (or that would be, in dry-run).
    pub deleted: u64,
    /// Page fetch and per-group mutation failures.
    pub failures: u64,
    /// True if no writes were attempted.
    pub dry_run: bool,
    /// Batches processed, including the final carry-over flush.
    pub batches: u64,
    /// Groups with more than one distinct owner.
    pub ambiguous: u64,
    /// True if a page fetch failed and the run stopped early.
    pub aborted: bool,
}

impl DedupeSummary {
    /// True if the run finished without any failure.
    pub fn is_success(&self) -> bool {
        self.failures == 0
    }
}

/// The writes that collapse one duplicate group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Surviving row
    pub canonical: DeviceId,
    /// Fields merged onto the survivor
    pub patch: DevicePatch,
    /// Rows to delete
    pub duplicates: Vec<DeviceId>,
    /// Distinct non-null owners seen in the group, in row order
    pub owners: Vec<String>,
}

impl MergePlan {
    /// True if the group names more than one owner.
    pub fn is_ambiguous(&self) -> bool {
        self.owners.len() > 1
    }
}

fn newest_first(a: &DeviceRecord, b: &DeviceRecord) -> Ordering {
    b.activity()
        .cmp(&a.activity())
        .then_with(|| a.id.cmp(&b.id))
}

/// Survivor: owned rows first, then most recent activity, then lowest id.
pub fn pick_canonical(group: &[DeviceRecord]) -> Option<&DeviceRecord> {
    group.iter().min_by(|a, b| {
        b.owner()
            .is_some()
            .cmp(&a.owner().is_some())
            .then_with(|| newest_first(a, b))
    })
}

/// Row with the most recent activity regardless of owner; lowest id on ties.
pub fn pick_latest(group: &[DeviceRecord]) -> Option<&DeviceRecord> {
    group.iter().min_by(|a, b| newest_first(a, b))
}

/// Computes the merge for a group of rows sharing one hash.
pub fn plan_merge(group: &[DeviceRecord]) -> Option<MergePlan> {
    let canonical = pick_canonical(group)?;
    let latest = pick_latest(group)?;

    let mut owners: Vec<String> = Vec::new();
    for user in group.iter().filter_map(DeviceRecord::owner) {
        if !owners.iter().any(|o| o == user) {
            owners.push(user.to_string());
        }
    }

    let user_id = match canonical.owner() {
        Some(_) => None,
        None => owners.first().cloned(),
    };
    let last_seen_at = latest
        .activity()
        .or(canonical.last_seen_at)
        .or(canonical.created_at);

    let patch = DevicePatch {
        class_id: Some(latest.class_id.clone()),
        user_id,
        token: latest.token.clone(),
        token_hash: None,
        last_seen_at: Some(last_seen_at),
    };
    let duplicates = group
        .iter()
        .filter(|r| r.id != canonical.id)
        .map(|r| r.id.clone())
        .collect();

    Some(MergePlan {
        canonical: canonical.id.clone(),
        patch,
        duplicates,
        owners,
    })
}

struct GroupOutcome {
    merged: u64,
    deleted: u64,
    failed: bool,
}

impl GroupOutcome {
    fn merged(deleted: u64) -> Self {
        Self {
            merged: 1,
            deleted,
            failed: false,
        }
    }

    fn failed(merged: u64) -> Self {
        Self {
            merged,
            deleted: 0,
            failed: true,
        }
    }
}

#[derive(Debug, Default)]
struct BatchStats {
    groups: u64,
    merged: u64,
    deleted: u64,
}

/// Batch job that collapses rows sharing a token hash.
pub struct DedupeEngine {
    store: Arc<dyn DeviceStore>,
    metrics: Arc<RegistryMetrics>,
}

impl DedupeEngine {
    /// Create an engine over `store`, reporting into `metrics`.
    pub fn new(store: Arc<dyn DeviceStore>, metrics: Arc<RegistryMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Run one full pass. Pages are consumed strictly one at a time.
    pub async fn run(&self, options: &DedupeOptions) -> DedupeSummary {
        let page_size = options.page_size.max(1);
        let mut summary = DedupeSummary {
            dry_run: !options.apply,
            ..Default::default()
        };
        let mut cursor: Option<HashCursor> = None;
        let mut accumulator = GroupAccumulator::new();

        loop {
            let page = match self.store.hashed_page(cursor.as_ref(), page_size).await {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, "Failed to read devices for dedupe");
                    summary.failures += 1;
                    summary.aborted = true;
                    log_summary(&summary);
                    return summary;
                }
            };
            if page.is_empty() {
                break;
            }

            summary.batches += 1;
            let full = page.len() == page_size;
            if let Some(last) = page.last().and_then(DeviceRecord::hash_cursor) {
                cursor = Some(last);
            }

            let groups = accumulator.push_page(page, full);
            let batch = self.process_groups(groups, options.apply, &mut summary).await;
            log_batch(summary.batches, &batch, &summary);

            if !full {
                break;
            }
        }

        let groups = accumulator.finish();
        if !groups.is_empty() {
            summary.batches += 1;
            let batch = self.process_groups(groups, options.apply, &mut summary).await;
            log_batch(summary.batches, &batch, &summary);
        }

        log_summary(&summary);
        summary
    }

    async fn process_groups(
        &self,
        groups: Vec<Vec<DeviceRecord>>,
        apply: bool,
        summary: &mut DedupeSummary,
    ) -> BatchStats {
        let mut batch = BatchStats::default();
        for group in groups {
            let Some(plan) = plan_merge(&group) else {
                continue;
            };
            summary.groups += 1;
            batch.groups += 1;

            if plan.is_ambiguous() {
                summary.ambiguous += 1;
                warn!(
                    token_hash = ?group[0].token_hash,
                    owners = ?plan.owners,
                    canonical = %plan.canonical,
                    "Duplicate group has multiple user ids"
                );
            }

            let (merged, deleted) = if apply {
                let outcome = self.apply_plan(&plan).await;
                if outcome.failed {
                    summary.failures += 1;
                }
                (outcome.merged, outcome.deleted)
            } else {
                info!(
                    dry_run = true,
                    canonical = %plan.canonical,
                    duplicates = ?plan.duplicates,
                    "Would merge duplicate group"
                );
                (1, plan.duplicates.len() as u64)
            };

            summary.merged += merged;
            summary.deleted += deleted;
            batch.merged += merged;
            batch.deleted += deleted;
        }
        batch
    }

    /// Update the survivor, then delete the rest. A failed delete still counts
    /// the merge but reports the failure.
    async fn apply_plan(&self, plan: &MergePlan) -> GroupOutcome {
        match self.store.update(&plan.canonical, &plan.patch).await {
            Ok(true) => {}
            Ok(false) => {
                error!(canonical = %plan.canonical, "Canonical device disappeared before update");
                return GroupOutcome::failed(0);
            }
            Err(e) => {
                error!(
                    canonical = %plan.canonical,
                    error = %e,
                    "Failed to update canonical device"
                );
                return GroupOutcome::failed(0);
            }
        }

        if plan.duplicates.is_empty() {
            return GroupOutcome::merged(0);
        }
        match self.store.delete_ids(&plan.duplicates).await {
            Ok(removed) => {
                let removed = removed as u64;
                self.metrics.record_deduplicated(removed);
                GroupOutcome::merged(removed)
            }
            Err(e) => {
                error!(
                    duplicates = ?plan.duplicates,
                    error = %e,
                    "Failed to delete duplicate devices"
                );
                GroupOutcome::failed(1)
            }
        }
    }
}

fn log_batch(batch_no: u64, batch: &BatchStats, summary: &DedupeSummary) {
    info!(
        batch = batch_no,
        groups_seen = batch.groups,
        deleted = batch.deleted,
        merged = batch.merged,
        total_deleted = summary.deleted,
        "Dedupe batch complete"
    );
}

fn log_summary(summary: &DedupeSummary) {
    info!(
        groups = summary.groups,
        merged = summary.merged,
        deleted = summary.deleted,
        failures = summary.failures,
        dry_run = summary.dry_run,
        batches = summary.batches,
        "Dedupe finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TokenHash;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(day: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 12, day, 0, 0, 0).unwrap())
    }

    fn row(
        id: &str,
        user: Option<&str>,
        class: &str,
        seen: Option<u32>,
        created: Option<u32>,
    ) -> DeviceRecord {
        DeviceRecord {
            id: DeviceId::from(id),
            class_id: Some(class.to_string()),
            user_id: user.map(str::to_string),
            token: None,
            token_hash: Some(TokenHash::from("mix")),
            created_at: created.and_then(ts),
            last_seen_at: seen.and_then(ts),
        }
    }

    #[test]
    fn canonical_prefers_owner_then_recency() {
        let group = vec![
            row("a", None, "c1", Some(20), Some(1)),
            row("b", Some("u1"), "c2", Some(5), Some(1)),
            row("c", Some("u2"), "c3", Some(10), Some(1)),
        ];
        assert_eq!(pick_canonical(&group).unwrap().id.as_str(), "c");
        assert_eq!(pick_latest(&group).unwrap().id.as_str(), "a");
    }

    #[test]
    fn merge_adopts_latest_activity() {
        let group = vec![
            row("a", None, "class-latest", Some(20), Some(1)),
            row("b", Some("u1"), "class-user", Some(5), Some(1)),
        ];
        let plan = plan_merge(&group).unwrap();
        assert_eq!(plan.canonical.as_str(), "b");
        assert_eq!(plan.duplicates, vec![DeviceId::from("a")]);
        assert_eq!(plan.patch.class_id, Some(Some("class-latest".to_string())));
        assert_eq!(plan.patch.last_seen_at, Some(ts(20)));
        assert_eq!(plan.patch.user_id, None);
        assert!(!plan.is_ambiguous());
    }

    #[test]
    fn activity_falls_back_to_created_at() {
        let group = vec![
            row("a", None, "c1", None, Some(15)),
            row("b", None, "c2", Some(10), Some(1)),
        ];
        assert_eq!(pick_latest(&group).unwrap().id.as_str(), "a");
        let plan = plan_merge(&group).unwrap();
        assert_eq!(plan.canonical.as_str(), "a");
        assert_eq!(plan.patch.last_seen_at, Some(ts(15)));
    }

    #[test]
    fn no_timestamps_lowest_id_wins() {
        let group = vec![
            row("dev-2", None, "c2", None, None),
            row("dev-1", None, "c1", None, None),
            row("dev-3", None, "c3", None, None),
        ];
        let plan = plan_merge(&group).unwrap();
        assert_eq!(plan.canonical.as_str(), "dev-1");
        assert_eq!(plan.patch.class_id, Some(Some("c1".to_string())));
        assert_eq!(plan.patch.last_seen_at, Some(None));
    }

    #[test]
    fn ambiguous_owners_are_reported() {
        let group = vec![
            row("mix-001", Some("user-old"), "class-old", Some(1), Some(1)),
            row("mix-002", Some("user-new"), "class-new", Some(25), Some(15)),
            row("mix-003", None, "class-latest", Some(26), Some(20)),
        ];
        let plan = plan_merge(&group).unwrap();
        assert!(plan.is_ambiguous());
        assert_eq!(plan.owners, vec!["user-old".to_string(), "user-new".to_string()]);
        assert_eq!(plan.canonical.as_str(), "mix-002");
        assert_eq!(plan.patch.class_id, Some(Some("class-latest".to_string())));
    }

    #[test]
    fn empty_user_id_is_not_an_owner() {
        let group = vec![
            row("e1", Some(""), "class-old", Some(1), Some(1)),
            row("e2", None, "class-new", Some(20), Some(1)),
        ];
        let plan = plan_merge(&group).unwrap();
        assert_eq!(plan.canonical.as_str(), "e2");
        assert!(plan.owners.is_empty());
        assert_eq!(plan.patch.user_id, None);
        assert_eq!(plan.duplicates, vec![DeviceId::from("e1")]);
    }

    #[test]
    fn empty_user_id_does_not_shadow_real_owner() {
        let group = vec![
            row("e1", Some(""), "class-a", Some(20), Some(1)),
            row("e2", Some("u1"), "class-b", Some(5), Some(1)),
        ];
        let plan = plan_merge(&group).unwrap();
        assert_eq!(plan.canonical.as_str(), "e2");
        assert_eq!(plan.owners, vec!["u1".to_string()]);
        assert!(!plan.is_ambiguous());
        assert_eq!(plan.patch.class_id, Some(Some("class-a".to_string())));
    }

    #[test]
    fn empty_group_has_no_plan() {
        assert!(plan_merge(&[]).is_none());
    }
}

//! Storage capability for the `devices` relation.
//!
//! The registry and both batch jobs only see [`DeviceStore`]; a SQL or hosted
//! backend implements it outside this crate. [`MemoryDeviceStore`] is the
//! in-process implementation used by tests and by the admin CLI's snapshot mode.

use crate::error::Result;
use crate::record::{CreatedCursor, DeviceId, DevicePatch, DeviceRecord, HashCursor, TokenHash};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// Ordered range queries, update-by-id and delete-by-id-set over device rows.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert a new row.
    async fn insert(&self, record: DeviceRecord) -> Result<()>;

    /// First row (lowest id) carrying `hash`, if any.
    async fn find_by_hash(&self, hash: &TokenHash) -> Result<Option<DeviceRecord>>;

    /// All rows registered for a class.
    async fn list_by_class(&self, class_id: &str) -> Result<Vec<DeviceRecord>>;

    /// All rows owned by a user.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<DeviceRecord>>;

    /// Remove all rows owned by a user, returning how many were removed.
    async fn delete_by_user(&self, user_id: &str) -> Result<usize>;

    /// Rows with a non-null hash, ordered by `(token_hash, id)` ascending,
    /// strictly after `after` when given, at most `limit` rows.
    async fn hashed_page(
        &self,
        after: Option<&HashCursor>,
        limit: usize,
    ) -> Result<Vec<DeviceRecord>>;

    /// Rows with a null hash, ordered by `(created_at, id)` ascending,
    /// strictly after `after` when given, at most `limit` rows.
    async fn unhashed_page(
        &self,
        after: Option<&CreatedCursor>,
        limit: usize,
    ) -> Result<Vec<DeviceRecord>>;

    /// Apply `patch` to the row with `id`. Returns false if no such row.
    async fn update(&self, id: &DeviceId, patch: &DevicePatch) -> Result<bool>;

    /// Delete every row whose id is in `ids`, returning how many were removed.
    async fn delete_ids(&self, ids: &[DeviceId]) -> Result<usize>;
}

/// In-memory device table keyed by id.
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    rows: RwLock<BTreeMap<DeviceId, DeviceRecord>>,
}

impl MemoryDeviceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with rows.
    pub fn from_records(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let rows = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            rows: RwLock::new(rows),
        }
    }

    /// Load a JSON array of rows.
    pub async fn load_json(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read(path).await?;
        let records: Vec<DeviceRecord> = serde_json::from_slice(&contents)?;
        debug!(path = %path.display(), rows = records.len(), "Loaded device snapshot");
        Ok(Self::from_records(records))
    }

    /// Write all rows as a JSON array. The file is replaced atomically.
    pub async fn save_json(&self, path: &Path) -> Result<()> {
        let records = self.records().await;
        let contents = serde_json::to_vec_pretty(&records)?;

        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        {
            let mut tmp_file = tokio::fs::File::create(&tmp_path).await?;
            tmp_file.write_all(&contents).await?;
            tmp_file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, path).await?;
        debug!(path = %path.display(), rows = records.len(), "Saved device snapshot");
        Ok(())
    }

    /// All rows in id order.
    pub async fn records(&self) -> Vec<DeviceRecord> {
        self.rows.read().await.values().cloned().collect()
    }

    /// Number of rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Is the table empty?
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Fetch one row by id.
    pub async fn get(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.rows.read().await.get(id).cloned()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn insert(&self, record: DeviceRecord) -> Result<()> {
        self.rows.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find_by_hash(&self, hash: &TokenHash) -> Result<Option<DeviceRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|r| r.token_hash.as_ref() == Some(hash))
            .cloned())
    }

    async fn list_by_class(&self, class_id: &str) -> Result<Vec<DeviceRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| r.class_id.as_deref() == Some(class_id))
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<DeviceRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<usize> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, r| r.user_id.as_deref() != Some(user_id));
        Ok(before - rows.len())
    }

    async fn hashed_page(
        &self,
        after: Option<&HashCursor>,
        limit: usize,
    ) -> Result<Vec<DeviceRecord>> {
        let rows = self.rows.read().await;
        let mut page: Vec<(HashCursor, &DeviceRecord)> = rows
            .values()
            .filter_map(|r| r.hash_cursor().map(|key| (key, r)))
            .filter(|(key, _)| after.map_or(true, |cursor| key > cursor))
            .collect();
        page.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(page.into_iter().take(limit).map(|(_, r)| r.clone()).collect())
    }

    async fn unhashed_page(
        &self,
        after: Option<&CreatedCursor>,
        limit: usize,
    ) -> Result<Vec<DeviceRecord>> {
        let rows = self.rows.read().await;
        let mut page: Vec<(CreatedCursor, &DeviceRecord)> = rows
            .values()
            .filter(|r| r.token_hash.is_none())
            .map(|r| (r.created_cursor(), r))
            .filter(|(key, _)| after.map_or(true, |cursor| key > cursor))
            .collect();
        page.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(page.into_iter().take(limit).map(|(_, r)| r.clone()).collect())
    }

    async fn update(&self, id: &DeviceId, patch: &DevicePatch) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(id) {
            Some(row) => {
                row.apply(patch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_ids(&self, ids: &[DeviceId]) -> Result<usize> {
        let removal: HashSet<&DeviceId> = ids.iter().collect();
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|id, _| !removal.contains(id));
        Ok(before - rows.len())
    }
}

//! Device registration, fan-out token reads, and per-user export/erasure.

use crate::crypto::{mask, PiiCodec, SealedToken};
use crate::error::Result;
use crate::metrics::RegistryMetrics;
use crate::record::{DeviceId, DevicePatch, DeviceRecord};
use crate::store::DeviceStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Time source, swappable in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What `register` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// No row carried this token; a new one was inserted.
    Created(DeviceId),
    /// An existing row was refreshed in place.
    Refreshed(DeviceId),
}

impl RegisterOutcome {
    /// Id of the affected row.
    pub fn id(&self) -> &DeviceId {
        match self {
            RegisterOutcome::Created(id) | RegisterOutcome::Refreshed(id) => id,
        }
    }
}

/// Display-safe view of a device for data-export requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceExport {
    /// Row id
    pub id: DeviceId,
    /// Class the device is registered for
    pub class_id: Option<String>,
    /// Token with all but the last 4 characters hidden
    pub token_masked: Option<String>,
    /// First registration time
    pub created_at: Option<DateTime<Utc>>,
    /// Most recent registration time
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// CRUD over device rows; tokens are sealed before they reach the store.
pub struct DeviceRegistry {
    store: Arc<dyn DeviceStore>,
    codec: Arc<PiiCodec>,
    metrics: Arc<RegistryMetrics>,
    clock: Clock,
}

impl DeviceRegistry {
    /// Create a registry over `store` using the wall clock.
    pub fn new(
        store: Arc<dyn DeviceStore>,
        codec: Arc<PiiCodec>,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            store,
            codec,
            metrics,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Register `token` for `class_id`, optionally claiming it for `user_id`.
    ///
    /// Idempotent per plaintext token: the row is found by hash, its class and
    /// last-seen time are refreshed, and an owner is filled in only if the row
    /// has none. The ciphertext changes on every call.
    pub async fn register(
        &self,
        class_id: &str,
        token: &str,
        user_id: Option<&str>,
    ) -> Result<RegisterOutcome> {
        let sealed = SealedToken::from(self.codec.encrypt(token)?);
        let hash = self.codec.hash(token)?;
        let now = (self.clock)();

        if let Some(existing) = self.store.find_by_hash(&hash).await? {
            let patch = DevicePatch {
                class_id: Some(Some(class_id.to_string())),
                user_id: match (existing.owner(), user_id.filter(|u| !u.is_empty())) {
                    (None, Some(user)) => Some(user.to_string()),
                    _ => None,
                },
                token: Some(sealed.clone()),
                token_hash: None,
                last_seen_at: Some(Some(now)),
            };
            if self.store.update(&existing.id, &patch).await? {
                self.metrics.record_registered();
                debug!(device_id = %existing.id, class_id, "Refreshed device registration");
                return Ok(RegisterOutcome::Refreshed(existing.id));
            }
            debug!(device_id = %existing.id, "Device vanished during refresh, inserting");
        }

        let record = DeviceRecord {
            id: DeviceId::generate(),
            class_id: Some(class_id.to_string()),
            user_id: user_id.filter(|u| !u.is_empty()).map(str::to_string),
            token: Some(sealed),
            token_hash: Some(hash),
            created_at: Some(now),
            last_seen_at: Some(now),
        };
        let id = record.id.clone();
        self.store.insert(record).await?;
        self.metrics.record_registered();
        info!(device_id = %id, class_id, "Registered new device");
        Ok(RegisterOutcome::Created(id))
    }

    /// Look up the row for a plaintext token without decrypting anything.
    pub async fn find_by_token(&self, token: &str) -> Result<Option<DeviceRecord>> {
        let hash = self.codec.hash(token)?;
        self.store.find_by_hash(&hash).await
    }

    /// Plaintext tokens of every device in a class, for push fan-out.
    ///
    /// Rows that fail to decrypt or hold no token are dropped.
    pub async fn class_tokens(&self, class_id: &str) -> Result<Vec<String>> {
        let rows = self.store.list_by_class(class_id).await?;
        let mut tokens = Vec::with_capacity(rows.len());
        for row in rows {
            match self.codec.decrypt(row.token.as_ref()) {
                Ok(token) if !token.is_empty() => tokens.push(token),
                Ok(_) => {}
                Err(e) => {
                    self.metrics.record_decrypt_failure();
                    debug!(device_id = %row.id, error = %e, "Dropping undecryptable token");
                }
            }
        }
        Ok(tokens)
    }

    /// Masked device views owned by `user_id`, for data export.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<DeviceExport>> {
        let rows = self.store.list_by_user(user_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let plain = self.codec.decrypt(row.token.as_ref()).unwrap_or_default();
                DeviceExport {
                    token_masked: mask(Some(plain.as_str())),
                    id: row.id,
                    class_id: row.class_id,
                    created_at: row.created_at,
                    last_seen_at: row.last_seen_at,
                }
            })
            .collect())
    }

    /// Erase every device owned by `user_id`. Returns the number removed.
    pub async fn delete_for_user(&self, user_id: &str) -> Result<usize> {
        let removed = self.store.delete_by_user(user_id).await?;
        info!(removed, "Erased devices for user");
        Ok(removed)
    }
}

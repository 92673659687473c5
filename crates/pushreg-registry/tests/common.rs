//! Shared fixtures for the registry integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pushreg_registry::{
    CreatedCursor, DeviceId, DevicePatch, DeviceRecord, DeviceStore, EncryptedPayload,
    EncryptionKey, HashCursor, HashKey, KeyConfig, MemoryDeviceStore, PiiCodec, RegistryError,
    Result, SealedToken, TokenHash,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn codec() -> Arc<PiiCodec> {
    Arc::new(PiiCodec::new(KeyConfig {
        encryption: EncryptionKey([11u8; 32]),
        hashing: HashKey([22u8; 32]),
    }))
}

pub fn at(value: &str) -> Option<DateTime<Utc>> {
    Some(
        DateTime::parse_from_rfc3339(value)
            .expect("valid timestamp")
            .with_timezone(&Utc),
    )
}

/// Stand-in ciphertext; dedupe never opens tokens.
pub fn fake_token(label: &str) -> Option<SealedToken> {
    Some(SealedToken::Payload(EncryptedPayload {
        ciphertext: format!("expo-{}", label),
        iv: format!("iv-{}", label),
        tag: format!("tag-{}", label),
    }))
}

pub fn device(
    id: &str,
    hash: &str,
    user: Option<&str>,
    class: &str,
    last_seen: &str,
    created: &str,
) -> DeviceRecord {
    DeviceRecord {
        id: DeviceId::from(id),
        class_id: Some(class.to_string()),
        user_id: user.map(str::to_string),
        token: fake_token(class.trim_start_matches("class-")),
        token_hash: Some(TokenHash::from(hash)),
        created_at: at(created),
        last_seen_at: at(last_seen),
    }
}

/// Seven rows forming duplicate groups of size 2, 3 and 2.
pub fn base_rows() -> Vec<DeviceRecord> {
    vec![
        device(
            "dev-001",
            "aaa",
            None,
            "class-a-latest",
            "2025-01-02T00:00:00Z",
            "2025-01-01T00:00:00Z",
        ),
        device(
            "dev-002",
            "aaa",
            Some("user-a"),
            "class-a-user",
            "2024-12-31T00:00:00Z",
            "2024-12-30T00:00:00Z",
        ),
        device(
            "dev-003",
            "bbb",
            None,
            "class-b-new",
            "2025-01-03T00:00:00Z",
            "2024-12-31T00:00:00Z",
        ),
        device(
            "dev-004",
            "bbb",
            Some("user-b"),
            "class-b-user",
            "2024-12-28T00:00:00Z",
            "2024-12-27T00:00:00Z",
        ),
        device(
            "dev-005",
            "bbb",
            None,
            "class-b-mid",
            "2024-12-29T00:00:00Z",
            "2024-12-28T00:00:00Z",
        ),
        device(
            "dev-006",
            "ccc",
            None,
            "class-c-old",
            "2024-12-30T00:00:00Z",
            "2024-12-29T00:00:00Z",
        ),
        device(
            "dev-007",
            "ccc",
            None,
            "class-c-new",
            "2025-01-04T00:00:00Z",
            "2024-12-30T00:00:00Z",
        ),
    ]
}

/// One group whose rows name two different owners.
pub fn conflicting_rows() -> Vec<DeviceRecord> {
    vec![
        device(
            "mix-001",
            "mix",
            Some("user-old"),
            "class-old",
            "2024-12-01T00:00:00Z",
            "2024-12-01T00:00:00Z",
        ),
        device(
            "mix-002",
            "mix",
            Some("user-new"),
            "class-new",
            "2025-01-05T00:00:00Z",
            "2024-12-15T00:00:00Z",
        ),
        device(
            "mix-003",
            "mix",
            None,
            "class-latest",
            "2025-01-06T00:00:00Z",
            "2024-12-20T00:00:00Z",
        ),
    ]
}

/// A legacy row holding a plaintext token and no hash.
pub fn legacy_device(id: &str, token: &str, created: &str) -> DeviceRecord {
    DeviceRecord {
        id: DeviceId::from(id),
        class_id: Some("class-old".to_string()),
        user_id: None,
        token: Some(SealedToken::Text {
            value: token.to_string(),
        }),
        token_hash: None,
        created_at: at(created),
        last_seen_at: None,
    }
}

/// Which store call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Fail the n-th (0-based) hashed page fetch.
    PageFetch(usize),
    /// Fail the n-th (0-based) unhashed page fetch.
    UnhashedPage(usize),
    /// Fail updates of this row id.
    Update(&'static str),
    /// Fail deletes that include this row id.
    Delete(&'static str),
}

/// Wraps a memory store and injects one kind of failure.
pub struct FaultyStore {
    pub inner: Arc<MemoryDeviceStore>,
    fault: Fault,
    pages: AtomicUsize,
    unhashed_pages: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryDeviceStore>, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            pages: AtomicUsize::new(0),
            unhashed_pages: AtomicUsize::new(0),
        }
    }

    fn injected(what: &str) -> RegistryError {
        RegistryError::Storage(format!("injected {} failure", what))
    }
}

#[async_trait]
impl DeviceStore for FaultyStore {
    async fn insert(&self, record: DeviceRecord) -> Result<()> {
        self.inner.insert(record).await
    }

    async fn find_by_hash(&self, hash: &TokenHash) -> Result<Option<DeviceRecord>> {
        self.inner.find_by_hash(hash).await
    }

    async fn list_by_class(&self, class_id: &str) -> Result<Vec<DeviceRecord>> {
        self.inner.list_by_class(class_id).await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<DeviceRecord>> {
        self.inner.list_by_user(user_id).await
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<usize> {
        self.inner.delete_by_user(user_id).await
    }

    async fn hashed_page(
        &self,
        after: Option<&HashCursor>,
        limit: usize,
    ) -> Result<Vec<DeviceRecord>> {
        let n = self.pages.fetch_add(1, Ordering::SeqCst);
        if self.fault == Fault::PageFetch(n) {
            return Err(Self::injected("page fetch"));
        }
        self.inner.hashed_page(after, limit).await
    }

    async fn unhashed_page(
        &self,
        after: Option<&CreatedCursor>,
        limit: usize,
    ) -> Result<Vec<DeviceRecord>> {
        let n = self.unhashed_pages.fetch_add(1, Ordering::SeqCst);
        if self.fault == Fault::UnhashedPage(n) {
            return Err(Self::injected("unhashed page fetch"));
        }
        self.inner.unhashed_page(after, limit).await
    }

    async fn update(&self, id: &DeviceId, patch: &DevicePatch) -> Result<bool> {
        if let Fault::Update(bad) = self.fault {
            if id.as_str() == bad {
                return Err(Self::injected("update"));
            }
        }
        self.inner.update(id, patch).await
    }

    async fn delete_ids(&self, ids: &[DeviceId]) -> Result<usize> {
        if let Fault::Delete(bad) = self.fault {
            if ids.iter().any(|id| id.as_str() == bad) {
                return Err(Self::injected("delete"));
            }
        }
        self.inner.delete_ids(ids).await
    }
}

//! Device rows and the keys used to page over them.

use crate::crypto::SealedToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque row identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        DeviceId(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.to_string())
    }
}

/// Hex HMAC-SHA256 of a plaintext token. A lookup key, never reversible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenHash(pub String);

impl TokenHash {
    /// Borrow the hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TokenHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenHash {
    fn from(value: &str) -> Self {
        TokenHash(value.to_string())
    }
}

/// One row of the `devices` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Row id
    pub id: DeviceId,
    /// Class the device receives notifications for
    pub class_id: Option<String>,
    /// Owning user, if known
    pub user_id: Option<String>,
    /// Sealed push token (legacy rows may hold plaintext)
    pub token: Option<SealedToken>,
    /// Keyed digest of the plaintext; `None` only on un-migrated rows
    pub token_hash: Option<TokenHash>,
    /// First registration time
    pub created_at: Option<DateTime<Utc>>,
    /// Most recent registration time
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    /// `last_seen_at`, falling back to `created_at`.
    pub fn activity(&self) -> Option<DateTime<Utc>> {
        self.last_seen_at.or(self.created_at)
    }

    /// Owning user; an empty string counts as unowned.
    pub fn owner(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|u| !u.is_empty())
    }

    /// Dedupe ordering key, if the row has been hashed.
    pub fn hash_cursor(&self) -> Option<HashCursor> {
        self.token_hash.as_ref().map(|hash| HashCursor {
            token_hash: hash.clone(),
            id: self.id.clone(),
        })
    }

    /// Backfill ordering key.
    pub fn created_cursor(&self) -> CreatedCursor {
        CreatedCursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }

    /// Applies a partial update in place.
    pub fn apply(&mut self, patch: &DevicePatch) {
        if let Some(class_id) = &patch.class_id {
            self.class_id = class_id.clone();
        }
        if let Some(user_id) = &patch.user_id {
            self.user_id = Some(user_id.clone());
        }
        if let Some(token) = &patch.token {
            self.token = Some(token.clone());
        }
        if let Some(token_hash) = &patch.token_hash {
            self.token_hash = Some(token_hash.clone());
        }
        if let Some(last_seen_at) = patch.last_seen_at {
            self.last_seen_at = last_seen_at;
        }
    }
}

/// Partial update for update-by-id. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePatch {
    /// New class (may clear it)
    pub class_id: Option<Option<String>>,
    /// Owner to set; owners are never cleared
    pub user_id: Option<String>,
    /// Replacement sealed token
    pub token: Option<SealedToken>,
    /// Token hash to record
    pub token_hash: Option<TokenHash>,
    /// New last-seen time (may clear it)
    pub last_seen_at: Option<Option<DateTime<Utc>>>,
}

impl DevicePatch {
    /// True if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == DevicePatch::default()
    }
}

/// Keyset cursor for `(token_hash, id)` ordered scans.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HashCursor {
    /// Hash of the last row seen
    pub token_hash: TokenHash,
    /// Id of the last row seen
    pub id: DeviceId,
}

/// Keyset cursor for `(created_at, id)` ordered scans.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CreatedCursor {
    /// Creation time of the last row seen
    pub created_at: Option<DateTime<Utc>>,
    /// Id of the last row seen
    pub id: DeviceId,
}

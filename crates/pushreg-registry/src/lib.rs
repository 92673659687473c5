#![warn(missing_docs)]

//! pushreg registry subsystem: PII-safe push-token storage and maintenance jobs
//!
//! Register path: Token → Seal (AES-256-GCM) + Identity (HMAC-SHA256)
//!                → Upsert by hash → Store
//! Fan-out path:  Store → Open → Plaintext tokens
//! Maintenance:   Backfill (legacy rows → hash) → Dedupe (rows sharing a hash → one survivor)

pub mod backfill;
pub mod crypto;
pub mod dedupe;
pub mod error;
pub mod grouping;
pub mod keys;
pub mod metrics;
pub mod record;
pub mod registry;
pub mod store;

pub use backfill::{BackfillJob, BackfillOptions, BackfillSummary};
pub use crypto::{is_encrypted, mask, EncryptedPayload, PiiCodec, SealedToken};
pub use dedupe::{DedupeEngine, DedupeOptions, DedupeSummary, MergePlan};
pub use error::{RegistryError, Result};
pub use grouping::GroupAccumulator;
pub use keys::{EncryptionKey, HashKey, KeyConfig};
pub use metrics::{MetricKind, MetricsSnapshot, RegistryMetric, RegistryMetrics};
pub use record::{CreatedCursor, DeviceId, DevicePatch, DeviceRecord, HashCursor, TokenHash};
pub use registry::{DeviceExport, DeviceRegistry, RegisterOutcome};
pub use store::{DeviceStore, MemoryDeviceStore};

//! Error types for the pushreg-registry subsystem

/// All errors that can occur in the device-token registry and its jobs
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Encryption or hashing key is missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),
    /// Attempted to encrypt an empty token
    #[error("Cannot encrypt empty payload")]
    EmptyInput,
    /// Authentication tag mismatch, foreign key, or malformed payload
    #[error("Decryption failed: {0}")]
    Decryption(String),
    /// The storage backend rejected a query or mutation
    #[error("Storage error: {0}")]
    Storage(String),
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the registry crate
pub type Result<T> = std::result::Result<T, RegistryError>;

//! Key material for token encryption and token hashing.
//!
//! Both keys are 256-bit secrets supplied as base64 strings. The encryption key
//! feeds AES-256-GCM and the hash key feeds HMAC-SHA256.

use crate::error::{RegistryError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Environment variable holding the base64 encryption key.
pub const ENC_KEY_ENV: &str = "PII_ENC_KEY";
/// Environment variable holding the base64 hashing key.
pub const HASH_KEY_ENV: &str = "PII_HASH_KEY";

/// 256-bit (32-byte) AES-GCM key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

/// 256-bit (32-byte) HMAC key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HashKey(pub [u8; 32]);

impl std::fmt::Debug for HashKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HashKey([REDACTED])")
    }
}

/// Both secrets required by the codec.
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// Key used to seal tokens at rest
    pub encryption: EncryptionKey,
    /// Key used to derive token hashes
    pub hashing: HashKey,
}

impl KeyConfig {
    /// Builds the key pair from two base64 strings.
    pub fn from_base64(enc_b64: &str, hash_b64: &str) -> Result<Self> {
        Ok(Self {
            encryption: EncryptionKey(decode_key(ENC_KEY_ENV, enc_b64)?),
            hashing: HashKey(decode_key(HASH_KEY_ENV, hash_b64)?),
        })
    }

    /// Reads both keys from the process environment.
    pub fn from_env() -> Result<Self> {
        let enc = read_env(ENC_KEY_ENV)?;
        let hash = read_env(HASH_KEY_ENV)?;
        Self::from_base64(&enc, &hash)
    }
}

fn read_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RegistryError::Config(format!("{} must be configured", name))),
    }
}

fn decode_key(name: &str, b64: &str) -> Result<[u8; 32]> {
    let mut raw = STANDARD
        .decode(b64.trim())
        .map_err(|e| RegistryError::Config(format!("{} is not valid base64: {}", name, e)))?;
    if raw.len() != 32 {
        let len = raw.len();
        raw.zeroize();
        return Err(RegistryError::Config(format!(
            "{} must decode to 32 bytes (got {})",
            name, len
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&raw);
    raw.zeroize();
    Ok(key)
}

//! AES-256-GCM token sealing, HMAC-SHA256 token identity, and display masking

use crate::error::{RegistryError, Result};
use crate::keys::KeyConfig;
use crate::record::TokenHash;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Marker prefix of the single-string sealed form.
pub const SEALED_PREFIX: &str = "enc.v1:";

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Structured AEAD output; every part is base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Ciphertext without the authentication tag
    pub ciphertext: String,
    /// 96-bit nonce, fresh per call
    pub iv: String,
    /// 128-bit GCM authentication tag
    pub tag: String,
}

impl EncryptedPayload {
    /// Renders the single-string form `enc.v1:<iv>.<tag>.<ct>`.
    pub fn serialize(&self) -> String {
        format!("{}{}.{}.{}", SEALED_PREFIX, self.iv, self.tag, self.ciphertext)
    }

    /// Parses the single-string form.
    ///
    /// Returns `Ok(None)` for a string without the prefix (legacy plaintext)
    /// and `Decryption` when the prefix is present but the body is malformed.
    pub fn parse(value: &str) -> Result<Option<Self>> {
        let Some(body) = value.strip_prefix(SEALED_PREFIX) else {
            return Ok(None);
        };
        let parts: Vec<&str> = body.split('.').collect();
        match parts.as_slice() {
            [iv, tag, ct] => Ok(Some(Self {
                ciphertext: (*ct).to_string(),
                iv: (*iv).to_string(),
                tag: (*tag).to_string(),
            })),
            _ => Err(RegistryError::Decryption(
                "invalid encrypted payload format".to_string(),
            )),
        }
    }
}

/// A token as persisted in a device row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum SealedToken {
    /// Split iv/tag/ciphertext columns
    Payload(EncryptedPayload),
    /// Single column: either `enc.v1:` serialized or legacy plaintext
    Text {
        /// Raw column value
        value: String,
    },
}

impl From<EncryptedPayload> for SealedToken {
    fn from(payload: EncryptedPayload) -> Self {
        SealedToken::Payload(payload)
    }
}

/// Returns true if `value` carries the sealed-string prefix.
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(SEALED_PREFIX)
}

/// Masks a value for audit/export display, revealing only the last 4 characters.
pub fn mask(value: Option<&str>) -> Option<String> {
    let value = value.filter(|v| !v.is_empty())?;
    let count = value.chars().count();
    if count <= 4 {
        return Some("***".to_string());
    }
    let visible: String = value.chars().skip(count - 4).collect();
    Some(format!("***{}", visible))
}

/// Encrypts, decrypts and hashes push tokens with the configured keys.
#[derive(Debug, Clone)]
pub struct PiiCodec {
    keys: KeyConfig,
}

impl PiiCodec {
    /// Creates a codec bound to the given key pair.
    pub fn new(keys: KeyConfig) -> Self {
        Self { keys }
    }

    /// Creates a codec from `PII_ENC_KEY` / `PII_HASH_KEY`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(KeyConfig::from_env()?))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.keys.encryption.0)
            .map_err(|e| RegistryError::Config(e.to_string()))
    }

    /// Seals a token. A random iv is generated for every call.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPayload> {
        if plaintext.is_empty() {
            return Err(RegistryError::EmptyInput);
        }
        let cipher = self.cipher()?;
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(aes_gcm::Nonce::from_slice(&iv), b"", &mut buffer)
            .map_err(|e| RegistryError::Config(format!("encryption failed: {}", e)))?;

        Ok(EncryptedPayload {
            ciphertext: STANDARD.encode(&buffer),
            iv: STANDARD.encode(iv),
            tag: STANDARD.encode(tag),
        })
    }

    /// Opens a structured payload. Fails if the tag does not verify.
    pub fn decrypt_payload(&self, payload: &EncryptedPayload) -> Result<String> {
        let iv = decode_part("iv", &payload.iv)?;
        let tag = decode_part("tag", &payload.tag)?;
        let mut buffer = decode_part("ciphertext", &payload.ciphertext)?;
        if iv.len() != IV_LEN {
            return Err(RegistryError::Decryption(format!(
                "iv must be {} bytes (got {})",
                IV_LEN,
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(RegistryError::Decryption(format!(
                "tag must be {} bytes (got {})",
                TAG_LEN,
                tag.len()
            )));
        }

        let cipher = self.cipher()?;
        cipher
            .decrypt_in_place_detached(
                aes_gcm::Nonce::from_slice(&iv),
                b"",
                &mut buffer,
                aes_gcm::Tag::from_slice(&tag),
            )
            .map_err(|_| {
                RegistryError::Decryption("authentication tag mismatch".to_string())
            })?;

        String::from_utf8(buffer)
            .map_err(|_| RegistryError::Decryption("plaintext is not UTF-8".to_string()))
    }

    /// Recovers the plaintext token from any persisted form.
    ///
    /// Absent input yields an empty string. Legacy plaintext is returned as is.
    pub fn decrypt(&self, value: Option<&SealedToken>) -> Result<String> {
        match value {
            None => Ok(String::new()),
            Some(SealedToken::Payload(payload)) => self.decrypt_payload(payload),
            Some(SealedToken::Text { value }) if value.is_empty() => Ok(String::new()),
            Some(SealedToken::Text { value }) => match EncryptedPayload::parse(value)? {
                Some(payload) => self.decrypt_payload(&payload),
                None => Ok(value.clone()),
            },
        }
    }

    /// Deterministic keyed digest of a token, hex encoded.
    pub fn hash(&self, plaintext: &str) -> Result<TokenHash> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.keys.hashing.0)
            .map_err(|e| RegistryError::Config(e.to_string()))?;
        mac.update(plaintext.as_bytes());
        Ok(TokenHash(hex::encode(mac.finalize().into_bytes())))
    }
}

fn decode_part(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| RegistryError::Decryption(format!("{} is not valid base64: {}", name, e)))
}

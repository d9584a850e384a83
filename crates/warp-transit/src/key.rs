//! Key policy and key material types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec;
use crate::derive::derive_key;
use crate::error::{TransitError, TransitResult};

/// Symmetric key size in bytes (both supported AEADs use 256-bit keys)
pub const KEY_SIZE: usize = 32;

/// AEAD algorithm bound to a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KeyAlgorithm {
    /// AES-256-GCM with a 96-bit nonce
    #[default]
    #[serde(rename = "aes256-gcm96")]
    Aes256Gcm96,
    /// ChaCha20-Poly1305
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl KeyAlgorithm {
    /// Key size in bytes
    pub const fn key_size(&self) -> usize {
        KEY_SIZE
    }

    /// Wire name of the algorithm
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256Gcm96 => "aes256-gcm96",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = TransitError;

    fn from_str(s: &str) -> TransitResult<Self> {
        match s.to_lowercase().as_str() {
            "aes256-gcm96" => Ok(Self::Aes256Gcm96),
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            _ => Err(TransitError::invalid_field(
                "type",
                format!("unknown key type {s:?}"),
            )),
        }
    }
}

/// 256-bit symmetric key, zeroized on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, failing on a length mismatch
    pub fn from_slice(bytes: &[u8]) -> TransitResult<Self> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            TransitError::Internal(format!(
                "key material must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

// Only the storage backend ever sees this encoding.
impl Serialize for SymmetricKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&codec::encode_base64(&self.0))
    }
}

impl<'de> Deserialize<'de> for SymmetricKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let mut bytes = codec::decode_base64("key material", &encoded)
            .map_err(serde::de::Error::custom)?;
        let key = Self::from_slice(&bytes).map_err(serde::de::Error::custom);
        bytes.zeroize();
        key
    }
}

/// One entry in a policy's version history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVersion {
    /// Sequential version number, starting at 1
    pub version: u32,
    /// Key material owned by the policy
    pub key_material: SymmetricKey,
    /// When this version was appended
    pub created_at: DateTime<Utc>,
}

impl KeyVersion {
    fn generate(version: u32) -> Self {
        Self {
            version,
            key_material: SymmetricKey::generate(),
            created_at: Utc::now(),
        }
    }
}

/// Named key policy with its append-only version history
///
/// Policies are handed out as immutable snapshots; rotation and
/// configuration produce a new snapshot that replaces the old one in the
/// store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPolicy {
    /// Unique policy name
    pub name: String,
    /// AEAD algorithm
    #[serde(rename = "type")]
    pub algorithm: KeyAlgorithm,
    /// Whether every operation derives a per-request key from a context
    pub derived: bool,
    /// Latest (encrypting) version
    pub latest_version: u32,
    /// Lowest version allowed for decryption
    pub min_decryption_version: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    versions: Vec<KeyVersion>,
}

impl KeyPolicy {
    /// Create a policy with a single freshly generated version
    pub fn generate(name: impl Into<String>, algorithm: KeyAlgorithm, derived: bool) -> Self {
        Self {
            name: name.into(),
            algorithm,
            derived,
            latest_version: 1,
            min_decryption_version: 1,
            created_at: Utc::now(),
            versions: vec![KeyVersion::generate(1)],
        }
    }

    /// Version history, oldest first
    pub fn versions(&self) -> &[KeyVersion] {
        &self.versions
    }

    /// Get a specific version
    pub fn version(&self, version: u32) -> TransitResult<&KeyVersion> {
        if version == 0 {
            return Err(TransitError::VersionNotFound(version));
        }
        self.versions
            .get(version as usize - 1)
            .filter(|v| v.version == version)
            .ok_or(TransitError::VersionNotFound(version))
    }

    /// Get the latest version
    pub fn latest(&self) -> TransitResult<&KeyVersion> {
        self.version(self.latest_version)
    }

    /// Snapshot with one more version appended
    pub fn rotated(&self) -> Self {
        let mut next = self.clone();
        let version = self.latest_version + 1;
        next.versions.push(KeyVersion::generate(version));
        next.latest_version = version;
        next
    }

    /// Snapshot with a new minimum decryption version
    pub fn with_min_decryption_version(&self, min: u32) -> TransitResult<Self> {
        if min == 0 || min > self.latest_version {
            return Err(TransitError::invalid_field(
                "min_decryption_version",
                format!("must be between 1 and {}", self.latest_version),
            ));
        }
        let mut next = self.clone();
        next.min_decryption_version = min;
        Ok(next)
    }

    /// Key used to encrypt: the latest version, derived when required
    pub fn encryption_key(&self, context: Option<&[u8]>) -> TransitResult<(u32, SymmetricKey)> {
        let latest = self.latest()?;
        Ok((latest.version, self.resolve_key(latest, context)?))
    }

    /// Key used to decrypt a ciphertext produced under `version`
    pub fn decryption_key(
        &self,
        version: u32,
        context: Option<&[u8]>,
    ) -> TransitResult<SymmetricKey> {
        if version < self.min_decryption_version {
            return Err(TransitError::VersionDisallowed {
                version,
                min: self.min_decryption_version,
            });
        }
        let entry = self.version(version)?;
        self.resolve_key(entry, context)
    }

    fn resolve_key(
        &self,
        entry: &KeyVersion,
        context: Option<&[u8]>,
    ) -> TransitResult<SymmetricKey> {
        if !self.derived {
            return Ok(entry.key_material.clone());
        }
        match context {
            Some(ctx) if !ctx.is_empty() => derive_key(&entry.key_material, ctx),
            _ => Err(TransitError::ContextRequired),
        }
    }

    /// Public view of the policy, without key material
    pub fn info(&self) -> PolicyInfo {
        PolicyInfo {
            name: self.name.clone(),
            key_type: self.algorithm,
            derived: self.derived,
            latest_version: self.latest_version,
            min_decryption_version: self.min_decryption_version,
            keys: self
                .versions
                .iter()
                .map(|v| (v.version.to_string(), v.created_at.timestamp()))
                .collect(),
        }
    }

    /// Serialize to bytes for storage
    pub fn to_bytes(&self) -> TransitResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| TransitError::Serialization(format!("Failed to serialize: {}", e)))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> TransitResult<Self> {
        let policy: Self = serde_json::from_slice(bytes)
            .map_err(|e| TransitError::Serialization(format!("Failed to deserialize: {}", e)))?;
        policy.check()?;
        Ok(policy)
    }

    fn check(&self) -> TransitResult<()> {
        let sequential = self
            .versions
            .iter()
            .enumerate()
            .all(|(i, v)| v.version as usize == i + 1);
        if self.versions.is_empty()
            || !sequential
            || self.latest_version as usize != self.versions.len()
        {
            return Err(TransitError::Serialization(format!(
                "policy {} has an inconsistent version history",
                self.name
            )));
        }
        Ok(())
    }
}

/// Caller-visible description of a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    /// Policy name
    pub name: String,
    /// AEAD algorithm
    #[serde(rename = "type")]
    pub key_type: KeyAlgorithm,
    /// Derived-key mode
    pub derived: bool,
    /// Latest version
    pub latest_version: u32,
    /// Minimum decryption version
    pub min_decryption_version: u32,
    /// Version number to creation time (unix seconds)
    pub keys: BTreeMap<String, i64>,
}

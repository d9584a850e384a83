//! Authenticated encryption and the ciphertext envelope
//!
//! Envelope layout:
//!
//! `warp:v<version>:<base64(nonce (12 bytes) || ciphertext || tag (16 bytes))>`
//!
//! The version prefix lets decryption pick the right key version without
//! any external hint.

use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, KeyInit, Nonce};
use chacha20poly1305::ChaCha20Poly1305;
use rand::{RngCore, rngs::OsRng};

use crate::codec;
use crate::error::{TransitError, TransitResult};
use crate::key::{KeyAlgorithm, KeyPolicy, SymmetricKey};

/// Prefix of every ciphertext envelope
pub const ENVELOPE_PREFIX: &str = "warp:v";

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Parsed ciphertext envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Key version that produced the ciphertext
    pub version: u32,
    /// nonce || ciphertext || tag
    pub sealed: Vec<u8>,
}

impl Envelope {
    /// Parse an envelope string
    pub fn parse(encoded: &str) -> TransitResult<Self> {
        let rest = encoded.strip_prefix(ENVELOPE_PREFIX).ok_or_else(|| {
            TransitError::AuthenticationFailed("invalid ciphertext: no prefix".to_string())
        })?;

        let (version, payload) = rest.split_once(':').ok_or_else(|| {
            TransitError::AuthenticationFailed(
                "invalid ciphertext: wrong number of fields".to_string(),
            )
        })?;

        let version: u32 = version.parse().map_err(|_| {
            TransitError::AuthenticationFailed(
                "invalid ciphertext: version number could not be decoded".to_string(),
            )
        })?;
        if version == 0 {
            return Err(TransitError::AuthenticationFailed(
                "invalid ciphertext: version number must be positive".to_string(),
            ));
        }

        let sealed = codec::decode_base64("ciphertext", payload)?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(TransitError::AuthenticationFailed(
                "invalid ciphertext: too short".to_string(),
            ));
        }

        Ok(Self { version, sealed })
    }

    /// Render as an envelope string
    pub fn encode(&self) -> String {
        format!(
            "{}{}:{}",
            ENVELOPE_PREFIX,
            self.version,
            codec::encode_base64(&self.sealed)
        )
    }
}

/// Encrypt under the policy's latest version
pub fn encrypt(
    policy: &KeyPolicy,
    plaintext: &[u8],
    context: Option<&[u8]>,
) -> TransitResult<String> {
    let (version, key) = policy.encryption_key(context)?;
    let sealed = seal(policy.algorithm, &key, plaintext)?;
    Ok(Envelope { version, sealed }.encode())
}

/// Decrypt an envelope produced by any retained version of the policy
pub fn decrypt(
    policy: &KeyPolicy,
    envelope: &str,
    context: Option<&[u8]>,
) -> TransitResult<Vec<u8>> {
    let envelope = Envelope::parse(envelope)?;
    let key = policy.decryption_key(envelope.version, context)?;
    open(policy.algorithm, &key, &envelope.sealed)
}

/// Seal with a raw key: returns nonce || ciphertext || tag
pub fn seal(algorithm: KeyAlgorithm, key: &SymmetricKey, plaintext: &[u8]) -> TransitResult<Vec<u8>> {
    match algorithm {
        KeyAlgorithm::Aes256Gcm96 => seal_with::<Aes256Gcm>(key, plaintext),
        KeyAlgorithm::ChaCha20Poly1305 => seal_with::<ChaCha20Poly1305>(key, plaintext),
    }
}

/// Open nonce || ciphertext || tag with a raw key
pub fn open(algorithm: KeyAlgorithm, key: &SymmetricKey, sealed: &[u8]) -> TransitResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(TransitError::AuthenticationFailed(
            "invalid ciphertext: too short".to_string(),
        ));
    }
    match algorithm {
        KeyAlgorithm::Aes256Gcm96 => open_with::<Aes256Gcm>(key, sealed),
        KeyAlgorithm::ChaCha20Poly1305 => open_with::<ChaCha20Poly1305>(key, sealed),
    }
}

fn seal_with<C: KeyInit + Aead>(key: &SymmetricKey, plaintext: &[u8]) -> TransitResult<Vec<u8>> {
    let cipher = C::new_from_slice(key.as_bytes())
        .map_err(|e| TransitError::Internal(format!("Failed to create cipher: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::<C>::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| TransitError::Internal(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn open_with<C: KeyInit + Aead>(key: &SymmetricKey, sealed: &[u8]) -> TransitResult<Vec<u8>> {
    let cipher = C::new_from_slice(key.as_bytes())
        .map_err(|e| TransitError::Internal(format!("Failed to create cipher: {}", e)))?;

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = Nonce::<C>::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| TransitError::AuthenticationFailed("cipher: message authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let policy = KeyPolicy::generate("orders", KeyAlgorithm::Aes256Gcm96, false);
        let plaintext = b"hello, transit!";

        let envelope = encrypt(&policy, plaintext, None).unwrap();
        assert!(envelope.starts_with("warp:v1:"));

        let decrypted = decrypt(&policy, &envelope, None).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_chacha_roundtrip() {
        let policy = KeyPolicy::generate("orders", KeyAlgorithm::ChaCha20Poly1305, false);
        let envelope = encrypt(&policy, b"chacha", None).unwrap();
        assert_eq!(decrypt(&policy, &envelope, None).unwrap(), b"chacha");
    }

    #[test]
    fn test_derived_context_mismatch() {
        let policy = KeyPolicy::generate("tenants", KeyAlgorithm::Aes256Gcm96, true);
        let envelope = encrypt(&policy, b"secret", Some(b"tenant-a")).unwrap();

        assert_eq!(
            decrypt(&policy, &envelope, Some(b"tenant-a")).unwrap(),
            b"secret"
        );
        assert!(matches!(
            decrypt(&policy, &envelope, Some(b"tenant-b")),
            Err(TransitError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            decrypt(&policy, &envelope, None),
            Err(TransitError::ContextRequired)
        ));
    }

    #[test]
    fn test_old_version_after_rotation() {
        let policy = KeyPolicy::generate("orders", KeyAlgorithm::Aes256Gcm96, false);
        let old = encrypt(&policy, b"before", None).unwrap();

        let rotated = policy.rotated();
        let new = encrypt(&rotated, b"after", None).unwrap();

        assert!(new.starts_with("warp:v2:"));
        assert_eq!(decrypt(&rotated, &old, None).unwrap(), b"before");
        assert_eq!(decrypt(&rotated, &new, None).unwrap(), b"after");
    }

    #[test]
    fn test_unknown_version() {
        let policy = KeyPolicy::generate("orders", KeyAlgorithm::Aes256Gcm96, false);
        let envelope = encrypt(&policy.rotated(), b"future", None).unwrap();

        assert!(matches!(
            decrypt(&policy, &envelope, None),
            Err(TransitError::VersionNotFound(2))
        ));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let policy = KeyPolicy::generate("orders", KeyAlgorithm::Aes256Gcm96, false);
        let envelope = encrypt(&policy, b"integrity", None).unwrap();

        let mut parsed = Envelope::parse(&envelope).unwrap();
        let last = parsed.sealed.len() - 1;
        parsed.sealed[last] ^= 0x01;

        assert!(matches!(
            decrypt(&policy, &parsed.encode(), None),
            Err(TransitError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_malformed_envelopes() {
        let policy = KeyPolicy::generate("orders", KeyAlgorithm::Aes256Gcm96, false);

        for bad in ["", "aead:v1:abcd", "warp:v1", "warp:vX:abcd", "warp:v0:abcd", "warp:v1:AAAA"] {
            assert!(
                matches!(
                    decrypt(&policy, bad, None),
                    Err(TransitError::AuthenticationFailed(_))
                ),
                "expected authentication failure for {bad:?}"
            );
        }

        assert!(matches!(
            decrypt(&policy, "warp:v1:not base64!", None),
            Err(TransitError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_envelope_parse_encode() {
        let envelope = Envelope {
            version: 7,
            sealed: vec![0xAB; NONCE_SIZE + TAG_SIZE + 3],
        };
        let parsed = Envelope::parse(&envelope.encode()).unwrap();
        assert_eq!(parsed, envelope);
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: encrypt then decrypt recovers original plaintext
        #[test]
        fn roundtrip_any_data(plaintext in prop::collection::vec(any::<u8>(), 0..4096)) {
            let policy = KeyPolicy::generate("prop", KeyAlgorithm::Aes256Gcm96, false);

            let envelope = encrypt(&policy, &plaintext, None).unwrap();
            let decrypted = decrypt(&policy, &envelope, None).unwrap();

            prop_assert_eq!(plaintext, decrypted);
        }

        /// Property: sealed payload carries exactly nonce + tag overhead
        #[test]
        fn sealed_has_overhead(plaintext in prop::collection::vec(any::<u8>(), 0..1024)) {
            let key = SymmetricKey::generate();

            let sealed = seal(KeyAlgorithm::ChaCha20Poly1305, &key, &plaintext).unwrap();

            prop_assert_eq!(sealed.len(), plaintext.len() + NONCE_SIZE + TAG_SIZE);
        }

        /// Property: a different derivation context never opens the envelope
        #[test]
        fn wrong_context_fails(
            plaintext in prop::collection::vec(any::<u8>(), 1..256),
            ctx1 in prop::collection::vec(any::<u8>(), 1..32),
            ctx2 in prop::collection::vec(any::<u8>(), 1..32),
        ) {
            prop_assume!(ctx1 != ctx2);
            let policy = KeyPolicy::generate("prop", KeyAlgorithm::Aes256Gcm96, true);

            let envelope = encrypt(&policy, &plaintext, Some(&ctx1)).unwrap();

            prop_assert!(decrypt(&policy, &envelope, Some(&ctx2)).is_err());
            prop_assert_eq!(decrypt(&policy, &envelope, Some(&ctx1)).unwrap(), plaintext);
        }
    }
}

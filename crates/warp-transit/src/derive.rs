//! Per-request key derivation
//!
//! Derived policies never encrypt with their stored key material directly.
//! Each operation derives a fresh key from the version's master key and the
//! caller's context:
//!
//! `derived_key = HKDF-SHA256(ikm = master_key, salt = none, info = context)`
//!
//! Identical `(master_key, context)` pairs always produce the same key, so a
//! ciphertext can be opened again by presenting the same context. Nothing
//! about the master key or other contexts' keys can be recovered from a
//! derived key.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{TransitError, TransitResult};
use crate::key::{KEY_SIZE, SymmetricKey};

/// Derive a context-bound key from a master key
pub fn derive_key(master: &SymmetricKey, context: &[u8]) -> TransitResult<SymmetricKey> {
    if context.is_empty() {
        return Err(TransitError::ContextRequired);
    }

    let hk = Hkdf::<Sha256>::new(None, master.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(context, &mut okm)
        .map_err(|e| TransitError::Internal(format!("HKDF expand failed: {}", e)))?;

    let key = SymmetricKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_deterministic() {
        let master = SymmetricKey::from_bytes([7u8; KEY_SIZE]);

        let key1 = derive_key(&master, b"tenant-a").unwrap();
        let key2 = derive_key(&master, b"tenant-a").unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_contexts_different_keys() {
        let master = SymmetricKey::generate();
        let key1 = derive_key(&master, b"tenant-a").unwrap();
        let key2 = derive_key(&master, b"tenant-b").unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_masters_different_keys() {
        let key1 = derive_key(&SymmetricKey::generate(), b"tenant-a").unwrap();
        let key2 = derive_key(&SymmetricKey::generate(), b"tenant-a").unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derived_differs_from_master() {
        let master = SymmetricKey::generate();
        let derived = derive_key(&master, b"tenant-a").unwrap();

        assert_ne!(derived.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_empty_context_rejected() {
        let master = SymmetricKey::generate();
        assert!(matches!(
            derive_key(&master, b""),
            Err(TransitError::ContextRequired)
        ));
    }

    #[test]
    fn test_binary_context() {
        let master = SymmetricKey::generate();
        let context: Vec<u8> = (0..=255).collect();
        let key = derive_key(&master, &context).unwrap();

        assert_eq!(key.as_bytes().len(), KEY_SIZE);
    }
}

//! # warp-transit: Encryption as a Service
//!
//! Encrypts and decrypts caller data under named key policies without ever
//! handing out key material.
//!
//! ## Features
//!
//! - **Named key policies**: versioned key history with rotation and a
//!   minimum decryption version
//! - **Derived keys**: per-context keys via HKDF-SHA256
//! - **Batch operations**: base64-encoded JSON batches processed with
//!   bounded concurrency and per-item error isolation
//! - **Pluggable storage**: in-memory or one-file-per-policy backends
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warp_transit::{EngineConfig, MemoryStorage, Operation, TransitEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = TransitEngine::new(Arc::new(MemoryStorage::new()), EngineConfig::default());
//!
//!     let mut fields = serde_json::Map::new();
//!     fields.insert("plaintext".into(), "aGVsbG8=".into());
//!
//!     // Creates the key on first use
//!     let response = engine.encrypt(Operation::Create, "orders", &fields).await?;
//!     println!("{}", response.get_str("ciphertext").unwrap_or_default());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

mod batch;
mod cipher;
mod codec;
mod derive;
mod engine;
mod error;
mod key;
mod policy;
mod storage;

pub use batch::{BatchOperation, BatchProcessor, BatchResponseItem, DEFAULT_MAX_CONCURRENCY};
pub use cipher::{ENVELOPE_PREFIX, Envelope};
pub use codec::{BatchItem, PayloadField, decode_base64, decode_batch, encode_base64};
pub use derive::derive_key;
pub use engine::{EngineConfig, FieldMap, Operation, Payload, Response, TransitEngine};
pub use error::{ErrorClass, TransitError, TransitResult};
pub use key::{KEY_SIZE, KeyAlgorithm, KeyPolicy, KeyVersion, PolicyInfo, SymmetricKey};
pub use policy::{PolicyRequest, PolicyStore, PolicyUpdate};
pub use storage::{FileStorage, MemoryStorage, PolicyStorage};

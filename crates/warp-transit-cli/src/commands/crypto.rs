//! encrypt, decrypt and rewrap commands

use anyhow::{Context, Result};
use serde_json::Value;
use warp_transit::{FieldMap, Operation, PayloadField, Response, TransitEngine, encode_base64};

use crate::PayloadArgs;

/// Build the request field map for a crypto command
pub fn request_fields(input: &PayloadArgs, field: PayloadField) -> Result<FieldMap> {
    let mut fields = FieldMap::new();

    if let Some(ref value) = input.value {
        fields.insert(field.as_str().into(), Value::from(value.as_str()));
    }
    if let Some(ref context) = input.context {
        fields.insert("context".into(), Value::from(context.as_str()));
    }
    if let Some(ref batch) = input.batch {
        fields.insert("batch".into(), Value::from(batch.as_str()));
    }
    if let Some(ref path) = input.batch_file {
        let raw = std::fs::read(path)
            .with_context(|| format!("Failed to read batch file {}", path.display()))?;
        fields.insert("batch".into(), Value::from(encode_base64(&raw)));
    }
    Ok(fields)
}

/// Encrypt plaintext; with `upsert` the key is created on first use
pub async fn encrypt(
    engine: &TransitEngine,
    name: &str,
    input: &PayloadArgs,
    key_type: Option<&str>,
    upsert: bool,
) -> Result<Response> {
    let mut fields = request_fields(input, PayloadField::Plaintext)?;
    if let Some(key_type) = key_type {
        fields.insert("type".into(), Value::from(key_type));
    }

    let operation = if upsert {
        Operation::Create
    } else {
        Operation::Update
    };
    Ok(engine.encrypt(operation, name, &fields).await?)
}

/// Decrypt ciphertext
pub async fn decrypt(engine: &TransitEngine, name: &str, input: &PayloadArgs) -> Result<Response> {
    let fields = request_fields(input, PayloadField::Ciphertext)?;
    Ok(engine.decrypt(name, &fields).await?)
}

/// Re-encrypt ciphertext under the latest key version
pub async fn rewrap(engine: &TransitEngine, name: &str, input: &PayloadArgs) -> Result<Response> {
    let fields = request_fields(input, PayloadField::Ciphertext)?;
    Ok(engine.rewrap(name, &fields).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use warp_transit::{BatchResponseItem, EngineConfig, MemoryStorage, TransitError};

    const PLAINTEXT: &str = "aGVsbG8gdHJhbnNpdA==";

    fn engine() -> TransitEngine {
        TransitEngine::new(Arc::new(MemoryStorage::new()), EngineConfig::default())
    }

    fn single(value: &str) -> PayloadArgs {
        PayloadArgs {
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_encrypt_requires_upsert_for_new_key() {
        let engine = engine();

        let err = encrypt(&engine, "orders", &single(PLAINTEXT), None, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransitError>(),
            Some(TransitError::PolicyNotFound(_))
        ));

        let response = encrypt(&engine, "orders", &single(PLAINTEXT), None, true)
            .await
            .unwrap();
        assert!(response.get_str("ciphertext").is_some());
    }

    #[tokio::test]
    async fn test_roundtrip_and_rewrap() {
        let engine = engine();
        let encrypted = encrypt(&engine, "orders", &single(PLAINTEXT), None, true)
            .await
            .unwrap();
        let ciphertext = encrypted.get_str("ciphertext").unwrap();

        engine.rotate_key("orders").await.unwrap();
        let rewrapped = rewrap(&engine, "orders", &single(ciphertext)).await.unwrap();
        let rewrapped = rewrapped.get_str("ciphertext").unwrap();
        assert!(rewrapped.starts_with("warp:v2:"));

        let decrypted = decrypt(&engine, "orders", &single(rewrapped)).await.unwrap();
        assert_eq!(decrypted.get_str("plaintext"), Some(PLAINTEXT));
    }

    #[tokio::test]
    async fn test_batch_file_is_encoded() {
        let engine = engine();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"plaintext":"{PLAINTEXT}"}},{{"plaintext":"not base64!"}}]"#
        )
        .unwrap();

        let input = PayloadArgs {
            batch_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let response = encrypt(&engine, "orders", &input, None, true).await.unwrap();

        let items: Vec<BatchResponseItem> =
            serde_json::from_str(response.get_str("data").unwrap()).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].ciphertext.is_some());
        assert!(items[1].is_error());
    }

    #[test]
    fn test_request_fields() {
        let input = PayloadArgs {
            value: Some("warp:v1:abc".into()),
            context: Some("Y3R4".into()),
            ..Default::default()
        };
        let fields = request_fields(&input, PayloadField::Ciphertext).unwrap();
        assert_eq!(fields.get("ciphertext"), Some(&Value::from("warp:v1:abc")));
        assert_eq!(fields.get("context"), Some(&Value::from("Y3R4")));
        assert!(fields.get("batch").is_none());
    }
}

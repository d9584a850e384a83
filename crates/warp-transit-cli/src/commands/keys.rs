//! keys command - create, inspect, rotate and configure named keys

use anyhow::Result;
use serde_json::Value;
use warp_transit::{FieldMap, Response, TransitEngine};

/// Create a key, returning its metadata
pub async fn create(
    engine: &TransitEngine,
    name: &str,
    derived: bool,
    key_type: Option<&str>,
) -> Result<Response> {
    let mut fields = FieldMap::new();
    fields.insert("derived".into(), Value::Bool(derived));
    if let Some(key_type) = key_type {
        fields.insert("type".into(), Value::from(key_type));
    }
    Ok(engine.write_key(name, &fields).await?)
}

/// Show key metadata
pub async fn read(engine: &TransitEngine, name: &str) -> Result<Response> {
    Ok(engine.read_key(name).await?)
}

/// Add a key version
pub async fn rotate(engine: &TransitEngine, name: &str) -> Result<Response> {
    Ok(engine.rotate_key(name).await?)
}

/// List key names
pub async fn list(engine: &TransitEngine) -> Result<Response> {
    Ok(engine.list_keys().await?)
}

/// Update key settings
pub async fn configure(
    engine: &TransitEngine,
    name: &str,
    min_decryption_version: Option<u32>,
) -> Result<Response> {
    let mut fields = FieldMap::new();
    if let Some(min) = min_decryption_version {
        fields.insert("min_decryption_version".into(), Value::from(min));
    }
    Ok(engine.configure_key(name, &fields).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use warp_transit::{EngineConfig, MemoryStorage};

    fn engine() -> TransitEngine {
        TransitEngine::new(Arc::new(MemoryStorage::new()), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_key_lifecycle() {
        let engine = engine();

        let created = create(&engine, "orders", true, Some("chacha20-poly1305"))
            .await
            .unwrap();
        assert_eq!(created.get("derived"), Some(&json!(true)));

        let rotated = rotate(&engine, "orders").await.unwrap();
        assert_eq!(rotated.get("latest_version"), Some(&json!(2)));

        let configured = configure(&engine, "orders", Some(2)).await.unwrap();
        assert_eq!(configured.get("min_decryption_version"), Some(&json!(2)));

        let info = read(&engine, "orders").await.unwrap();
        assert_eq!(info.get_str("type"), Some("chacha20-poly1305"));

        let listed = list(&engine).await.unwrap();
        assert_eq!(listed.get("keys"), Some(&json!(["orders"])));
    }

    #[tokio::test]
    async fn test_read_missing_key() {
        let err = read(&engine(), "missing").await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}

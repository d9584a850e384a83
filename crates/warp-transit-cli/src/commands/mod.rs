//! CLI command implementations

pub mod crypto;
pub mod keys;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;
use warp_transit::{
    EngineConfig, FileStorage, KeyAlgorithm, MemoryStorage, PolicyStorage, Response,
    TransitEngine,
};
use warp_transit_config::{EngineSettings, StorageBackend, TransitConfig};

/// Translate engine settings into the engine's own configuration
pub fn engine_config(settings: &EngineSettings) -> Result<EngineConfig> {
    let default_algorithm: KeyAlgorithm = settings
        .default_key_type
        .parse()
        .context("Invalid engine.default_key_type")?;

    Ok(EngineConfig {
        max_concurrency: settings.max_concurrency,
        item_timeout: (settings.item_timeout_ms > 0)
            .then(|| Duration::from_millis(settings.item_timeout_ms)),
        upsert_enabled: settings.upsert_enabled,
        default_algorithm,
    })
}

/// Build an engine over the configured storage backend
pub async fn open_engine(config: &TransitConfig) -> Result<TransitEngine> {
    let storage: Arc<dyn PolicyStorage> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::File => {
            let dir = &config.storage.data_dir;
            let storage = FileStorage::open(dir)
                .await
                .with_context(|| format!("Failed to open key storage at {}", dir.display()))?;
            Arc::new(storage)
        }
    };
    debug!(backend = ?config.storage.backend, "Opened key storage");

    Ok(TransitEngine::new(storage, engine_config(&config.engine)?))
}

/// Render a response as pretty JSON
pub fn render(response: &Response) -> Result<String> {
    Ok(serde_json::to_string_pretty(&response.data)?)
}

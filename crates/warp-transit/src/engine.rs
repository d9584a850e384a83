//! Operation handlers
//!
//! The dispatch layer hands each call a loosely typed field map. Handlers
//! turn it into a typed [`Payload`] first, so batch and single-item calls
//! share one execution path: a single item is a one-element batch whose
//! result is lifted to the top level of the response.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::batch::{BatchOperation, BatchProcessor, DEFAULT_MAX_CONCURRENCY};
use crate::codec::{self, BatchItem, PayloadField};
use crate::error::{TransitError, TransitResult};
use crate::key::{KeyAlgorithm, KeyPolicy};
use crate::policy::{PolicyRequest, PolicyStore, PolicyUpdate};
use crate::storage::PolicyStorage;

/// Request and response field map
pub type FieldMap = serde_json::Map<String, Value>;

/// Kind of call made by the dispatch layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create; encrypt may create the key
    Create,
    /// Read
    Read,
    /// Update; the key must already exist
    Update,
}

/// Handler response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Response fields
    pub data: FieldMap,
}

impl Response {
    fn with(field: &str, value: impl Into<Value>) -> Self {
        let mut data = FieldMap::new();
        data.insert(field.to_string(), value.into());
        Self { data }
    }

    fn from_serialize(value: &impl serde::Serialize) -> TransitResult<Self> {
        match serde_json::to_value(value)? {
            Value::Object(data) => Ok(Self { data }),
            other => Err(TransitError::Internal(format!(
                "response is not an object: {other}"
            ))),
        }
    }

    /// Get a field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Get a string field
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Batch items in flight at once across all concurrent calls
    pub max_concurrency: usize,
    /// Per-item time limit
    pub item_timeout: Option<Duration>,
    /// Whether encrypt with [`Operation::Create`] creates missing keys
    pub upsert_enabled: bool,
    /// Key type for keys created without an explicit `type`
    pub default_algorithm: KeyAlgorithm,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            item_timeout: None,
            upsert_enabled: true,
            default_algorithm: KeyAlgorithm::default(),
        }
    }
}

/// Typed request payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Single item given by top-level fields
    Single(BatchItem),
    /// Base64 batch; takes precedence over any top-level item fields
    Batch(String),
}

impl Payload {
    /// Parse the payload for an operation out of a field map
    pub fn from_fields(fields: &FieldMap, field: PayloadField) -> TransitResult<Self> {
        if let Some(batch) = string_field(fields, "batch")? {
            return Ok(Self::Batch(batch));
        }

        let value = string_field(fields, field.as_str())?
            .ok_or_else(|| TransitError::MissingField(field.as_str().to_string()))?;

        let mut item = match field {
            PayloadField::Plaintext => BatchItem::plaintext(value),
            PayloadField::Ciphertext => BatchItem::ciphertext(value),
        };
        item.context = string_field(fields, "context")?;
        item.nonce = string_field(fields, "nonce")?;
        Ok(Self::Single(item))
    }

    /// Whether the caller used batch mode
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Decode into validated items
    pub fn into_items(self, field: PayloadField) -> TransitResult<Vec<BatchItem>> {
        match self {
            Self::Single(item) => Ok(vec![item]),
            Self::Batch(encoded) => codec::decode_batch(&encoded, field),
        }
    }
}

/// Transit engine: policy management and batch-capable crypto handlers
pub struct TransitEngine {
    store: PolicyStore,
    processor: BatchProcessor,
    config: EngineConfig,
}

impl TransitEngine {
    /// Create an engine over a policy storage backend
    pub fn new(storage: Arc<dyn PolicyStorage>, config: EngineConfig) -> Self {
        let processor =
            BatchProcessor::new(config.max_concurrency).with_item_timeout(config.item_timeout);
        Self {
            store: PolicyStore::new(storage),
            processor,
            config,
        }
    }

    /// Underlying policy store
    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a key policy; existing keys are returned unchanged
    pub async fn write_key(&self, name: &str, fields: &FieldMap) -> TransitResult<Response> {
        let request = PolicyRequest {
            derived: bool_field(fields, "derived")?.unwrap_or(false),
            algorithm: self.key_type(fields)?,
        };
        let (policy, _) = self.store.resolve_or_create(name, request).await?;
        Response::from_serialize(&policy.info())
    }

    /// Describe a key policy
    pub async fn read_key(&self, name: &str) -> TransitResult<Response> {
        let policy = self.store.resolve(name).await?;
        Response::from_serialize(&policy.info())
    }

    /// Append a new key version
    pub async fn rotate_key(&self, name: &str) -> TransitResult<Response> {
        let policy = self.store.rotate(name).await?;
        Response::from_serialize(&policy.info())
    }

    /// Update mutable key settings
    pub async fn configure_key(&self, name: &str, fields: &FieldMap) -> TransitResult<Response> {
        let update = PolicyUpdate {
            min_decryption_version: version_field(fields, "min_decryption_version")?,
        };
        let policy = self.store.configure(name, update).await?;
        Response::from_serialize(&policy.info())
    }

    /// List key names
    pub async fn list_keys(&self) -> TransitResult<Response> {
        let keys = self.store.list().await?;
        Ok(Response::with("keys", keys))
    }

    /// Encrypt a plaintext or a batch of plaintexts
    pub async fn encrypt(
        &self,
        operation: Operation,
        name: &str,
        fields: &FieldMap,
    ) -> TransitResult<Response> {
        let payload = Payload::from_fields(fields, PayloadField::Plaintext)?;
        let batched = payload.is_batch();
        let items = payload.into_items(PayloadField::Plaintext)?;

        let policy = if operation == Operation::Create && self.config.upsert_enabled {
            let request = PolicyRequest {
                derived: items.first().is_some_and(BatchItem::has_context),
                algorithm: self.key_type(fields)?,
            };
            self.store.resolve_or_create(name, request).await?.0
        } else {
            self.store.resolve(name).await?
        };

        self.dispatch(policy, BatchOperation::Encrypt, batched, items)
            .await
    }

    /// Decrypt a ciphertext or a batch of ciphertexts
    pub async fn decrypt(&self, name: &str, fields: &FieldMap) -> TransitResult<Response> {
        self.reencode(name, fields, BatchOperation::Decrypt).await
    }

    /// Re-encrypt ciphertexts under the latest key version
    pub async fn rewrap(&self, name: &str, fields: &FieldMap) -> TransitResult<Response> {
        self.reencode(name, fields, BatchOperation::Rewrap).await
    }

    async fn reencode(
        &self,
        name: &str,
        fields: &FieldMap,
        operation: BatchOperation,
    ) -> TransitResult<Response> {
        let payload = Payload::from_fields(fields, PayloadField::Ciphertext)?;
        let batched = payload.is_batch();
        let items = payload.into_items(PayloadField::Ciphertext)?;

        let policy = self.store.resolve(name).await?;
        self.dispatch(policy, operation, batched, items).await
    }

    async fn dispatch(
        &self,
        policy: Arc<KeyPolicy>,
        operation: BatchOperation,
        batched: bool,
        items: Vec<BatchItem>,
    ) -> TransitResult<Response> {
        if batched {
            let results = self.processor.run(policy, operation, items).await;
            return Ok(Response::with(
                "data",
                codec::encode_batch_response(&results)?,
            ));
        }

        debug!(key = %policy.name, ?operation, "Processing single item");
        let value = self
            .processor
            .execute(policy, operation, items)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| TransitError::Internal("single item produced no result".into()))??;
        Ok(Response::with(operation.output_field().as_str(), value))
    }

    fn key_type(&self, fields: &FieldMap) -> TransitResult<KeyAlgorithm> {
        match string_field(fields, "type")? {
            Some(name) if !name.is_empty() => name.parse(),
            _ => Ok(self.config.default_algorithm),
        }
    }
}

fn string_field(fields: &FieldMap, name: &str) -> TransitResult<Option<String>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(TransitError::invalid_field(
            name,
            format!("expected a string, got {other}"),
        )),
    }
}

fn bool_field(fields: &FieldMap, name: &str) -> TransitResult<Option<bool>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.to_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(TransitError::invalid_field(
                name,
                format!("expected a boolean, got {s:?}"),
            )),
        },
        Some(other) => Err(TransitError::invalid_field(
            name,
            format!("expected a boolean, got {other}"),
        )),
    }
}

fn version_field(fields: &FieldMap, name: &str) -> TransitResult<Option<u32>> {
    let invalid = || TransitError::invalid_field(name, "expected a positive version number");
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(invalid),
        Some(Value::String(s)) => s.parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

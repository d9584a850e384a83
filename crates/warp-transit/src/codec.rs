//! Transport codec and batch validation
//!
//! Every binary field crossing the API boundary is standard base64. A batch
//! is decoded in two stages: base64 to raw bytes, then raw bytes to a JSON
//! array of objects. Failures in either stage, and cross-item consistency
//! failures, reject the whole request. Encoding problems inside a single
//! item's values are left for the batch processor to report on that item.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::BatchResponseItem;
use crate::error::{TransitError, TransitResult};

/// Which payload field a batch item is expected to carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadField {
    /// `plaintext` (encrypt)
    Plaintext,
    /// `ciphertext` (decrypt, rewrap)
    Ciphertext,
}

impl PayloadField {
    /// Field name on the wire
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plaintext => "plaintext",
            Self::Ciphertext => "ciphertext",
        }
    }
}

/// One request entry of a batch
///
/// Values are kept in their transport encoding; they are decoded per item
/// during execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Base64 plaintext (encrypt)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext: Option<String>,
    /// Ciphertext envelope (decrypt, rewrap)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    /// Base64 derivation context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Reserved; accepted and ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl BatchItem {
    /// Item carrying a plaintext
    pub fn plaintext(plaintext: impl Into<String>) -> Self {
        Self {
            plaintext: Some(plaintext.into()),
            ..Default::default()
        }
    }

    /// Item carrying a ciphertext
    pub fn ciphertext(ciphertext: impl Into<String>) -> Self {
        Self {
            ciphertext: Some(ciphertext.into()),
            ..Default::default()
        }
    }

    /// Attach a context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Value of the given payload field
    pub fn payload(&self, field: PayloadField) -> Option<&str> {
        match field {
            PayloadField::Plaintext => self.plaintext.as_deref(),
            PayloadField::Ciphertext => self.ciphertext.as_deref(),
        }
    }

    /// Whether a non-empty context was supplied
    pub fn has_context(&self) -> bool {
        self.context.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Encode bytes with the transport encoding
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a transport-encoded field
pub fn decode_base64(field: &str, value: &str) -> TransitResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|_| TransitError::InvalidEncoding(field.to_string()))
}

/// Decode and validate a transport-encoded batch
pub fn decode_batch(encoded: &str, field: PayloadField) -> TransitResult<Vec<BatchItem>> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TransitError::BatchEncoding(e.to_string()))?;

    let items = parse_items(&raw)?;
    validate_batch(&items, field)?;
    Ok(items)
}

fn parse_items(raw: &[u8]) -> TransitResult<Vec<BatchItem>> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| TransitError::BatchShape(e.to_string()))?;

    let Value::Array(entries) = value else {
        return Err(TransitError::BatchShape(format!(
            "expected an array of objects, got {}",
            json_kind(&value)
        )));
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            if !entry.is_object() {
                return Err(TransitError::BatchShape(format!(
                    "batch item {index} is {}, expected an object",
                    json_kind(&entry)
                )));
            }
            serde_json::from_value(entry)
                .map_err(|e| TransitError::BatchShape(format!("batch item {index}: {e}")))
        })
        .collect()
}

/// Cross-item checks applied before any cryptographic work
pub fn validate_batch(items: &[BatchItem], field: PayloadField) -> TransitResult<()> {
    if items.is_empty() {
        return Err(TransitError::EmptyBatch);
    }

    if let Some(index) = items.iter().position(|item| item.payload(field).is_none()) {
        return Err(TransitError::MissingField(format!(
            "{} in batch item {index}",
            field.as_str()
        )));
    }

    // An empty context counts as absent
    let with_context = items.iter().filter(|item| item.has_context()).count();
    if with_context != 0 && with_context != items.len() {
        return Err(TransitError::InconsistentContext);
    }

    Ok(())
}

/// Render batch results as the JSON array returned in `data`
pub fn encode_batch_response(items: &[BatchResponseItem]) -> TransitResult<String> {
    Ok(serde_json::to_string(items)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

//! Transit error types

use std::time::Duration;

use thiserror::Error;

/// Coarse classification handed back to the dispatch layer
///
/// Determines whether a failure aborts the whole call or is recorded
/// against a single batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request was rejected before any cryptographic work started
    RequestMalformed,
    /// The named key policy is missing or unusable for this operation
    Policy,
    /// Failure scoped to one batch item
    Item,
    /// Storage or serialization failure inside the engine
    Internal,
}

/// Transit error type
#[derive(Error, Debug)]
pub enum TransitError {
    /// Outer batch value is not valid base64
    #[error("failed to base64-decode batch input: {0}")]
    BatchEncoding(String),

    /// Decoded batch is not a JSON array of objects
    #[error("failed to parse batch input: {0}")]
    BatchShape(String),

    /// Batch decoded to an empty array
    #[error("missing batch input to process")]
    EmptyBatch,

    /// Some batch items carry a context and some do not
    #[error("context should be set either in all the request blocks or in none of them")]
    InconsistentContext,

    /// A required request field is absent
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A request field has the wrong type or an unusable value
    #[error("invalid value for {field}: {message}")]
    InvalidField {
        /// Field name
        field: String,
        /// Reason the value was rejected
        message: String,
    },

    /// Key name cannot be used as a policy identifier
    #[error("invalid key name: {0:?}")]
    InvalidKeyName(String),

    /// No policy exists under the requested name
    #[error("encryption key not found: {0}")]
    PolicyNotFound(String),

    /// A binary field is not valid base64
    #[error("failed to base64-decode {0}")]
    InvalidEncoding(String),

    /// Derived policy used without a context
    #[error(
        "missing 'context' for key derivation; the key was created using a derived key, \
         which means additional, per-request information must be included in order to \
         perform operations with the key"
    )]
    ContextRequired,

    /// Envelope is malformed or its authentication tag does not verify
    #[error("message authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Ciphertext references a version missing from the policy history
    #[error("key version not found: {0}")]
    VersionNotFound(u32),

    /// Ciphertext version is below the policy's minimum decryption version
    #[error("ciphertext version {version} is disallowed by policy (min decryption version is {min})")]
    VersionDisallowed {
        /// Version embedded in the ciphertext
        version: u32,
        /// Policy's minimum decryption version
        min: u32,
    },

    /// A batch item exceeded the configured time limit
    #[error("item processing timed out after {0:?}")]
    Timeout(Duration),

    /// Policy storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Policy (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("internal transit error: {0}")]
    Internal(String),
}

impl TransitError {
    /// Classify this error for the dispatch layer
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::BatchEncoding(_)
            | Self::BatchShape(_)
            | Self::EmptyBatch
            | Self::InconsistentContext
            | Self::MissingField(_)
            | Self::InvalidField { .. }
            | Self::InvalidKeyName(_) => ErrorClass::RequestMalformed,
            Self::PolicyNotFound(_) => ErrorClass::Policy,
            Self::InvalidEncoding(_)
            | Self::ContextRequired
            | Self::AuthenticationFailed(_)
            | Self::VersionNotFound(_)
            | Self::VersionDisallowed { .. }
            | Self::Timeout(_) => ErrorClass::Item,
            Self::Storage(_) | Self::Serialization(_) | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// HTTP-style status code for a failed call carrying this error
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::RequestMalformed | ErrorClass::Policy | ErrorClass::Item => 400,
            ErrorClass::Internal => 500,
        }
    }

    pub(crate) fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TransitError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for TransitError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for transit operations
pub type TransitResult<T> = Result<T, TransitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_level_classes() {
        assert_eq!(
            TransitError::BatchEncoding("bad".into()).class(),
            ErrorClass::RequestMalformed
        );
        assert_eq!(
            TransitError::InconsistentContext.class(),
            ErrorClass::RequestMalformed
        );
        assert_eq!(
            TransitError::PolicyNotFound("k".into()).class(),
            ErrorClass::Policy
        );
    }

    #[test]
    fn test_item_level_classes() {
        assert_eq!(TransitError::ContextRequired.class(), ErrorClass::Item);
        assert_eq!(TransitError::VersionNotFound(3).class(), ErrorClass::Item);
        assert_eq!(
            TransitError::InvalidEncoding("plaintext".into()).class(),
            ErrorClass::Item
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TransitError::EmptyBatch.status_code(), 400);
        assert_eq!(TransitError::Storage("disk".into()).status_code(), 500);
    }
}

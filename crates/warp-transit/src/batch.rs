//! Batch orchestration
//!
//! Every item of a validated batch runs as its own task. A semaphore bounds
//! how many items are in flight and the AEAD work itself runs on the
//! blocking pool. Results are collected by index, so the response order
//! always matches the request order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::cipher;
use crate::codec::{self, BatchItem, PayloadField};
use crate::error::{TransitError, TransitResult};
use crate::key::KeyPolicy;

/// Default number of items processed concurrently
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Cryptographic operation applied to every item of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    /// Plaintext to ciphertext under the latest version
    Encrypt,
    /// Ciphertext to plaintext under the embedded version
    Decrypt,
    /// Ciphertext to ciphertext under the latest version
    Rewrap,
}

impl BatchOperation {
    /// Field each request item must carry
    pub const fn payload_field(&self) -> PayloadField {
        match self {
            Self::Encrypt => PayloadField::Plaintext,
            Self::Decrypt | Self::Rewrap => PayloadField::Ciphertext,
        }
    }

    /// Field each successful response item carries
    pub const fn output_field(&self) -> PayloadField {
        match self {
            Self::Encrypt | Self::Rewrap => PayloadField::Ciphertext,
            Self::Decrypt => PayloadField::Plaintext,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::Rewrap => "rewrap",
        }
    }
}

/// One entry of a batch response; exactly one field is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponseItem {
    /// Ciphertext envelope (encrypt, rewrap)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    /// Base64 plaintext (decrypt)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext: Option<String>,
    /// Error message for a failed item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResponseItem {
    /// Successful item
    pub fn success(field: PayloadField, value: String) -> Self {
        match field {
            PayloadField::Ciphertext => Self {
                ciphertext: Some(value),
                ..Default::default()
            },
            PayloadField::Plaintext => Self {
                plaintext: Some(value),
                ..Default::default()
            },
        }
    }

    /// Failed item
    pub fn failure(error: &TransitError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Whether this item failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Bounded-concurrency batch executor
///
/// The limit covers every batch run through one processor (and its clones),
/// not each call separately.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    semaphore: Arc<Semaphore>,
    item_timeout: Option<Duration>,
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl BatchProcessor {
    /// Create a processor running at most `max_concurrency` items at once
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            item_timeout: None,
        }
    }

    /// Set a per-item time limit
    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Run a batch and render each result as a response item
    pub async fn run(
        &self,
        policy: Arc<KeyPolicy>,
        operation: BatchOperation,
        items: Vec<BatchItem>,
    ) -> Vec<BatchResponseItem> {
        let key = policy.name.clone();
        let total = items.len();
        let field = operation.output_field();

        let responses: Vec<BatchResponseItem> = self
            .execute(policy, operation, items)
            .await
            .into_iter()
            .map(|result| match result {
                Ok(value) => BatchResponseItem::success(field, value),
                Err(e) => BatchResponseItem::failure(&e),
            })
            .collect();

        let failed = responses.iter().filter(|r| r.is_error()).count();
        debug!(
            key = %key,
            operation = operation.name(),
            items = total,
            failed,
            "Batch completed"
        );
        responses
    }

    /// Run a batch, returning the typed result of every item in input order
    pub async fn execute(
        &self,
        policy: Arc<KeyPolicy>,
        operation: BatchOperation,
        items: Vec<BatchItem>,
    ) -> Vec<TransitResult<String>> {
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let semaphore = Arc::clone(&self.semaphore);
            let policy = Arc::clone(&policy);
            let timeout = self.item_timeout;

            handles.push(tokio::spawn(run_bounded(semaphore, timeout, move || {
                process_item(&policy, operation, &item)
            })));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(TransitError::Internal(format!("Task join error: {}", e))),
            };
            if let Err(ref e) = result {
                trace!(index, error = %e, "Batch item failed");
            }
            results.push(result);
        }
        results
    }
}

/// Run blocking work once a permit is available
///
/// The permit moves into the blocking task, so an item that times out keeps
/// its slot until the work itself returns.
async fn run_bounded<T, F>(
    semaphore: Arc<Semaphore>,
    timeout: Option<Duration>,
    work: F,
) -> TransitResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> TransitResult<T> + Send + 'static,
{
    let permit = semaphore
        .acquire_owned()
        .await
        .map_err(|_| TransitError::Internal("concurrency semaphore closed".into()))?;

    let task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        work()
    });

    let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| TransitError::Timeout(limit))?,
        None => task.await,
    };
    joined.map_err(|e| TransitError::Internal(format!("Item task failed: {}", e)))?
}

/// Apply one operation to one item
pub fn process_item(
    policy: &KeyPolicy,
    operation: BatchOperation,
    item: &BatchItem,
) -> TransitResult<String> {
    let context = item_context(policy, item)?;
    let context = context.as_deref().map(|c| c.as_slice());

    let payload = item
        .payload(operation.payload_field())
        .ok_or_else(|| TransitError::MissingField(operation.payload_field().as_str().to_string()))?;

    match operation {
        BatchOperation::Encrypt => {
            let plaintext = Zeroizing::new(codec::decode_base64("plaintext", payload)?);
            cipher::encrypt(policy, &plaintext, context)
        }
        BatchOperation::Decrypt => {
            let plaintext = Zeroizing::new(cipher::decrypt(policy, payload, context)?);
            Ok(codec::encode_base64(&plaintext))
        }
        BatchOperation::Rewrap => {
            let plaintext = Zeroizing::new(cipher::decrypt(policy, payload, context)?);
            cipher::encrypt(policy, &plaintext, context)
        }
    }
}

fn item_context(policy: &KeyPolicy, item: &BatchItem) -> TransitResult<Option<Zeroizing<Vec<u8>>>> {
    let Some(encoded) = item.context.as_deref() else {
        return Ok(None);
    };
    if !policy.derived {
        trace!(key = %policy.name, "Ignoring context for non-derived key");
        return Ok(None);
    }
    Ok(Some(Zeroizing::new(codec::decode_base64("context", encoded)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyAlgorithm;

    fn encode(bytes: &[u8]) -> String {
        codec::encode_base64(bytes)
    }

    fn policy(derived: bool) -> Arc<KeyPolicy> {
        Arc::new(KeyPolicy::generate("batch", KeyAlgorithm::Aes256Gcm96, derived))
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let policy = policy(false);
        let processor = BatchProcessor::new(3);

        let items: Vec<BatchItem> = (0..40)
            .map(|i| BatchItem::plaintext(encode(format!("item-{i}").as_bytes())))
            .collect();
        let encrypted = processor
            .run(Arc::clone(&policy), BatchOperation::Encrypt, items)
            .await;

        let items: Vec<BatchItem> = encrypted
            .iter()
            .map(|r| BatchItem::ciphertext(r.ciphertext.clone().unwrap()))
            .collect();
        let decrypted = processor.run(policy, BatchOperation::Decrypt, items).await;

        for (i, response) in decrypted.iter().enumerate() {
            assert_eq!(
                response.plaintext.as_deref(),
                Some(encode(format!("item-{i}").as_bytes()).as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_item_failure_isolated() {
        let policy = policy(true);
        let items = vec![
            BatchItem::plaintext(encode(b"ok")).with_context(encode(b"tenant")),
            BatchItem::plaintext("simple_plaintext").with_context("not-encoded"),
            BatchItem::plaintext(encode(b"also ok")).with_context(encode(b"tenant")),
        ];

        let responses = BatchProcessor::default()
            .run(policy, BatchOperation::Encrypt, items)
            .await;

        assert_eq!(responses.len(), 3);
        assert!(responses[0].ciphertext.is_some());
        assert!(responses[1].is_error());
        assert!(responses[1].ciphertext.is_none());
        assert!(responses[2].ciphertext.is_some());
    }

    #[tokio::test]
    async fn test_execute_typed_errors() {
        let policy = policy(false);
        let items = vec![
            BatchItem::plaintext("not base64!"),
            BatchItem::ciphertext("warp:v1:AAAA"),
        ];

        let results = BatchProcessor::default()
            .execute(Arc::clone(&policy), BatchOperation::Encrypt, items[..1].to_vec())
            .await;
        assert!(matches!(results[0], Err(TransitError::InvalidEncoding(ref f)) if f == "plaintext"));

        let results = BatchProcessor::default()
            .execute(policy, BatchOperation::Decrypt, items[1..].to_vec())
            .await;
        assert!(matches!(results[0], Err(TransitError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_context_ignored_for_non_derived() {
        let policy = policy(false);
        let item = BatchItem::plaintext(encode(b"data")).with_context("not-encoded");

        let ciphertext = process_item(&policy, BatchOperation::Encrypt, &item).unwrap();
        let decrypted =
            process_item(&policy, BatchOperation::Decrypt, &BatchItem::ciphertext(ciphertext))
                .unwrap();
        assert_eq!(decrypted, encode(b"data"));
    }

    #[tokio::test]
    async fn test_rewrap_moves_to_latest() {
        let policy = KeyPolicy::generate("batch", KeyAlgorithm::Aes256Gcm96, false);
        let old = cipher::encrypt(&policy, b"payload", None).unwrap();
        let policy = Arc::new(policy.rotated());

        let results = BatchProcessor::default()
            .execute(
                Arc::clone(&policy),
                BatchOperation::Rewrap,
                vec![BatchItem::ciphertext(old)],
            )
            .await;
        let rewrapped = results.into_iter().next().unwrap().unwrap();

        assert!(rewrapped.starts_with("warp:v2:"));
        assert_eq!(cipher::decrypt(&policy, &rewrapped, None).unwrap(), b"payload");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_permit_still_completes() {
        let policy = policy(false);
        let items: Vec<BatchItem> = (0..8)
            .map(|_| BatchItem::plaintext(encode(b"x")))
            .collect();

        let responses = BatchProcessor::new(0)
            .run(policy, BatchOperation::Encrypt, items)
            .await;
        assert_eq!(responses.len(), 8);
        assert!(responses.iter().all(|r| r.ciphertext.is_some()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_item_keeps_its_permit() {
        let semaphore = Arc::new(Semaphore::new(1));

        let result = run_bounded(
            Arc::clone(&semaphore),
            Some(Duration::from_millis(10)),
            || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(TransitError::Timeout(_))));
        assert_eq!(semaphore.available_permits(), 0);

        let permit = tokio::time::timeout(Duration::from_secs(5), semaphore.acquire())
            .await
            .expect("permit released once the blocking work ends");
        assert!(permit.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_limit_shared_across_calls() {
        let processor = BatchProcessor::new(1);
        let held = Arc::clone(&processor.semaphore)
            .acquire_owned()
            .await
            .unwrap();

        let other = processor.clone();
        let pending = tokio::spawn(async move {
            other
                .run(policy(false), BatchOperation::Encrypt, vec![BatchItem::plaintext(encode(b"x"))])
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        drop(held);
        let responses = pending.await.unwrap();
        assert!(responses[0].ciphertext.is_some());
    }

    #[test]
    fn test_response_item_serialization() {
        let ok = BatchResponseItem::success(PayloadField::Ciphertext, "warp:v1:abc".into());
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"ciphertext":"warp:v1:abc"}"#
        );

        let err = BatchResponseItem::failure(&TransitError::ContextRequired);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.starts_with(r#"{"error":"#));
    }
}

//! Key policy store
//!
//! Resolves policies by name on top of a [`PolicyStorage`] backend. Loaded
//! policies are cached as immutable `Arc` snapshots so readers never wait
//! on writers. Creation and version appends for one name are serialized
//! through a per-name async mutex; the losing side of a concurrent
//! get-or-create observes the winner's policy.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{TransitError, TransitResult};
use crate::key::{KeyAlgorithm, KeyPolicy, KeyVersion};
use crate::storage::PolicyStorage;

/// Parameters for a policy created on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyRequest {
    /// Derived-key mode
    pub derived: bool,
    /// AEAD algorithm
    pub algorithm: KeyAlgorithm,
}

/// Mutable policy settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyUpdate {
    /// New minimum decryption version
    pub min_decryption_version: Option<u32>,
}

/// Named key policy store
pub struct PolicyStore {
    storage: Arc<dyn PolicyStorage>,
    cache: DashMap<String, Arc<KeyPolicy>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PolicyStore {
    /// Create a store over a storage backend
    pub fn new(storage: Arc<dyn PolicyStorage>) -> Self {
        Self {
            storage,
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Look up a policy, returning `None` if it does not exist
    pub async fn lookup(&self, name: &str) -> TransitResult<Option<Arc<KeyPolicy>>> {
        validate_name(name)?;

        if let Some(cached) = self.cache.get(name) {
            return Ok(Some(Arc::clone(cached.value())));
        }

        let Some(bytes) = self.storage.get(name).await? else {
            return Ok(None);
        };

        let policy = Arc::new(KeyPolicy::from_bytes(&bytes)?);
        if policy.name != name {
            return Err(TransitError::Serialization(format!(
                "stored policy under {name} is named {}",
                policy.name
            )));
        }

        // A concurrent loader may have won; keep whichever landed first.
        let entry = self
            .cache
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&policy));
        debug!(key = %name, version = %entry.latest_version, "Loaded policy");
        Ok(Some(Arc::clone(entry.value())))
    }

    /// Resolve an existing policy
    pub async fn resolve(&self, name: &str) -> TransitResult<Arc<KeyPolicy>> {
        self.lookup(name)
            .await?
            .ok_or_else(|| TransitError::PolicyNotFound(name.to_string()))
    }

    /// Resolve a policy, creating it if it does not exist
    ///
    /// Returns the policy and whether this call created it.
    pub async fn resolve_or_create(
        &self,
        name: &str,
        request: PolicyRequest,
    ) -> TransitResult<(Arc<KeyPolicy>, bool)> {
        if let Some(existing) = self.lookup(name).await? {
            return Ok((existing, false));
        }

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        if let Some(existing) = self.lookup(name).await? {
            return Ok((existing, false));
        }

        let policy = KeyPolicy::generate(name, request.algorithm, request.derived);
        let policy = self.commit(policy).await?;

        info!(
            key = %name,
            key_type = %request.algorithm,
            derived = request.derived,
            "Created key policy"
        );
        Ok((policy, true))
    }

    /// Get one version of a policy's key history
    pub async fn version_at(&self, name: &str, version: u32) -> TransitResult<KeyVersion> {
        let policy = self.resolve(name).await?;
        policy.version(version).cloned()
    }

    /// Append a new key version
    pub async fn rotate(&self, name: &str) -> TransitResult<Arc<KeyPolicy>> {
        // Policies are never deleted, so a name that resolves now still
        // exists once the lock is held
        self.resolve(name).await?;
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let current = self.resolve(name).await?;
        let policy = self.commit(current.rotated()).await?;

        info!(key = %name, version = %policy.latest_version, "Rotated key");
        Ok(policy)
    }

    /// Apply mutable settings to a policy
    pub async fn configure(&self, name: &str, update: PolicyUpdate) -> TransitResult<Arc<KeyPolicy>> {
        self.resolve(name).await?;
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let current = self.resolve(name).await?;
        let Some(min) = update.min_decryption_version else {
            return Ok(current);
        };
        if min == current.min_decryption_version {
            return Ok(current);
        }

        let policy = self.commit(current.with_min_decryption_version(min)?).await?;
        info!(key = %name, min_decryption_version = min, "Updated key configuration");
        Ok(policy)
    }

    /// List stored policy names
    pub async fn list(&self) -> TransitResult<Vec<String>> {
        self.storage.list().await
    }

    /// Persist a snapshot, then publish it to readers
    async fn commit(&self, policy: KeyPolicy) -> TransitResult<Arc<KeyPolicy>> {
        self.storage.put(&policy.name, policy.to_bytes()?).await?;
        let policy = Arc::new(policy);
        self.cache.insert(policy.name.clone(), Arc::clone(&policy));
        Ok(policy)
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }
}

fn validate_name(name: &str) -> TransitResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(TransitError::InvalidKeyName(name.to_string()));
    }
    Ok(())
}

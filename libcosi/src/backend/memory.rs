//! In-memory storage backend.
//!
//! [`MemoryBackend`] keeps each bucket as a set of object keys in a
//! concurrent map.  Nothing survives the process; it exists for development
//! clusters and for exercising orchestrator logic against a real driver
//! without any infrastructure.
//!
//! Object keys can be added with [`MemoryBackend::put_object`] so the
//! non-empty delete policy can be exercised.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::StorageBackend;
use crate::error::CosiError;
use crate::types::{BucketId, Parameters};

/// Parameter key recording which backend holds the bucket.
pub const PARAM_BACKEND: &str = "backend";

#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Object keys per provisioned bucket.
    buckets: DashMap<BucketId, BTreeSet<String>>,
    /// Artificial provisioning latency in milliseconds.
    provision_delay_ms: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object key in a provisioned bucket.
    pub fn put_object(&self, bucket_id: &BucketId, key: impl Into<String>) -> Result<(), CosiError> {
        let mut objects = self
            .buckets
            .get_mut(bucket_id)
            .ok_or_else(|| CosiError::NotFound(format!("bucket {bucket_id}")))?;
        objects.insert(key.into());
        Ok(())
    }

    /// Whether storage for `bucket_id` is provisioned.
    pub fn contains(&self, bucket_id: &BucketId) -> bool {
        self.buckets.contains_key(bucket_id)
    }

    pub fn object_count(&self, bucket_id: &BucketId) -> usize {
        self.buckets.get(bucket_id).map_or(0, |objects| objects.len())
    }

    /// Make every subsequent `provision` call take at least `delay`.
    pub fn set_provision_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.provision_delay_ms.store(ms, Ordering::Relaxed);
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn default_endpoint(&self) -> String {
        "memory://".to_owned()
    }

    async fn provision(
        &self,
        bucket_id: &BucketId,
        parameters: &Parameters,
    ) -> Result<Parameters, CosiError> {
        let delay = self.provision_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.buckets.entry(bucket_id.clone()).or_default();
        debug!(%bucket_id, "memory bucket provisioned");

        let mut applied = parameters.clone();
        applied.insert(PARAM_BACKEND.to_owned(), self.kind().to_owned());
        Ok(applied)
    }

    async fn exists(&self, bucket_id: &BucketId) -> Result<bool, CosiError> {
        Ok(self.contains(bucket_id))
    }

    async fn is_empty(&self, bucket_id: &BucketId) -> Result<bool, CosiError> {
        Ok(self.object_count(bucket_id) == 0)
    }

    async fn destroy(&self, bucket_id: &BucketId) -> Result<(), CosiError> {
        self.buckets.remove(bucket_id);
        Ok(())
    }
}

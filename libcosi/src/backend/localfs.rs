//! Local filesystem storage backend for COSI.
//!
//! [`LocalFsBackend`] stores each bucket as a directory under a configurable
//! `object_root`.  The driver's catalog (buckets, grants, name generations)
//! is persisted next to them so a restarted driver can [`recover`] it.
//!
//! # On-disk layout
//!
//! ```text
//! <object_root>/
//!   catalog.json        # Persisted COSI catalog (used for recovery)
//!   <bucket-id>/        # Bucket contents
//! ```
//!
//! [`recover`]: crate::backend::Driver::recover

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::StorageBackend;
use crate::catalog::CatalogSnapshot;
use crate::error::CosiError;
use crate::types::{BucketId, Parameters};

/// Parameter key recording the bucket's directory.
pub const PARAM_PATH: &str = "path";

const CATALOG_FILE: &str = "catalog.json";
const CATALOG_TMP_FILE: &str = "catalog.json.tmp";

#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    /// Root directory for all bucket directories and the catalog.
    object_root: PathBuf,
}

impl LocalFsBackend {
    pub fn new(object_root: impl Into<PathBuf>) -> Self {
        Self {
            object_root: object_root.into(),
        }
    }

    pub fn object_root(&self) -> &Path {
        &self.object_root
    }

    /// Resolve the on-disk directory for a given bucket.
    pub fn bucket_root(&self, bucket_id: &BucketId) -> PathBuf {
        self.object_root.join(bucket_id.as_str())
    }

    fn catalog_path(&self) -> PathBuf {
        self.object_root.join(CATALOG_FILE)
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    fn kind(&self) -> &'static str {
        "localfs"
    }

    fn default_endpoint(&self) -> String {
        format!("file://{}", self.object_root.display())
    }

    async fn provision(
        &self,
        bucket_id: &BucketId,
        parameters: &Parameters,
    ) -> Result<Parameters, CosiError> {
        let root = self.bucket_root(bucket_id);
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            CosiError::unavailable(format!("create dir {}: {e}", root.display()))
        })?;
        debug!(%bucket_id, path = %root.display(), "bucket directory ready");

        let mut applied = parameters.clone();
        applied.insert(PARAM_PATH.to_owned(), root.to_string_lossy().into_owned());
        Ok(applied)
    }

    async fn exists(&self, bucket_id: &BucketId) -> Result<bool, CosiError> {
        match tokio::fs::metadata(self.bucket_root(bucket_id)).await {
            Ok(m) => Ok(m.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_empty(&self, bucket_id: &BucketId) -> Result<bool, CosiError> {
        let root = self.bucket_root(bucket_id);
        let mut dir = match tokio::fs::read_dir(&root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                return Err(CosiError::unavailable(format!(
                    "read_dir {}: {e}",
                    root.display()
                )));
            }
        };
        let first = dir
            .next_entry()
            .await
            .map_err(|e| CosiError::unavailable(format!("read_dir {}: {e}", root.display())))?;
        Ok(first.is_none())
    }

    async fn destroy(&self, bucket_id: &BucketId) -> Result<(), CosiError> {
        let root = self.bucket_root(bucket_id);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                debug!(%bucket_id, path = %root.display(), "bucket directory removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CosiError::unavailable(format!(
                "remove dir {}: {e}",
                root.display()
            ))),
        }
    }

    async fn probe(&self) -> Result<bool, CosiError> {
        // Healthy when the object root exists and is a directory.
        let exists = tokio::fs::metadata(&self.object_root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        Ok(exists)
    }

    async fn save_catalog(&self, snapshot: &CatalogSnapshot) -> Result<(), CosiError> {
        tokio::fs::create_dir_all(&self.object_root)
            .await
            .map_err(|e| {
                CosiError::unavailable(format!("create dir {}: {e}", self.object_root.display()))
            })?;

        // Write to a temp file and rename so a crash never leaves a torn
        // catalog behind.
        let json = serde_json::to_vec_pretty(snapshot).map_err(CosiError::internal)?;
        let tmp = self.object_root.join(CATALOG_TMP_FILE);
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| CosiError::unavailable(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, self.catalog_path())
            .await
            .map_err(|e| CosiError::unavailable(format!("rename {}: {e}", tmp.display())))?;
        Ok(())
    }

    async fn load_catalog(&self) -> Result<Option<CatalogSnapshot>, CosiError> {
        let path = self.catalog_path();
        let json = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            // Nothing to recover if the catalog does not exist yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CosiError::unavailable(format!("read {}: {e}", path.display())));
            }
        };
        let snapshot: CatalogSnapshot = serde_json::from_slice(&json)
            .map_err(|e| CosiError::Internal(format!("parse {}: {e}", path.display())))?;
        info!(
            object_root = %self.object_root.display(),
            count = snapshot.buckets.len(),
            "loaded saved catalog",
        );
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Driver;
    use crate::config::DriverConfig;
    use crate::controller::CosiController;
    use crate::identity::CosiIdentity;
    use crate::types::*;

    fn make_driver(dir: &Path) -> Driver<LocalFsBackend> {
        Driver::new(LocalFsBackend::new(dir), &DriverConfig::default())
    }

    #[tokio::test]
    async fn create_and_delete_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = make_driver(tmp.path());

        let bucket = driver
            .create_bucket(BucketRequest::new("test-bucket"))
            .await
            .unwrap();

        let root = driver.storage().bucket_root(&bucket.bucket_id);
        assert!(root.is_dir());
        assert_eq!(bucket.parameters[PARAM_PATH], root.to_string_lossy());
        // The catalog must be written to disk.
        assert!(tmp.path().join(CATALOG_FILE).exists());

        driver.delete_bucket(&bucket.bucket_id).await.unwrap();
        assert!(!root.exists());
        assert_eq!(driver.bucket_state(&bucket.bucket_id), None);

        // Deleting again is a no-op.
        driver.delete_bucket(&bucket.bucket_id).await.unwrap();
    }

    #[tokio::test]
    async fn non_empty_directory_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = make_driver(tmp.path());
        let bucket = driver
            .create_bucket(BucketRequest::new("data-bucket"))
            .await
            .unwrap();
        let root = driver.storage().bucket_root(&bucket.bucket_id);
        tokio::fs::write(root.join("object"), b"payload").await.unwrap();

        let err = driver.delete_bucket(&bucket.bucket_id).await.unwrap_err();
        assert!(matches!(err, CosiError::FailedPrecondition(_)));
        assert!(root.join("object").exists());
        assert_eq!(driver.bucket_state(&bucket.bucket_id), Some(BucketState::Active));
    }

    #[tokio::test]
    async fn recover_restores_state() {
        let tmp = tempfile::tempdir().unwrap();

        // Create a bucket and a grant in the first driver instance.
        let (bucket, cred) = {
            let driver = make_driver(tmp.path());
            let bucket = driver
                .create_bucket(BucketRequest::new("persistent").with_idempotency_token("tok"))
                .await
                .unwrap();
            let cred = driver
                .grant_bucket_access(AccessGrant::new(bucket.bucket_id.clone(), "svc-a"))
                .await
                .unwrap();
            (bucket, cred)
        };

        // A fresh driver instance must recover both via recover().
        let driver = make_driver(tmp.path());
        assert_eq!(driver.bucket_state(&bucket.bucket_id), None);
        driver.recover().await.unwrap();

        assert_eq!(driver.bucket_state(&bucket.bucket_id), Some(BucketState::Active));
        assert!(driver.check_access(&cred));
        let again = driver
            .create_bucket(BucketRequest::new("persistent").with_idempotency_token("tok"))
            .await
            .unwrap();
        assert_eq!(again.bucket_id, bucket.bucket_id);
        let same = driver
            .grant_bucket_access(AccessGrant::new(bucket.bucket_id.clone(), "svc-a"))
            .await
            .unwrap();
        assert_eq!(same, cred);
    }

    #[tokio::test]
    async fn recover_on_used_driver_keeps_saving() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = make_driver(tmp.path());
        for name in ["one-a", "two-a", "three-a"] {
            driver.create_bucket(BucketRequest::new(name)).await.unwrap();
        }

        // Revisions restart after recovery; later saves must not be skipped.
        driver.recover().await.unwrap();
        for name in ["one-b", "two-b", "three-b"] {
            driver.create_bucket(BucketRequest::new(name)).await.unwrap();
        }

        let fresh = make_driver(tmp.path());
        fresh.recover().await.unwrap();
        assert_eq!(fresh.bucket_count(), 6);
        assert_eq!(
            fresh.bucket_state(&BucketId::for_name("three-b", 1)),
            Some(BucketState::Active)
        );
    }

    #[tokio::test]
    async fn recover_rewrites_catalog_without_missing_buckets() {
        let tmp = tempfile::tempdir().unwrap();
        let lost = {
            let driver = make_driver(tmp.path());
            driver.create_bucket(BucketRequest::new("kept")).await.unwrap();
            driver.create_bucket(BucketRequest::new("lost")).await.unwrap()
        };
        std::fs::remove_dir_all(tmp.path().join(lost.bucket_id.as_str())).unwrap();

        make_driver(tmp.path()).recover().await.unwrap();
        let saved = LocalFsBackend::new(tmp.path())
            .load_catalog()
            .await
            .unwrap()
            .expect("catalog present");
        assert_eq!(saved.buckets.len(), 1);
        assert_eq!(saved.buckets[0].bucket.name, "kept");
    }

    #[tokio::test]
    async fn recover_skips_missing_directories_and_keeps_generations() {
        let tmp = tempfile::tempdir().unwrap();
        let first = {
            let driver = make_driver(tmp.path());
            let gone = driver
                .create_bucket(BucketRequest::new("gone"))
                .await
                .unwrap();
            driver.delete_bucket(&gone.bucket_id).await.unwrap();
            driver
                .create_bucket(BucketRequest::new("vanished"))
                .await
                .unwrap()
        };
        std::fs::remove_dir_all(tmp.path().join(first.bucket_id.as_str())).unwrap();

        let driver = make_driver(tmp.path());
        driver.recover().await.unwrap();
        assert_eq!(driver.bucket_count(), 0);

        // The identifier of a deleted bucket is not handed out again.
        let reborn = driver
            .create_bucket(BucketRequest::new("gone"))
            .await
            .unwrap();
        assert_eq!(reborn.bucket_id.as_str(), "b-gone_2");
    }

    #[tokio::test]
    async fn probe_healthy_root() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = make_driver(tmp.path());
        assert!(driver.probe().await.unwrap());
    }

    #[tokio::test]
    async fn probe_missing_root() {
        let driver = make_driver(Path::new("/nonexistent/path/for/test"));
        assert!(!driver.probe().await.unwrap());
    }
}

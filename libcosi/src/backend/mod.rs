//! Pluggable storage backend implementations.
//!
//! A backend only knows how to provision and destroy storage and how to
//! persist the catalog.  [`Driver`] wraps any [`StorageBackend`] and
//! implements [`CosiIdentity`] and [`CosiController`] on top of it, so the
//! contract's idempotency, state machine and grant rules are enforced the
//! same way for every backend.
//!
//! The concrete driver is picked once at startup by [`from_config`] and
//! handed around as `Arc<dyn CosiDriver>`.

pub mod localfs;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{Catalog, CatalogSnapshot, CreatePlan, DeletePlan, GrantOutcome};
use crate::config::{BackendKind, DriverConfig, GrantConflictPolicy};
use crate::controller::CosiController;
use crate::error::CosiError;
use crate::identity::CosiIdentity;
use crate::types::*;

pub use localfs::LocalFsBackend;
pub use memory::MemoryBackend;

/// A full COSI driver: identity plus controller.
pub trait CosiDriver: CosiIdentity + CosiController {}

impl<T: CosiIdentity + CosiController + ?Sized> CosiDriver for T {}

/// Storage side effects of one backend.
///
/// Every method must be idempotent: the driver calls `provision` again for
/// the same identifier when a create is retried after a failure or
/// cancellation, and `destroy` again when a delete is retried.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Short backend name used in logs.
    fn kind(&self) -> &'static str;

    /// Endpoint advertised in credentials when none is configured.
    fn default_endpoint(&self) -> String;

    /// Create (or reuse) storage for `bucket_id` and return the parameters
    /// actually applied.
    async fn provision(
        &self,
        bucket_id: &BucketId,
        parameters: &Parameters,
    ) -> Result<Parameters, CosiError>;

    /// Whether storage for the bucket is present.
    async fn exists(&self, bucket_id: &BucketId) -> Result<bool, CosiError>;

    /// Whether the bucket holds no objects.  Missing storage counts as empty.
    async fn is_empty(&self, bucket_id: &BucketId) -> Result<bool, CosiError>;

    /// Remove the bucket's storage and contents.  Missing storage is not an
    /// error.
    async fn destroy(&self, bucket_id: &BucketId) -> Result<(), CosiError>;

    /// Readiness of the underlying storage.
    async fn probe(&self) -> Result<bool, CosiError> {
        Ok(true)
    }

    /// Durably record the catalog.
    async fn save_catalog(&self, _snapshot: &CatalogSnapshot) -> Result<(), CosiError> {
        Ok(())
    }

    /// Load the catalog recorded by a previous process, if any.
    async fn load_catalog(&self) -> Result<Option<CatalogSnapshot>, CosiError> {
        Ok(None)
    }
}

/// Policy knobs of a [`Driver`], taken from [`DriverConfig`].
#[derive(Debug, Clone)]
pub struct DriverPolicy {
    pub force_delete: bool,
    pub grant_conflict: GrantConflictPolicy,
    pub max_buckets: Option<usize>,
}

impl From<&DriverConfig> for DriverPolicy {
    fn from(config: &DriverConfig) -> Self {
        Self {
            force_delete: config.force_delete,
            grant_conflict: config.grant_conflict,
            max_buckets: config.max_buckets,
        }
    }
}

/// COSI driver over a [`StorageBackend`].
///
/// # Thread safety
///
/// The catalog sits behind a synchronous mutex that is never held across an
/// `.await`.  Slow storage work runs between a `begin_*` and `commit_*`
/// transition; while it runs the bucket is `provisioning` or `deleting`, and
/// if the operation future is dropped a rollback guard restores the previous
/// state so a retry starts from scratch.
pub struct Driver<S> {
    storage: S,
    catalog: Mutex<Catalog>,
    /// Revision of the last snapshot handed to `save_catalog`; `None` when
    /// the saved catalog is known to differ from memory.
    persisted: tokio::sync::Mutex<Option<u64>>,
    policy: DriverPolicy,
    info: DriverInfo,
    endpoint: String,
    region: String,
}

/// Runs `undo` on drop unless disarmed.
struct Rollback<F: FnOnce()> {
    undo: Option<F>,
}

impl<F: FnOnce()> Rollback<F> {
    fn new(undo: F) -> Self {
        Self { undo: Some(undo) }
    }

    fn disarm(mut self) {
        self.undo = None;
    }
}

impl<F: FnOnce()> Drop for Rollback<F> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

impl<S: StorageBackend> Driver<S> {
    pub fn new(storage: S, config: &DriverConfig) -> Self {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| storage.default_endpoint());
        Self {
            storage,
            catalog: Mutex::new(Catalog::new()),
            persisted: tokio::sync::Mutex::new(Some(0)),
            policy: DriverPolicy::from(config),
            info: DriverInfo {
                name: config.driver_name.clone(),
                vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            endpoint,
            region: config.region.clone(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn policy(&self) -> &DriverPolicy {
        &self.policy
    }

    /// Current lifecycle state of a bucket; `None` means absent.
    pub fn bucket_state(&self, bucket_id: &BucketId) -> Option<BucketState> {
        self.catalog.lock().state(bucket_id)
    }

    /// Number of tracked buckets in any state.
    pub fn bucket_count(&self) -> usize {
        self.catalog.lock().len()
    }

    /// Backend access check: whether `credential` would currently be
    /// honoured for the bucket it was issued for.
    pub fn check_access(&self, credential: &Credential) -> bool {
        self.catalog.lock().check_access(credential)
    }

    /// Restore the catalog saved by a previous process.
    ///
    /// Buckets whose storage has disappeared are skipped with a warning
    /// rather than failing recovery.
    pub async fn recover(&self) -> Result<(), CosiError> {
        let Some(mut snapshot) = self.storage.load_catalog().await? else {
            debug!(backend = self.storage.kind(), "no saved catalog, starting empty");
            return Ok(());
        };

        let total = snapshot.buckets.len();
        let mut kept = Vec::with_capacity(total);
        for record in snapshot.buckets {
            let id = &record.bucket.bucket_id;
            match self.storage.exists(id).await {
                Ok(true) => kept.push(record),
                Ok(false) => {
                    warn!(bucket_id = %id, "bucket storage missing, skipping recovery");
                }
                Err(e) => {
                    warn!(bucket_id = %id, error = %e, "bucket storage unreadable, skipping recovery");
                }
            }
        }
        let skipped = total - kept.len();
        snapshot.buckets = kept;

        let catalog = Catalog::from_snapshot(snapshot);
        let count = catalog.len();
        {
            // Revisions restart with the new catalog.
            let mut persisted = self.persisted.lock().await;
            let revision = catalog.revision();
            *self.catalog.lock() = catalog;
            *persisted = (skipped == 0).then_some(revision);
        }
        info!(backend = self.storage.kind(), count, skipped, "recovery complete");
        if skipped > 0 {
            self.persist().await?;
        }
        Ok(())
    }

    /// Hand the catalog to the backend if it changed since the last save.
    async fn persist(&self) -> Result<(), CosiError> {
        let mut persisted = self.persisted.lock().await;
        let (revision, snapshot) = {
            let catalog = self.catalog.lock();
            if *persisted == Some(catalog.revision()) {
                return Ok(());
            }
            (catalog.revision(), catalog.snapshot())
        };
        self.storage.save_catalog(&snapshot).await?;
        *persisted = Some(revision);
        Ok(())
    }

    fn mint_credential(&self, grant: &AccessGrant) -> Credential {
        let key_id = uuid::Uuid::new_v4().simple().to_string().to_ascii_uppercase();
        let secret = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        Credential {
            bucket_id: grant.bucket_id.clone(),
            principal: grant.principal.clone(),
            account_id: format!("{}/{}", grant.bucket_id, grant.principal),
            parameters: grant.parameters.clone(),
            secrets: Parameters::from([
                (SECRET_ACCESS_KEY_ID.to_owned(), key_id),
                (SECRET_ACCESS_SECRET_KEY.to_owned(), secret),
            ]),
            metadata: Parameters::from([
                (META_ENDPOINT.to_owned(), self.endpoint.clone()),
                (META_REGION.to_owned(), self.region.clone()),
            ]),
        }
    }
}

// ---------------------------------------------------------------------------
// CosiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: StorageBackend> CosiIdentity for Driver<S> {
    async fn get_driver_info(&self) -> Result<DriverInfo, CosiError> {
        Ok(self.info.clone())
    }

    async fn probe(&self) -> Result<bool, CosiError> {
        self.storage.probe().await
    }
}

// ---------------------------------------------------------------------------
// CosiController
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: StorageBackend> CosiController for Driver<S> {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_bucket(&self, req: BucketRequest) -> Result<Bucket, CosiError> {
        validate_bucket_name(&req.name)?;
        validate_parameters(&req.parameters, "bucket")?;

        let plan = self
            .catalog
            .lock()
            .begin_create(&req, self.policy.max_buckets)?;

        let bucket = match plan {
            CreatePlan::Existing(bucket) => {
                debug!(bucket_id = %bucket.bucket_id, "returning existing bucket for idempotent create");
                bucket
            }
            CreatePlan::Provision(bucket_id) => {
                let rollback = Rollback::new(|| self.catalog.lock().abort_create(&bucket_id));
                let applied = self.storage.provision(&bucket_id, &req.parameters).await?;
                let bucket = self.catalog.lock().commit_create(&bucket_id, applied)?;
                rollback.disarm();
                info!(bucket_id = %bucket.bucket_id, "bucket created");
                bucket
            }
        };

        self.persist().await?;
        Ok(bucket)
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, bucket_id: &BucketId) -> Result<(), CosiError> {
        let plan = self.catalog.lock().begin_delete(bucket_id)?;

        match plan {
            DeletePlan::Absent => {
                debug!(%bucket_id, "bucket already absent, nothing to delete");
            }
            DeletePlan::Destroy => {
                let rollback = Rollback::new(|| self.catalog.lock().abort_delete(bucket_id));
                if !self.policy.force_delete && !self.storage.is_empty(bucket_id).await? {
                    return Err(CosiError::FailedPrecondition(format!(
                        "bucket {bucket_id} is not empty"
                    )));
                }
                self.storage.destroy(bucket_id).await?;
                let revoked = self.catalog.lock().commit_delete(bucket_id);
                rollback.disarm();
                info!(%bucket_id, revoked, "bucket deleted");
            }
        }

        self.persist().await
    }

    #[instrument(
        skip(self, grant),
        fields(bucket_id = %grant.bucket_id, principal = %grant.principal)
    )]
    async fn grant_bucket_access(&self, grant: AccessGrant) -> Result<Credential, CosiError> {
        validate_principal(&grant.principal)?;
        validate_parameters(&grant.parameters, "access")?;

        let (credential, outcome) =
            self.catalog
                .lock()
                .grant(&grant, self.policy.grant_conflict, |g| self.mint_credential(g))?;

        match outcome {
            GrantOutcome::Existing => debug!("returning existing credential for idempotent grant"),
            GrantOutcome::Issued => info!("access granted"),
            GrantOutcome::Rotated => info!("access parameters changed, credential rotated"),
        }

        self.persist().await?;
        Ok(credential)
    }

    #[instrument(skip(self))]
    async fn revoke_bucket_access(
        &self,
        bucket_id: &BucketId,
        principal: &PrincipalId,
    ) -> Result<(), CosiError> {
        validate_principal(principal)?;

        if self.catalog.lock().revoke(bucket_id, principal) {
            info!("access revoked");
        } else {
            debug!("no grant to revoke");
        }

        self.persist().await
    }
}

/// Build the driver selected by `config.backend`.
///
/// The `localfs` driver recovers its saved catalog before it is returned.
pub async fn from_config(config: &DriverConfig) -> Result<Arc<dyn CosiDriver>, CosiError> {
    let driver: Arc<dyn CosiDriver> = match config.backend {
        BackendKind::Memory => Arc::new(Driver::new(MemoryBackend::new(), config)),
        BackendKind::LocalFs => {
            let driver = Driver::new(LocalFsBackend::new(&config.object_root), config);
            driver.recover().await?;
            Arc::new(driver)
        }
    };
    info!(backend = ?config.backend, name = %config.driver_name, "driver ready");
    Ok(driver)
}

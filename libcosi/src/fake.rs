//! Programmable COSI driver for orchestrator tests.
//!
//! [`FakeController`] implements [`CosiController`] and [`CosiIdentity`]
//! without any backend.  Each operation holds its own behavior, a closure
//! with the same input, output and error shape as the real operation, which
//! the test installs with the matching `on_*` setter.  An operation whose
//! behavior was never installed fails with [`CosiError::Unimplemented`], so a
//! forgotten setup cannot pass silently with default data.
//!
//! The fake keeps no state between calls.  Tests that need state capture it
//! in their closures.
//!
//! ```
//! use libcosi::fake::FakeController;
//! use libcosi::{Bucket, BucketRequest, CosiController, CosiError};
//!
//! # tokio_test_block(async {
//! let fake = FakeController::new();
//! fake.on_create_bucket(|req: BucketRequest| async move {
//!     Ok(Bucket {
//!         bucket_id: format!("b-{}", req.name).into(),
//!         name: req.name,
//!         parameters: Default::default(),
//!     })
//! });
//!
//! let bucket = fake.create_bucket(BucketRequest::new("logs-01")).await.unwrap();
//! assert_eq!(bucket.bucket_id.as_str(), "b-logs-01");
//! assert!(matches!(
//!     fake.delete_bucket(&bucket.bucket_id).await,
//!     Err(CosiError::Unimplemented(_))
//! ));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f);
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;

use crate::controller::CosiController;
use crate::error::CosiError;
use crate::identity::CosiIdentity;
use crate::types::*;

/// A stored behavior for one operation.
type Behavior<Req, Resp> =
    Arc<dyn Fn(Req) -> BoxFuture<'static, Result<Resp, CosiError>> + Send + Sync>;

/// Slot holding an optional behavior.
struct Slot<Req, Resp> {
    op: &'static str,
    behavior: RwLock<Option<Behavior<Req, Resp>>>,
}

impl<Req, Resp> Slot<Req, Resp> {
    fn new(op: &'static str) -> Self {
        Self {
            op,
            behavior: RwLock::new(None),
        }
    }

    fn set<F, Fut>(&self, f: F)
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, CosiError>> + Send + 'static,
    {
        let boxed: Behavior<Req, Resp> = Arc::new(move |req| f(req).boxed());
        *self.behavior.write() = Some(boxed);
    }

    fn clear(&self) {
        *self.behavior.write() = None;
    }

    fn is_set(&self) -> bool {
        self.behavior.read().is_some()
    }

    async fn call(&self, req: Req) -> Result<Resp, CosiError> {
        // Clone out of the lock so the behavior may reconfigure the fake.
        let behavior = self.behavior.read().clone();
        match behavior {
            Some(behavior) => behavior(req).await,
            None => Err(CosiError::Unimplemented(format!(
                "{} behavior not configured",
                self.op
            ))),
        }
    }
}

/// Conformance substitute for a COSI driver.
pub struct FakeController {
    create_bucket: Slot<BucketRequest, Bucket>,
    delete_bucket: Slot<BucketId, ()>,
    grant_bucket_access: Slot<AccessGrant, Credential>,
    revoke_bucket_access: Slot<(BucketId, PrincipalId), ()>,
    get_driver_info: Slot<(), DriverInfo>,
    probe: Slot<(), bool>,
}

impl Default for FakeController {
    fn default() -> Self {
        Self {
            create_bucket: Slot::new("create_bucket"),
            delete_bucket: Slot::new("delete_bucket"),
            grant_bucket_access: Slot::new("grant_bucket_access"),
            revoke_bucket_access: Slot::new("revoke_bucket_access"),
            get_driver_info: Slot::new("get_driver_info"),
            probe: Slot::new("probe"),
        }
    }
}

impl fmt::Debug for FakeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeController")
            .field("create_bucket", &self.create_bucket.is_set())
            .field("delete_bucket", &self.delete_bucket.is_set())
            .field("grant_bucket_access", &self.grant_bucket_access.is_set())
            .field("revoke_bucket_access", &self.revoke_bucket_access.is_set())
            .field("get_driver_info", &self.get_driver_info.is_set())
            .field("probe", &self.probe.is_set())
            .finish()
    }
}

impl FakeController {
    /// A fake with no behavior configured: every call is `Unimplemented`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create_bucket<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(BucketRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bucket, CosiError>> + Send + 'static,
    {
        self.create_bucket.set(f);
        self
    }

    pub fn on_delete_bucket<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(BucketId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CosiError>> + Send + 'static,
    {
        self.delete_bucket.set(f);
        self
    }

    pub fn on_grant_bucket_access<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(AccessGrant) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Credential, CosiError>> + Send + 'static,
    {
        self.grant_bucket_access.set(f);
        self
    }

    pub fn on_revoke_bucket_access<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(BucketId, PrincipalId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CosiError>> + Send + 'static,
    {
        self.revoke_bucket_access
            .set(move |(bucket_id, principal)| f(bucket_id, principal));
        self
    }

    pub fn on_get_driver_info<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DriverInfo, CosiError>> + Send + 'static,
    {
        self.get_driver_info.set(move |()| f());
        self
    }

    pub fn on_probe<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, CosiError>> + Send + 'static,
    {
        self.probe.set(move |()| f());
        self
    }

    /// Remove every installed behavior.
    pub fn reset(&self) {
        self.create_bucket.clear();
        self.delete_bucket.clear();
        self.grant_bucket_access.clear();
        self.revoke_bucket_access.clear();
        self.get_driver_info.clear();
        self.probe.clear();
    }
}

#[async_trait]
impl CosiController for FakeController {
    async fn create_bucket(&self, req: BucketRequest) -> Result<Bucket, CosiError> {
        self.create_bucket.call(req).await
    }

    async fn delete_bucket(&self, bucket_id: &BucketId) -> Result<(), CosiError> {
        self.delete_bucket.call(bucket_id.clone()).await
    }

    async fn grant_bucket_access(&self, grant: AccessGrant) -> Result<Credential, CosiError> {
        self.grant_bucket_access.call(grant).await
    }

    async fn revoke_bucket_access(
        &self,
        bucket_id: &BucketId,
        principal: &PrincipalId,
    ) -> Result<(), CosiError> {
        self.revoke_bucket_access
            .call((bucket_id.clone(), principal.clone()))
            .await
    }
}

#[async_trait]
impl CosiIdentity for FakeController {
    async fn get_driver_info(&self) -> Result<DriverInfo, CosiError> {
        self.get_driver_info.call(()).await
    }

    async fn probe(&self) -> Result<bool, CosiError> {
        self.probe.call(()).await
    }
}

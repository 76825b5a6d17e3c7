//! COSI Controller service trait.
//!
//! The Controller service is the whole provisioning surface a backend driver
//! exposes: bucket creation and deletion, and granting or revoking a
//! principal's access to a bucket.  Orchestrators call it through a
//! [`CosiClient`](crate::transport::client::CosiClient) or in-process through
//! any driver from [`crate::backend`].
//!
//! Every operation is safe to retry with the identical request:
//!
//! * `create_bucket` deduplicates by name and idempotency token.
//! * `delete_bucket` succeeds when the bucket is already gone.
//! * `grant_bucket_access` returns the existing credential for an unchanged
//!   (bucket, principal, parameters) triple.
//! * `revoke_bucket_access` succeeds when there is nothing to revoke.

use async_trait::async_trait;

use crate::error::CosiError;
use crate::types::{AccessGrant, Bucket, BucketId, BucketRequest, Credential, PrincipalId};

/// Controller service: bucket and access lifecycle.
#[async_trait]
pub trait CosiController: Send + Sync {
    /// Provision a bucket, or return the existing one for an equivalent
    /// request.
    ///
    /// Fails with [`CosiError::AlreadyExists`] when the name (or token) is
    /// taken by a bucket with different parameters.
    async fn create_bucket(&self, req: BucketRequest) -> Result<Bucket, CosiError>;

    /// Destroy a bucket and invalidate every grant on it.
    ///
    /// Deleting an unknown bucket succeeds.
    async fn delete_bucket(&self, bucket_id: &BucketId) -> Result<(), CosiError>;

    /// Issue (or return the existing) credential for a (bucket, principal)
    /// pair.
    async fn grant_bucket_access(&self, grant: AccessGrant) -> Result<Credential, CosiError>;

    /// Invalidate the credential of a (bucket, principal) pair.
    ///
    /// Revoking a grant that does not exist succeeds.
    async fn revoke_bucket_access(
        &self,
        bucket_id: &BucketId,
        principal: &PrincipalId,
    ) -> Result<(), CosiError>;
}

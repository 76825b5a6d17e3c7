//! Contract tests run against every bundled driver.
//!
//! Each property is written once, generic over the storage backend, and run on
//! the memory and the local filesystem backend.

use std::collections::HashSet;
use std::sync::Arc;

use libcosi::backend::{Driver, LocalFsBackend, MemoryBackend, StorageBackend};
use libcosi::config::GrantConflictPolicy;
use libcosi::{
    AccessGrant, BucketRequest, BucketState, CosiController, CosiError, DriverConfig, PrincipalId,
};
use tempfile::TempDir;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A driver under test plus whatever keeps its storage alive.
struct Harness<S> {
    driver: Arc<Driver<S>>,
    _tmp: Option<TempDir>,
}

fn memory(config: DriverConfig) -> Harness<MemoryBackend> {
    init_logger();
    Harness {
        driver: Arc::new(Driver::new(MemoryBackend::new(), &config)),
        _tmp: None,
    }
}

fn localfs(config: DriverConfig) -> Harness<LocalFsBackend> {
    init_logger();
    let tmp = tempfile::tempdir().expect("tempdir");
    Harness {
        driver: Arc::new(Driver::new(LocalFsBackend::new(tmp.path()), &config)),
        _tmp: Some(tmp),
    }
}

async fn scenario<S: StorageBackend>(h: Harness<S>) {
    let d = &h.driver;

    let bucket = d
        .create_bucket(BucketRequest::new("logs-01"))
        .await
        .expect("create");
    assert_eq!(bucket.bucket_id.as_str(), "b-logs-01");
    assert_eq!(bucket.name, "logs-01");

    let cred = d
        .grant_bucket_access(
            AccessGrant::new("b-logs-01", "svc-a").with_parameter("level", "read"),
        )
        .await
        .expect("grant");
    assert_eq!(cred.bucket_id, bucket.bucket_id);
    assert_eq!(cred.principal.as_str(), "svc-a");
    assert!(d.check_access(&cred));

    let principal = PrincipalId::from("svc-a");
    d.revoke_bucket_access(&bucket.bucket_id, &principal)
        .await
        .expect("revoke");
    assert!(!d.check_access(&cred));
    d.revoke_bucket_access(&bucket.bucket_id, &principal)
        .await
        .expect("second revoke is a no-op");

    d.delete_bucket(&bucket.bucket_id).await.expect("delete");
    d.delete_bucket(&bucket.bucket_id)
        .await
        .expect("second delete is a no-op");
    assert_eq!(d.bucket_state(&bucket.bucket_id), None);
}

async fn idempotent_create<S: StorageBackend>(h: Harness<S>) {
    let d = &h.driver;
    let req = BucketRequest::new("images")
        .with_parameter("class", "standard")
        .with_idempotency_token("req-42");

    let first = d.create_bucket(req.clone()).await.expect("first");
    let second = d.create_bucket(req).await.expect("retry");
    assert_eq!(first, second);
    assert_eq!(d.bucket_count(), 1, "no duplicate provisioned");

    let clash = BucketRequest::new("images").with_parameter("class", "archive");
    assert!(matches!(
        d.create_bucket(clash).await,
        Err(CosiError::AlreadyExists(_))
    ));
}

async fn concurrent_creates_converge<S: StorageBackend>(h: Harness<S>) {
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let d = Arc::clone(&h.driver);
        tasks.push(tokio::spawn(async move {
            // Racing callers retry on Unavailable, as orchestrators do.
            loop {
                match d.create_bucket(BucketRequest::new("shared")).await {
                    Err(e) if e.is_retryable() => tokio::task::yield_now().await,
                    other => return other,
                }
            }
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        let bucket = task.await.expect("join").expect("create");
        ids.insert(bucket.bucket_id);
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(h.driver.bucket_count(), 1);
}

async fn grant_idempotence_and_scope<S: StorageBackend>(h: Harness<S>) {
    let d = &h.driver;
    let bucket = d
        .create_bucket(BucketRequest::new("reports"))
        .await
        .expect("create");
    let id = bucket.bucket_id.clone();

    // Revoking a never-granted pair succeeds.
    d.revoke_bucket_access(&id, &"svc-z".into())
        .await
        .expect("revoke without grant");

    let read = AccessGrant::new(id.clone(), "svc-a").with_parameter("level", "read");
    let a1 = d.grant_bucket_access(read.clone()).await.expect("grant");
    let a2 = d.grant_bucket_access(read).await.expect("repeat grant");
    assert_eq!(a1, a2, "identical grant returns the same credential");

    let b = d
        .grant_bucket_access(AccessGrant::new(id.clone(), "svc-b"))
        .await
        .expect("grant b");
    d.revoke_bucket_access(&id, &"svc-a".into())
        .await
        .expect("revoke a");
    assert!(!d.check_access(&a1));
    assert!(d.check_access(&b), "other principals keep access");
}

async fn grant_on_missing_bucket<S: StorageBackend>(h: Harness<S>) {
    let d = &h.driver;
    assert!(matches!(
        d.grant_bucket_access(AccessGrant::new("b-missing", "svc-a"))
            .await,
        Err(CosiError::NotFound(_))
    ));
    d.revoke_bucket_access(&"b-missing".into(), &"svc-a".into())
        .await
        .expect("revoke on absent bucket has nothing to revoke");
}

async fn delete_invalidates_credentials<S: StorageBackend>(h: Harness<S>) {
    let d = &h.driver;
    let bucket = d
        .create_bucket(BucketRequest::new("scratch"))
        .await
        .expect("create");
    let cred = d
        .grant_bucket_access(AccessGrant::new(bucket.bucket_id.clone(), "svc-a"))
        .await
        .expect("grant");
    d.delete_bucket(&bucket.bucket_id).await.expect("delete");
    assert!(!d.check_access(&cred));

    // A bucket re-created under the same name is a different bucket: the old
    // identifier and credential stay dead.
    let again = d
        .create_bucket(BucketRequest::new("scratch"))
        .await
        .expect("re-create");
    assert_ne!(again.bucket_id, bucket.bucket_id);
    assert!(!d.check_access(&cred));
    assert!(matches!(
        d.grant_bucket_access(AccessGrant::new(bucket.bucket_id.clone(), "svc-a"))
            .await,
        Err(CosiError::NotFound(_))
    ));
}

async fn racing_grant_and_revoke_stay_consistent<S: StorageBackend>(h: Harness<S>) {
    let bucket = h
        .driver
        .create_bucket(BucketRequest::new("racy"))
        .await
        .expect("create");
    let id = bucket.bucket_id;

    for _ in 0..32 {
        let granter = Arc::clone(&h.driver);
        let revoker = Arc::clone(&h.driver);
        let gid = id.clone();
        let rid = id.clone();
        let grant = tokio::spawn(async move {
            granter
                .grant_bucket_access(AccessGrant::new(gid, "svc-a"))
                .await
        });
        let revoke = tokio::spawn(async move {
            revoker
                .revoke_bucket_access(&rid, &"svc-a".into())
                .await
        });
        let cred = grant.await.expect("join").expect("grant");
        revoke.await.expect("join").expect("revoke");

        // Either the revoke ran last (nothing honoured) or the grant did
        // (exactly the returned credential is honoured).
        let honoured = h.driver.check_access(&cred);
        let reissued = h
            .driver
            .grant_bucket_access(AccessGrant::new(id.clone(), "svc-a"))
            .await
            .expect("grant");
        if honoured {
            assert_eq!(reissued, cred);
        } else {
            assert_ne!(reissued.secrets, cred.secrets);
        }
        h.driver
            .revoke_bucket_access(&id, &"svc-a".into())
            .await
            .expect("cleanup");
    }
}

async fn reject_policy<S: StorageBackend>(h: Harness<S>) {
    let d = &h.driver;
    let bucket = d
        .create_bucket(BucketRequest::new("strict"))
        .await
        .expect("create");
    let read = AccessGrant::new(bucket.bucket_id.clone(), "svc-a").with_parameter("level", "read");
    let write =
        AccessGrant::new(bucket.bucket_id.clone(), "svc-a").with_parameter("level", "write");
    let cred = d.grant_bucket_access(read).await.expect("grant");
    assert!(matches!(
        d.grant_bucket_access(write).await,
        Err(CosiError::AlreadyExists(_))
    ));
    assert!(d.check_access(&cred), "rejected change leaves access untouched");
}

async fn quota<S: StorageBackend>(h: Harness<S>) {
    let d = &h.driver;
    d.create_bucket(BucketRequest::new("one")).await.expect("create");
    assert!(matches!(
        d.create_bucket(BucketRequest::new("two")).await,
        Err(CosiError::ResourceExhausted(_))
    ));
    // Idempotent retries are not counted against the quota.
    d.create_bucket(BucketRequest::new("one"))
        .await
        .expect("retry within quota");
    assert_eq!(d.bucket_state(&"b-one".into()), Some(BucketState::Active));
}

async fn recreated_identifiers_never_alias<S: StorageBackend>(h: Harness<S>) {
    let d = &h.driver;

    // A bucket whose name looks like a generation suffix of another name.
    let other = d
        .create_bucket(BucketRequest::new("logs-01-2"))
        .await
        .expect("create suffixed name");
    let stale = d
        .grant_bucket_access(AccessGrant::new(other.bucket_id.clone(), "svc-a"))
        .await
        .expect("grant");
    d.delete_bucket(&other.bucket_id).await.expect("delete");

    for _ in 0..2 {
        let b = d
            .create_bucket(BucketRequest::new("logs-01"))
            .await
            .expect("create");
        assert_ne!(b.bucket_id, other.bucket_id);
        d.delete_bucket(&b.bucket_id).await.expect("delete");
    }
    let recreated = d
        .create_bucket(BucketRequest::new("logs-01"))
        .await
        .expect("re-create");
    assert_ne!(recreated.bucket_id, other.bucket_id);
    assert!(matches!(
        d.grant_bucket_access(AccessGrant::new(other.bucket_id.clone(), "svc-a"))
            .await,
        Err(CosiError::NotFound(_))
    ));
    assert!(!d.check_access(&stale));

    // The other order: re-created prefix name already holds generation 2.
    let fresh = d
        .create_bucket(BucketRequest::new("logs-02"))
        .await
        .expect("create");
    d.delete_bucket(&fresh.bucket_id).await.expect("delete");
    let second = d
        .create_bucket(BucketRequest::new("logs-02"))
        .await
        .expect("re-create");
    let suffixed = d
        .create_bucket(BucketRequest::new("logs-02-2"))
        .await
        .expect("suffixed name is a distinct bucket");
    assert_ne!(second.bucket_id, suffixed.bucket_id);
    assert_eq!(suffixed.bucket_id.as_str(), "b-logs-02-2");
}

fn strict_config() -> DriverConfig {
    DriverConfig {
        grant_conflict: GrantConflictPolicy::Reject,
        ..DriverConfig::default()
    }
}

fn quota_config() -> DriverConfig {
    DriverConfig {
        max_buckets: Some(1),
        ..DriverConfig::default()
    }
}

macro_rules! contract_tests {
    ($backend:ident) => {
        mod $backend {
            use super::*;

            #[tokio::test]
            async fn scenario() {
                super::scenario(super::$backend(DriverConfig::default())).await;
            }

            #[tokio::test]
            async fn idempotent_create() {
                super::idempotent_create(super::$backend(DriverConfig::default())).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_creates_converge() {
                super::concurrent_creates_converge(super::$backend(DriverConfig::default())).await;
            }

            #[tokio::test]
            async fn grant_idempotence_and_scope() {
                super::grant_idempotence_and_scope(super::$backend(DriverConfig::default())).await;
            }

            #[tokio::test]
            async fn grant_on_missing_bucket() {
                super::grant_on_missing_bucket(super::$backend(DriverConfig::default())).await;
            }

            #[tokio::test]
            async fn delete_invalidates_credentials() {
                super::delete_invalidates_credentials(super::$backend(DriverConfig::default()))
                    .await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn racing_grant_and_revoke_stay_consistent() {
                super::racing_grant_and_revoke_stay_consistent(super::$backend(
                    DriverConfig::default(),
                ))
                .await;
            }

            #[tokio::test]
            async fn recreated_identifiers_never_alias() {
                super::recreated_identifiers_never_alias(super::$backend(DriverConfig::default()))
                    .await;
            }

            #[tokio::test]
            async fn reject_policy() {
                super::reject_policy(super::$backend(strict_config())).await;
            }

            #[tokio::test]
            async fn quota() {
                super::quota(super::$backend(quota_config())).await;
            }
        }
    };
}

contract_tests!(memory);
contract_tests!(localfs);

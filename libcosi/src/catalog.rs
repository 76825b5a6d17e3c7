//! Backend-independent bookkeeping for buckets and grants.
//!
//! The [`Catalog`] owns the per-bucket state machine
//!
//! ```text
//! absent ──begin_create──▶ provisioning ──commit_create──▶ active
//!    ▲                         │ abort_create                │ begin_delete
//!    └─────────────────────────┘                             ▼
//!    └────────────────────commit_delete──────────────── deleting
//!                                              abort_delete ─┘ (back to active)
//! ```
//!
//! and the (bucket, principal) grant table.  Every method is synchronous and
//! is called with the driver's catalog lock held, so each transition is
//! atomic with respect to concurrent callers.  Slow backend work happens
//! between a `begin_*` and the matching `commit_*`/`abort_*`, outside the
//! lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::GrantConflictPolicy;
use crate::error::CosiError;
use crate::types::*;

/// Everything the catalog tracks about one bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketRecord {
    /// The bucket as handed back to callers.
    pub bucket: Bucket,
    /// Parameters the bucket was requested with; used for equivalence.
    #[serde(default)]
    pub requested: Parameters,
    /// Idempotency tokens resolving to this bucket: the creating request's
    /// plus any bound later by an equivalent request under the same name.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub idempotency_tokens: BTreeSet<String>,
    /// Name generation this bucket's identifier was derived from.
    pub generation: u64,
    /// Lifecycle state.
    pub state: BucketState,
    /// Outstanding credentials, keyed by principal.
    #[serde(default)]
    pub grants: BTreeMap<String, Credential>,
}

/// Durable form of a [`Catalog`].
///
/// In-flight work is not persisted: provisioning records are dropped and
/// deleting records are stored as active, matching what a restarted driver
/// can actually vouch for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub buckets: Vec<BucketRecord>,
    /// Highest generation ever committed per bucket name.
    #[serde(default)]
    pub generations: BTreeMap<String, u64>,
}

/// Outcome of [`Catalog::begin_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatePlan {
    /// An equivalent bucket is already active.
    Existing(Bucket),
    /// A provisioning record was inserted; storage must be provisioned at
    /// this identifier before [`Catalog::commit_create`].
    Provision(BucketId),
}

/// Outcome of [`Catalog::begin_delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePlan {
    /// Nothing is tracked under the identifier.
    Absent,
    /// The bucket is now deleting; storage must be destroyed before
    /// [`Catalog::commit_delete`].
    Destroy,
}

/// What [`Catalog::grant`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// An identical grant existed; its credential was returned.
    Existing,
    /// A new credential was issued.
    Issued,
    /// The grant's parameters changed; the old credential was replaced.
    Rotated,
}

#[derive(Debug, Default)]
pub struct Catalog {
    buckets: BTreeMap<BucketId, BucketRecord>,
    names: HashMap<String, BucketId>,
    tokens: HashMap<String, BucketId>,
    generations: BTreeMap<String, u64>,
    revision: u64,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a catalog from its durable form.
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let mut catalog = Self {
            generations: snapshot.generations,
            ..Self::default()
        };
        for mut record in snapshot.buckets {
            record.state = BucketState::Active;
            let id = record.bucket.bucket_id.clone();
            let gen_entry = catalog
                .generations
                .entry(record.bucket.name.clone())
                .or_default();
            *gen_entry = (*gen_entry).max(record.generation);
            catalog.names.insert(record.bucket.name.clone(), id.clone());
            for token in &record.idempotency_tokens {
                catalog.tokens.insert(token.clone(), id.clone());
            }
            catalog.buckets.insert(id, record);
        }
        catalog
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        let buckets = self
            .buckets
            .values()
            .filter(|r| r.state != BucketState::Provisioning)
            .map(|r| BucketRecord {
                state: BucketState::Active,
                ..r.clone()
            })
            .collect();
        CatalogSnapshot {
            buckets,
            generations: self.generations.clone(),
        }
    }

    /// Monotonic counter bumped by every change that affects the snapshot.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of tracked buckets in any state.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn state(&self, bucket_id: &BucketId) -> Option<BucketState> {
        self.buckets.get(bucket_id).map(|r| r.state)
    }

    pub fn record(&self, bucket_id: &BucketId) -> Option<&BucketRecord> {
        self.buckets.get(bucket_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &BucketRecord> {
        self.buckets.values()
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Resolve a create request against existing buckets, or start
    /// provisioning a new one.
    pub fn begin_create(
        &mut self,
        req: &BucketRequest,
        max_buckets: Option<usize>,
    ) -> Result<CreatePlan, CosiError> {
        if let Some(token) = &req.idempotency_token
            && let Some(id) = self.tokens.get(token)
        {
            let record = self.tracked(id)?;
            if record.bucket.name != req.name || record.requested != req.parameters {
                return Err(CosiError::AlreadyExists(format!(
                    "idempotency token {token:?} was used for bucket {} with a different request",
                    record.bucket.bucket_id
                )));
            }
            return Self::resolve_existing(record);
        }

        if let Some(id) = self.names.get(&req.name).cloned() {
            let record = self.tracked(&id)?;
            if record.state == BucketState::Deleting {
                return Err(CosiError::Unavailable(format!(
                    "bucket name {:?} is being released by {id}",
                    req.name
                )));
            }
            if record.requested != req.parameters {
                return Err(CosiError::AlreadyExists(format!(
                    "bucket {:?} exists as {id} with different parameters",
                    req.name
                )));
            }
            let plan = Self::resolve_existing(record)?;
            // Unknown here, or the token branch above would have answered.
            if let Some(token) = &req.idempotency_token
                && let Some(record) = self.buckets.get_mut(&id)
            {
                record.idempotency_tokens.insert(token.clone());
                self.tokens.insert(token.clone(), id);
                self.revision += 1;
            }
            return Ok(plan);
        }

        if let Some(max) = max_buckets
            && self.buckets.len() >= max
        {
            return Err(CosiError::ResourceExhausted(format!(
                "bucket quota of {max} reached"
            )));
        }

        let generation = self.generations.get(&req.name).copied().unwrap_or(0) + 1;
        let bucket_id = BucketId::for_name(&req.name, generation);
        if self.buckets.contains_key(&bucket_id) {
            return Err(CosiError::Internal(format!(
                "bucket identifier {bucket_id} is already tracked"
            )));
        }
        self.buckets.insert(
            bucket_id.clone(),
            BucketRecord {
                bucket: Bucket {
                    bucket_id: bucket_id.clone(),
                    name: req.name.clone(),
                    parameters: Parameters::new(),
                },
                requested: req.parameters.clone(),
                idempotency_tokens: req.idempotency_token.iter().cloned().collect(),
                generation,
                state: BucketState::Provisioning,
                grants: BTreeMap::new(),
            },
        );
        self.names.insert(req.name.clone(), bucket_id.clone());
        if let Some(token) = &req.idempotency_token {
            self.tokens.insert(token.clone(), bucket_id.clone());
        }
        Ok(CreatePlan::Provision(bucket_id))
    }

    /// Mark a provisioning bucket active with the parameters the backend
    /// applied.
    pub fn commit_create(
        &mut self,
        bucket_id: &BucketId,
        applied: Parameters,
    ) -> Result<Bucket, CosiError> {
        let record = self
            .buckets
            .get_mut(bucket_id)
            .filter(|r| r.state == BucketState::Provisioning)
            .ok_or_else(|| {
                CosiError::Internal(format!("bucket {bucket_id} is not provisioning"))
            })?;
        record.state = BucketState::Active;
        record.bucket.parameters = applied;
        let generation = record.generation;
        let bucket = record.bucket.clone();
        let committed = self.generations.entry(bucket.name.clone()).or_default();
        *committed = (*committed).max(generation);
        self.revision += 1;
        Ok(bucket)
    }

    /// Forget a provisioning record after a failed or cancelled create.
    pub fn abort_create(&mut self, bucket_id: &BucketId) {
        if self.state(bucket_id) == Some(BucketState::Provisioning) {
            self.forget(bucket_id);
        }
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    pub fn begin_delete(&mut self, bucket_id: &BucketId) -> Result<DeletePlan, CosiError> {
        let Some(record) = self.buckets.get_mut(bucket_id) else {
            return Ok(DeletePlan::Absent);
        };
        match record.state {
            BucketState::Active => {
                record.state = BucketState::Deleting;
                Ok(DeletePlan::Destroy)
            }
            state => Err(CosiError::Unavailable(format!(
                "bucket {bucket_id} is {state}"
            ))),
        }
    }

    /// Drop a deleting bucket together with all of its grants.  Returns the
    /// number of grants invalidated.
    pub fn commit_delete(&mut self, bucket_id: &BucketId) -> usize {
        if self.state(bucket_id) != Some(BucketState::Deleting) {
            return 0;
        }
        let revoked = self.forget(bucket_id).map_or(0, |r| r.grants.len());
        self.revision += 1;
        revoked
    }

    /// Return a deleting bucket to active after a refused, failed, or
    /// cancelled delete.  Its grants are untouched.
    pub fn abort_delete(&mut self, bucket_id: &BucketId) {
        if let Some(record) = self.buckets.get_mut(bucket_id)
            && record.state == BucketState::Deleting
        {
            record.state = BucketState::Active;
        }
    }

    // -----------------------------------------------------------------------
    // Grants
    // -----------------------------------------------------------------------

    /// Grant access for a (bucket, principal) pair.
    ///
    /// `mint` is only called when a new credential is needed.
    pub fn grant<F>(
        &mut self,
        grant: &AccessGrant,
        policy: GrantConflictPolicy,
        mint: F,
    ) -> Result<(Credential, GrantOutcome), CosiError>
    where
        F: FnOnce(&AccessGrant) -> Credential,
    {
        let record = self
            .buckets
            .get_mut(&grant.bucket_id)
            .ok_or_else(|| CosiError::NotFound(format!("bucket {}", grant.bucket_id)))?;
        // In-flight create or delete may still roll back to active.
        if record.state != BucketState::Active {
            return Err(CosiError::Unavailable(format!(
                "bucket {} is {}",
                grant.bucket_id, record.state
            )));
        }

        let outcome = match record.grants.get(grant.principal.as_str()) {
            Some(existing) if existing.parameters == grant.parameters => {
                return Ok((existing.clone(), GrantOutcome::Existing));
            }
            Some(_) if policy == GrantConflictPolicy::Reject => {
                return Err(CosiError::AlreadyExists(format!(
                    "principal {} already holds access to {} with different parameters",
                    grant.principal, grant.bucket_id
                )));
            }
            Some(_) => GrantOutcome::Rotated,
            None => GrantOutcome::Issued,
        };

        let credential = mint(grant);
        record
            .grants
            .insert(grant.principal.0.clone(), credential.clone());
        self.revision += 1;
        Ok((credential, outcome))
    }

    /// Remove a grant.  Returns whether a grant was removed; an absent,
    /// provisioning or deleting bucket has nothing to revoke.
    pub fn revoke(&mut self, bucket_id: &BucketId, principal: &PrincipalId) -> bool {
        let removed = self
            .buckets
            .get_mut(bucket_id)
            .filter(|r| r.state == BucketState::Active)
            .and_then(|r| r.grants.remove(principal.as_str()))
            .is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Whether `credential` is currently honoured: the bucket is active and
    /// the grant it was issued for still holds the same secret material.
    pub fn check_access(&self, credential: &Credential) -> bool {
        self.buckets
            .get(&credential.bucket_id)
            .filter(|r| r.state == BucketState::Active)
            .and_then(|r| r.grants.get(credential.principal.as_str()))
            .is_some_and(|current| current.secrets == credential.secrets)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn tracked(&self, bucket_id: &BucketId) -> Result<&BucketRecord, CosiError> {
        self.buckets
            .get(bucket_id)
            .ok_or_else(|| CosiError::Internal(format!("dangling index entry for {bucket_id}")))
    }

    fn resolve_existing(record: &BucketRecord) -> Result<CreatePlan, CosiError> {
        match record.state {
            BucketState::Active => Ok(CreatePlan::Existing(record.bucket.clone())),
            state => Err(CosiError::Unavailable(format!(
                "bucket {} is {state}",
                record.bucket.bucket_id
            ))),
        }
    }

    fn forget(&mut self, bucket_id: &BucketId) -> Option<BucketRecord> {
        let record = self.buckets.remove(bucket_id)?;
        self.names.retain(|_, id| id != bucket_id);
        self.tokens.retain(|_, id| id != bucket_id);
        Some(record)
    }
}

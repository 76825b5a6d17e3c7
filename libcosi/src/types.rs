//! Core COSI types: buckets, grants, credentials, and driver metadata.
//!
//! These types form the data model shared by the COSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::CosiError;

/// Backend-specific string parameters attached to requests and results.
pub type Parameters = HashMap<String, String>;

/// Credential metadata key carrying the data-plane endpoint.
pub const META_ENDPOINT: &str = "endpoint";
/// Credential metadata key carrying the backend region.
pub const META_REGION: &str = "region";
/// Credential secret key holding the access key identifier.
pub const SECRET_ACCESS_KEY_ID: &str = "accessKeyID";
/// Credential secret key holding the secret access key.
pub const SECRET_ACCESS_SECRET_KEY: &str = "accessSecretKey";

const BUCKET_ID_PREFIX: &str = "b-";
/// Separates the name from the generation in re-created bucket identifiers.
/// Must be a character `validate_bucket_name` rejects.
const GENERATION_SEPARATOR: char = '_';
const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 63;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque, backend-assigned identifier for a bucket.
///
/// Stable for the lifetime of the bucket and never handed out again for a
/// different bucket once that bucket is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId(pub String);

impl BucketId {
    /// Identifier assigned to the `generation`-th bucket created under `name`.
    ///
    /// The first generation is `b-<name>`; later re-creations of the same name
    /// get a `_<generation>` suffix.  `_` never occurs in a valid bucket name,
    /// so no two (name, generation) pairs map to the same identifier.
    pub fn for_name(name: &str, generation: u64) -> Self {
        if generation <= 1 {
            Self(format!("{BUCKET_ID_PREFIX}{name}"))
        } else {
            Self(format!("{BUCKET_ID_PREFIX}{name}{GENERATION_SEPARATOR}{generation}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BucketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BucketId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque identity (user or service account) that can be granted access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PrincipalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Bucket lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a bucket known to a driver.
///
/// A bucket that is not tracked at all is *absent*; there is no variant for
/// it.  Grants are only honoured while the bucket is [`BucketState::Active`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BucketState {
    /// Storage is being provisioned by an in-flight `create_bucket`.
    Provisioning,
    /// Bucket exists and may carry grants.
    Active,
    /// An in-flight `delete_bucket` is destroying storage.
    Deleting,
}

impl fmt::Display for BucketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Deleting => "deleting",
        })
    }
}

// ---------------------------------------------------------------------------
// Requests & results
// ---------------------------------------------------------------------------

/// Request to create a new bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketRequest {
    /// Requested bucket name, unique per backend.
    pub name: String,
    /// Backend-specific provisioning parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Caller-supplied token used to deduplicate retried creations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_token: Option<String>,
}

impl BucketRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_idempotency_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }
}

/// A provisioned bucket as returned by `create_bucket`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bucket {
    /// Backend-assigned identifier.
    pub bucket_id: BucketId,
    /// Name the bucket was requested under.
    pub name: String,
    /// Parameters actually applied by the backend.
    #[serde(default)]
    pub parameters: Parameters,
}

/// A (bucket, principal) access grant request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessGrant {
    /// Bucket the principal gains access to.
    pub bucket_id: BucketId,
    /// Identity receiving access.
    pub principal: PrincipalId,
    /// Access parameters, e.g. `{"level": "read"}`.
    #[serde(default)]
    pub parameters: Parameters,
}

impl AccessGrant {
    pub fn new(bucket_id: impl Into<BucketId>, principal: impl Into<PrincipalId>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            principal: principal.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Credential material issued by `grant_bucket_access`.
///
/// `Debug` redacts the values in `secrets`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    /// Bucket the credential is scoped to.
    pub bucket_id: BucketId,
    /// Principal the credential was issued to.
    pub principal: PrincipalId,
    /// Backend account the principal acts as.
    pub account_id: String,
    /// Access parameters the credential is scoped to.
    #[serde(default)]
    pub parameters: Parameters,
    /// Secret material, e.g. access key id / secret key.
    #[serde(default)]
    pub secrets: Parameters,
    /// Non-secret access metadata, e.g. endpoint and region.
    #[serde(default)]
    pub metadata: Parameters,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secret_keys: Vec<&String> = self.secrets.keys().collect();
        secret_keys.sort();
        f.debug_struct("Credential")
            .field("bucket_id", &self.bucket_id)
            .field("principal", &self.principal)
            .field("account_id", &self.account_id)
            .field("parameters", &self.parameters)
            .field("secrets", &secret_keys)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Information about the COSI driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverInfo {
    /// Driver name, e.g. `"cosi.rk8s.io"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check a bucket name against the naming rules shared by the bundled
/// backends: 3 to 63 characters of lowercase ASCII letters, digits, `-` and
/// `.`, starting and ending with a letter or digit.
pub fn validate_bucket_name(name: &str) -> Result<(), CosiError> {
    if name.is_empty() {
        return Err(CosiError::InvalidArgument("bucket name is empty".into()));
    }
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&name.len()) {
        return Err(CosiError::InvalidArgument(format!(
            "bucket name {name:?} must be {MIN_NAME_LEN}..={MAX_NAME_LEN} characters"
        )));
    }
    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.';
    if let Some(bad) = name.chars().find(|c| !allowed(*c)) {
        return Err(CosiError::InvalidArgument(format!(
            "bucket name {name:?} contains invalid character {bad:?}"
        )));
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(CosiError::InvalidArgument(format!(
            "bucket name {name:?} must start and end with a letter or digit"
        )));
    }
    Ok(())
}

/// Reject parameter maps containing an empty key.
pub fn validate_parameters(params: &Parameters, what: &str) -> Result<(), CosiError> {
    if params.keys().any(|k| k.trim().is_empty()) {
        return Err(CosiError::InvalidArgument(format!(
            "{what} parameters contain an empty key"
        )));
    }
    Ok(())
}

/// Reject an empty or whitespace-only principal.
pub fn validate_principal(principal: &PrincipalId) -> Result<(), CosiError> {
    if principal.0.trim().is_empty() {
        return Err(CosiError::InvalidArgument("principal is empty".into()));
    }
    Ok(())
}

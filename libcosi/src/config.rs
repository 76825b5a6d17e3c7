//! Driver configuration.
//!
//! Every knob is read from an environment variable at process startup:
//!
//! - `COSI_BACKEND`: `memory` (default) or `localfs`.
//! - `COSI_DRIVER_NAME`: name reported by `get_driver_info`. Defaults to `cosi.rk8s.io`.
//! - `COSI_OBJECT_ROOT`: bucket root of the `localfs` backend. Defaults to `/var/lib/cosi/buckets`.
//! - `COSI_ENDPOINT`: endpoint advertised in credentials. Defaults to one derived from the backend.
//! - `COSI_REGION`: region advertised in credentials. Defaults to `local`.
//! - `COSI_FORCE_DELETE`: set to `1`/`true` to delete non-empty buckets with their contents.
//!   Defaults to refusing with `FailedPrecondition`.
//! - `COSI_GRANT_CONFLICT`: `replace` (default) rotates the credential when a grant is repeated
//!   with different parameters, `reject` fails it with `AlreadyExists`.
//! - `COSI_MAX_BUCKETS`: optional bucket quota.
//! - `COSI_REQUEST_TIMEOUT_MS`: deadline per call, applied by the server to every driver call and
//!   by clients built from this configuration. `0` disables it. Defaults to 30000.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CosiError;

pub const ENV_BACKEND: &str = "COSI_BACKEND";
pub const ENV_DRIVER_NAME: &str = "COSI_DRIVER_NAME";
pub const ENV_OBJECT_ROOT: &str = "COSI_OBJECT_ROOT";
pub const ENV_ENDPOINT: &str = "COSI_ENDPOINT";
pub const ENV_REGION: &str = "COSI_REGION";
pub const ENV_FORCE_DELETE: &str = "COSI_FORCE_DELETE";
pub const ENV_GRANT_CONFLICT: &str = "COSI_GRANT_CONFLICT";
pub const ENV_MAX_BUCKETS: &str = "COSI_MAX_BUCKETS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "COSI_REQUEST_TIMEOUT_MS";

/// Which backend driver to build at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Process-local, non-persistent store.
    #[default]
    Memory,
    /// Buckets as directories on the local filesystem.
    LocalFs,
}

impl FromStr for BackendKind {
    type Err = CosiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "localfs" | "fs" => Ok(Self::LocalFs),
            other => Err(CosiError::InvalidArgument(format!(
                "{ENV_BACKEND}: unknown backend {other:?}"
            ))),
        }
    }
}

/// How a repeated grant with different access parameters is handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum GrantConflictPolicy {
    /// Atomically replace the grant; the previous credential stops working.
    #[default]
    Replace,
    /// Fail with `AlreadyExists` and keep the previous grant.
    Reject,
}

impl FromStr for GrantConflictPolicy {
    type Err = CosiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(CosiError::InvalidArgument(format!(
                "{ENV_GRANT_CONFLICT}: unknown policy {other:?}"
            ))),
        }
    }
}

/// Runtime configuration for a COSI driver process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverConfig {
    pub backend: BackendKind,
    pub driver_name: String,
    pub object_root: PathBuf,
    /// Explicit endpoint; `None` lets the backend derive one.
    pub endpoint: Option<String>,
    pub region: String,
    /// `true`: delete non-empty buckets with their contents.
    /// `false`: refuse with `FailedPrecondition`.
    pub force_delete: bool,
    pub grant_conflict: GrantConflictPolicy,
    pub max_buckets: Option<usize>,
    pub request_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            driver_name: "cosi.rk8s.io".to_owned(),
            object_root: PathBuf::from("/var/lib/cosi/buckets"),
            endpoint: None,
            region: "local".to_owned(),
            force_delete: false,
            grant_conflict: GrantConflictPolicy::Replace,
            max_buckets: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl DriverConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self, CosiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CosiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_BACKEND) {
            config.backend = v.parse()?;
        }
        if let Some(v) = get(ENV_DRIVER_NAME) {
            config.driver_name = v;
        }
        if let Some(v) = get(ENV_OBJECT_ROOT) {
            config.object_root = PathBuf::from(v);
        }
        config.endpoint = get(ENV_ENDPOINT);
        if let Some(v) = get(ENV_REGION) {
            config.region = v;
        }
        if let Some(v) = get(ENV_FORCE_DELETE) {
            config.force_delete = parse_bool(ENV_FORCE_DELETE, &v)?;
        }
        if let Some(v) = get(ENV_GRANT_CONFLICT) {
            config.grant_conflict = v.parse()?;
        }
        if let Some(v) = get(ENV_MAX_BUCKETS) {
            config.max_buckets = Some(parse_number(ENV_MAX_BUCKETS, &v)?);
        }
        if let Some(v) = get(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout = Duration::from_millis(parse_number(ENV_REQUEST_TIMEOUT_MS, &v)?);
        }
        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, CosiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(CosiError::InvalidArgument(format!(
            "{key}: expected a boolean, got {other:?}"
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, CosiError> {
    value.trim().parse().map_err(|_| {
        CosiError::InvalidArgument(format!("{key}: expected a number, got {value:?}"))
    })
}

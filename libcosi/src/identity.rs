//! COSI Identity service trait.
//!
//! The Identity service allows callers to discover driver metadata and check
//! driver health.  Every COSI driver must implement this service.

use async_trait::async_trait;

use crate::error::CosiError;
use crate::types::DriverInfo;

/// Identity service: driver discovery and health probing.
#[async_trait]
pub trait CosiIdentity: Send + Sync {
    /// Return the driver name and version.
    async fn get_driver_info(&self) -> Result<DriverInfo, CosiError>;

    /// Readiness probe.  Returns `true` when the driver can serve requests.
    async fn probe(&self) -> Result<bool, CosiError>;
}

//! COSI protocol messages transmitted over QUIC.
//!
//! [`CosiMessage`] is the top-level envelope for all request and response
//! variants exchanged between the COSI client (orchestrator side) and the
//! COSI server (driver side) via QUIC bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::error::CosiError;
use crate::types::*;

/// Top-level message envelope for COSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CosiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CosiMessage {
    // ----- Requests --------------------------------------------------------
    /// Create a bucket (Controller).
    CreateBucket(BucketRequest),
    /// Delete a bucket (Controller).
    DeleteBucket(BucketId),
    /// Grant a principal access to a bucket (Controller).
    GrantBucketAccess(AccessGrant),
    /// Revoke a principal's access to a bucket (Controller).
    RevokeBucketAccess {
        bucket_id: BucketId,
        principal: PrincipalId,
    },

    /// Readiness probe (Identity).
    Probe,
    /// Query driver info (Identity).
    GetDriverInfo,

    // ----- Responses -------------------------------------------------------
    /// A bucket was created, or an equivalent one already existed.
    BucketCreated(Bucket),
    /// Access was granted.
    AccessGranted(Credential),
    /// Driver information.
    DriverInfoResponse(DriverInfo),
    /// Probe result.
    ProbeResult(bool),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(CosiError),
}

impl CosiMessage {
    /// Whether this variant may be sent by a client.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::CreateBucket(_)
                | Self::DeleteBucket(_)
                | Self::GrantBucketAccess(_)
                | Self::RevokeBucketAccess { .. }
                | Self::Probe
                | Self::GetDriverInfo
        )
    }
}

impl std::fmt::Display for CosiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateBucket(req) => write!(f, "CreateBucket(name={})", req.name),
            Self::DeleteBucket(id) => write!(f, "DeleteBucket({id})"),
            Self::GrantBucketAccess(grant) => {
                write!(f, "GrantBucketAccess({}, {})", grant.bucket_id, grant.principal)
            }
            Self::RevokeBucketAccess {
                bucket_id,
                principal,
            } => write!(f, "RevokeBucketAccess({bucket_id}, {principal})"),
            Self::Probe => f.write_str("Probe"),
            Self::GetDriverInfo => f.write_str("GetDriverInfo"),
            Self::BucketCreated(b) => write!(f, "BucketCreated({})", b.bucket_id),
            // Never print credential material.
            Self::AccessGranted(c) => write!(f, "AccessGranted({}, {})", c.bucket_id, c.principal),
            Self::DriverInfoResponse(info) => write!(f, "DriverInfo(name={})", info.name),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({ok})"),
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}

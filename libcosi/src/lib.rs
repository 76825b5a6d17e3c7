//! # libcosi: Container Object Storage Interface over QUIC for RK8s
//!
//! `libcosi` implements the bucket provisioning contract of the
//! [Container Object Storage Interface][cosi]: an orchestrator creates and
//! deletes buckets and grants or revokes a principal's access to them through
//! any backend driver.  It uses QUIC (via [`quinn`]) instead of gRPC for
//! transport and follows the RK8s architecture conventions (Tokio async
//! runtime, `tracing` for observability, `thiserror` for structured errors).
//!
//! Every operation is idempotent, so a caller that sees
//! [`CosiError::Unavailable`], a deadline, or a cancellation simply reissues
//! the identical request.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Bucket`, `AccessGrant`, `Credential`, validation. |
//! | [`error`] | [`CosiError`] taxonomy and status codes. |
//! | [`controller`] | [`CosiController`] trait: create/delete, grant/revoke. |
//! | [`identity`] | [`CosiIdentity`] trait: driver discovery & health. |
//! | [`call`] | Caller-side deadlines and cancellation. |
//! | [`message`] | [`CosiMessage`] protocol envelope for QUIC transport. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`catalog`] | Bucket state machine and grant table shared by drivers. |
//! | [`backend`] | Driver over pluggable storage (memory, local filesystem). |
//! | [`fake`] | Programmable stand-in driver for orchestrator tests. |
//! | [`config`] | [`DriverConfig`] read from the environment. |
//!
//! [cosi]: https://github.com/kubernetes-sigs/container-object-storage-interface-spec

pub mod backend;
pub mod call;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod fake;
pub mod identity;
pub mod message;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::CosiDriver;
pub use call::CallOptions;
pub use config::DriverConfig;
pub use controller::CosiController;
pub use error::{Code, CosiError};
pub use identity::CosiIdentity;
pub use message::CosiMessage;
pub use types::*;

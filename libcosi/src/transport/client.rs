//! QUIC client used by orchestrators to issue COSI requests.
//!
//! [`CosiClient`] implements [`CosiController`] and [`CosiIdentity`], so
//! orchestrator code can be written against the traits and run unchanged
//! against a remote driver or an in-process one.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use super::MAX_MESSAGE_BYTES;
use crate::call::{self, CallOptions};
use crate::controller::CosiController;
use crate::error::CosiError;
use crate::identity::CosiIdentity;
use crate::message::CosiMessage;
use crate::types::*;

/// A lightweight COSI client that sends [`CosiMessage`] requests over a
/// single QUIC connection and returns the server's response.
pub struct CosiClient {
    endpoint: quinn::Endpoint,
    connection: quinn::Connection,
    options: CallOptions,
}

impl CosiClient {
    /// Establish a new QUIC connection to the COSI server at `addr`.
    ///
    /// * `addr`: socket address of the remote COSI driver
    /// * `server_name`: TLS SNI name that must match a SAN in the server's
    ///   certificate
    /// * `tls_config`: client TLS configuration trusting the driver's CA
    /// * `options`: deadline applied to every call made through the
    ///   controller and identity traits
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
        options: CallOptions,
    ) -> Result<Self, CosiError> {
        let quic_client_config = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CosiError::Transport(format!("invalid TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

        let bind: SocketAddr = if addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let mut endpoint = quinn::Endpoint::client(bind).map_err(CosiError::transport)?;
        endpoint.set_default_client_config(client_config);

        let connecting = endpoint
            .connect(addr, server_name)
            .map_err(CosiError::transport)?;
        let connection = call::invoke(&options, "connect", async {
            connecting.await.map_err(CosiError::transport)
        })
        .await?;

        debug!(%addr, %server_name, "COSI QUIC connection established");
        Ok(Self {
            endpoint,
            connection,
            options,
        })
    }

    /// Deadline applied to calls made through the traits.
    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    /// Send a request under the client's default deadline.
    pub async fn request(&self, msg: &CosiMessage) -> Result<CosiMessage, CosiError> {
        self.request_with(&self.options, msg).await
    }

    /// Send a request and wait for the corresponding response, bounded by
    /// `options`.
    ///
    /// Each call opens a new bi-directional QUIC stream, writes the
    /// JSON-serialized request, finishes the send side, then reads the
    /// full response and deserializes it.
    #[instrument(skip(self, options), fields(msg = %msg))]
    pub async fn request_with(
        &self,
        options: &CallOptions,
        msg: &CosiMessage,
    ) -> Result<CosiMessage, CosiError> {
        call::invoke(options, "request", async {
            let (mut send, mut recv) = self
                .connection
                .open_bi()
                .await
                .map_err(CosiError::transport)?;

            let payload = serde_json::to_vec(msg).map_err(CosiError::internal)?;
            send.write_all(&payload)
                .await
                .map_err(CosiError::transport)?;
            send.finish().map_err(CosiError::transport)?;

            let buf = recv
                .read_to_end(MAX_MESSAGE_BYTES)
                .await
                .map_err(CosiError::transport)?;

            let response: CosiMessage =
                serde_json::from_slice(&buf).map_err(CosiError::transport)?;
            debug!(%response, "COSI response received");
            Ok(response)
        })
        .await
    }

    /// Close the underlying QUIC connection gracefully.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }

    /// Wait until the endpoint has flushed outstanding connection state.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}

fn unexpected(op: &str, response: CosiMessage) -> CosiError {
    match response {
        CosiMessage::Error(e) => e,
        other => CosiError::Transport(format!("unexpected response to {op}: {other}")),
    }
}

#[async_trait]
impl CosiController for CosiClient {
    async fn create_bucket(&self, req: BucketRequest) -> Result<Bucket, CosiError> {
        match self.request(&CosiMessage::CreateBucket(req)).await? {
            CosiMessage::BucketCreated(bucket) => Ok(bucket),
            other => Err(unexpected("CreateBucket", other)),
        }
    }

    async fn delete_bucket(&self, bucket_id: &BucketId) -> Result<(), CosiError> {
        match self
            .request(&CosiMessage::DeleteBucket(bucket_id.clone()))
            .await?
        {
            CosiMessage::Ok => Ok(()),
            other => Err(unexpected("DeleteBucket", other)),
        }
    }

    async fn grant_bucket_access(&self, grant: AccessGrant) -> Result<Credential, CosiError> {
        match self.request(&CosiMessage::GrantBucketAccess(grant)).await? {
            CosiMessage::AccessGranted(credential) => Ok(credential),
            other => Err(unexpected("GrantBucketAccess", other)),
        }
    }

    async fn revoke_bucket_access(
        &self,
        bucket_id: &BucketId,
        principal: &PrincipalId,
    ) -> Result<(), CosiError> {
        let msg = CosiMessage::RevokeBucketAccess {
            bucket_id: bucket_id.clone(),
            principal: principal.clone(),
        };
        match self.request(&msg).await? {
            CosiMessage::Ok => Ok(()),
            other => Err(unexpected("RevokeBucketAccess", other)),
        }
    }
}

#[async_trait]
impl CosiIdentity for CosiClient {
    async fn get_driver_info(&self) -> Result<DriverInfo, CosiError> {
        match self.request(&CosiMessage::GetDriverInfo).await? {
            CosiMessage::DriverInfoResponse(info) => Ok(info),
            other => Err(unexpected("GetDriverInfo", other)),
        }
    }

    async fn probe(&self) -> Result<bool, CosiError> {
        match self.request(&CosiMessage::Probe).await? {
            CosiMessage::ProbeResult(ok) => Ok(ok),
            other => Err(unexpected("Probe", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_responses_surface_verbatim() {
        let err = unexpected(
            "DeleteBucket",
            CosiMessage::Error(CosiError::FailedPrecondition("not empty".into())),
        );
        assert_eq!(err, CosiError::FailedPrecondition("not empty".into()));
    }

    #[test]
    fn mismatched_response_is_a_transport_error() {
        let err = unexpected("Probe", CosiMessage::Ok);
        assert!(matches!(err, CosiError::Transport(_)));
        assert!(err.is_retryable());
    }
}

//! QUIC server that runs next to a backend driver and dispatches incoming
//! COSI requests to it.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use super::MAX_MESSAGE_BYTES;
use crate::backend::CosiDriver;
use crate::call::{self, CallOptions};
use crate::error::CosiError;
use crate::message::CosiMessage;

/// A COSI server that accepts QUIC connections and dispatches
/// [`CosiMessage`] requests to a [`CosiDriver`] implementation.
///
/// `T` may be a concrete driver or `dyn CosiDriver` chosen at startup.
pub struct CosiServer<T: ?Sized> {
    endpoint: quinn::Endpoint,
    options: CallOptions,
    handler: Arc<T>,
}

impl<T> CosiServer<T>
where
    T: CosiDriver + ?Sized + 'static,
{
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CosiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CosiError::Transport(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CosiError::transport)?;
        info!(%addr, "COSI QUIC server listening");
        Ok(Self {
            endpoint,
            options: CallOptions::default(),
            handler,
        })
    }

    /// Bound every driver call by `options`.  A call that overruns is
    /// answered with [`CosiError::DeadlineExceeded`].
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), CosiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            let options = self.options;
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "COSI connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler, options).await {
                            warn!(%remote, error = %e, "COSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "COSI incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Handle all bi-streams on a single connection.
    async fn handle_connection(
        conn: quinn::Connection,
        handler: Arc<T>,
        options: CallOptions,
    ) -> Result<(), CosiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(CosiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &*handler, &options).await {
                    error!(error = %e, "COSI stream handler error");
                }
            });
        }
    }

    /// Process a single bi-stream: read request → dispatch → write response.
    ///
    /// If the client abandons the stream, the response write fails; the
    /// driver call itself runs until it finishes or the server deadline
    /// drops it, and either way the backend ends committed or rolled back.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
        options: &CallOptions,
    ) -> Result<(), CosiError> {
        let buf = recv
            .read_to_end(MAX_MESSAGE_BYTES)
            .await
            .map_err(CosiError::transport)?;

        let response = match serde_json::from_slice::<CosiMessage>(&buf) {
            Ok(request) => {
                debug!(%request, "COSI request received");
                Self::dispatch_with(handler, options, request).await
            }
            Err(e) => CosiMessage::Error(CosiError::InvalidArgument(format!(
                "malformed request: {e}"
            ))),
        };

        let payload = serde_json::to_vec(&response).map_err(CosiError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(CosiError::transport)?;
        send.finish().map_err(CosiError::transport)?;
        Ok(())
    }

    /// Like [`dispatch`](Self::dispatch), bounded by `options`.
    pub async fn dispatch_with(
        handler: &T,
        options: &CallOptions,
        request: CosiMessage,
    ) -> CosiMessage {
        let op = request.to_string();
        call::invoke(options, &op, async {
            Ok(Self::dispatch(handler, request).await)
        })
        .await
        .unwrap_or_else(CosiMessage::Error)
    }

    /// Run one request against the driver and build its response.
    pub async fn dispatch(handler: &T, request: CosiMessage) -> CosiMessage {
        let reply = match request {
            CosiMessage::Probe => handler.probe().await.map(CosiMessage::ProbeResult),
            CosiMessage::GetDriverInfo => handler
                .get_driver_info()
                .await
                .map(CosiMessage::DriverInfoResponse),
            CosiMessage::CreateBucket(req) => handler
                .create_bucket(req)
                .await
                .map(CosiMessage::BucketCreated),
            CosiMessage::DeleteBucket(id) => {
                handler.delete_bucket(&id).await.map(|()| CosiMessage::Ok)
            }
            CosiMessage::GrantBucketAccess(grant) => handler
                .grant_bucket_access(grant)
                .await
                .map(CosiMessage::AccessGranted),
            CosiMessage::RevokeBucketAccess {
                bucket_id,
                principal,
            } => handler
                .revoke_bucket_access(&bucket_id, &principal)
                .await
                .map(|()| CosiMessage::Ok),
            response => {
                warn!(msg = %response, "response variant received as request");
                Err(CosiError::InvalidArgument(format!(
                    "not a request: {response}"
                )))
            }
        };
        reply.unwrap_or_else(CosiMessage::Error)
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, CosiError> {
        self.endpoint.local_addr().map_err(CosiError::transport)
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// shutting down.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Driver, MemoryBackend};
    use crate::config::DriverConfig;
    use crate::fake::FakeController;
    use crate::types::*;

    #[tokio::test]
    async fn dispatch_routes_controller_calls() {
        let driver = Driver::new(MemoryBackend::new(), &DriverConfig::default());

        let created = CosiServer::<Driver<MemoryBackend>>::dispatch(
            &driver,
            CosiMessage::CreateBucket(BucketRequest::new("logs-01")),
        )
        .await;
        let CosiMessage::BucketCreated(bucket) = created else {
            panic!("unexpected response {created}");
        };
        assert_eq!(bucket.bucket_id.as_str(), "b-logs-01");

        let deleted = CosiServer::<Driver<MemoryBackend>>::dispatch(
            &driver,
            CosiMessage::DeleteBucket(bucket.bucket_id),
        )
        .await;
        assert_eq!(deleted, CosiMessage::Ok);
    }

    #[tokio::test]
    async fn dispatch_rejects_response_variants() {
        let fake = FakeController::new();
        let reply = CosiServer::<FakeController>::dispatch(&fake, CosiMessage::Ok).await;
        assert!(matches!(
            reply,
            CosiMessage::Error(CosiError::InvalidArgument(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_with_bounds_slow_driver() {
        let fake = FakeController::new();
        fake.on_create_bucket(|req: BucketRequest| async move {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            Ok(Bucket {
                bucket_id: BucketId::for_name(&req.name, 1),
                name: req.name,
                parameters: Parameters::new(),
            })
        });
        let config = DriverConfig {
            request_timeout: std::time::Duration::from_secs(2),
            ..DriverConfig::default()
        };

        let reply = CosiServer::<FakeController>::dispatch_with(
            &fake,
            &CallOptions::from(&config),
            CosiMessage::CreateBucket(BucketRequest::new("slow")),
        )
        .await;
        assert!(matches!(
            reply,
            CosiMessage::Error(CosiError::DeadlineExceeded(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_passes_errors_through() {
        let fake = FakeController::new();
        let reply = CosiServer::<FakeController>::dispatch(&fake, CosiMessage::Probe).await;
        assert!(matches!(reply, CosiMessage::Error(CosiError::Unimplemented(_))));
    }
}

//! HTTP transport.
//!
//! Requests and replies are CBOR bodies POSTed to `/sync/push` and
//! `/sync/pull`. The HTTP client itself is a trait so hosts can plug in
//! whatever library they already ship, and tests can route straight into
//! a server with [`LoopbackClient`].

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteAuthority;
use parking_lot::RwLock;
use std::future::Future;
use tillsync_protocol::{PullRequest, PullResponse, PushRequest, PushResponse};
use tracing::debug;

/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/sync/push";
/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/sync/pull";

/// A reply from the remote: status code and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpReply {
    /// A 200 reply.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request. `Err` means no reply was received.
    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<HttpReply, String>> + Send;

    /// Checks if the client is able to send requests.
    fn is_healthy(&self) -> bool;
}

/// Sync transport over an [`HttpClient`] with CBOR bodies.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport against `base_url` (e.g. `https://sync.example.com`).
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn post_cbor(&self, endpoint: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        if !self.client.is_healthy() {
            return Err(SyncError::NotConnected);
        }

        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, bytes = body.len(), "POST");
        let reply = match self.client.post(&url, body).await {
            Ok(reply) => reply,
            Err(e) => {
                *self.last_error.write() = Some(e.clone());
                return Err(SyncError::transport_retryable(e));
            }
        };

        if !reply.is_success() {
            let message = String::from_utf8_lossy(&reply.body).into_owned();
            *self.last_error.write() = Some(message.clone());
            return Err(SyncError::Remote {
                status: reply.status,
                message,
            });
        }

        *self.last_error.write() = None;
        Ok(reply.body)
    }
}

impl<C: HttpClient> RemoteAuthority for HttpTransport<C> {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let body = request.encode()?;
        let reply = self.post_cbor(PUSH_PATH, body).await?;
        Ok(PushResponse::decode(&reply)?)
    }

    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        let body = request.encode()?;
        let reply = self.post_cbor(PULL_PATH, body).await?;
        Ok(PullResponse::decode(&reply)?)
    }
}

/// Servers that can answer loopback requests.
pub trait LoopbackServer {
    /// Handles a POST to `path`. `Err` carries a message for a 400 reply.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An [`HttpClient`] that hands requests directly to an in-process server.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a loopback client for `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpReply, String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        Ok(match self.server.handle_post(path, &body) {
            Ok(body) => HttpReply::ok(body),
            Err(message) => HttpReply {
                status: 400,
                body: message.into_bytes(),
            },
        })
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

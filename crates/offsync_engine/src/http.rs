//! HTTP gateway implementation.
//!
//! The actual HTTP client is abstracted via a trait so applications can
//! plug in whatever stack the platform provides. Bodies are JSON.
//!
//! Endpoints are `{base}/sync/{entity_type}/pull` and
//! `{base}/sync/{entity_type}/push`, both `POST`, both carrying an
//! `Authorization: Bearer` header.

use crate::credential::Credential;
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteSyncGateway;
use async_trait::async_trait;
use offsync_protocol::{ProtocolError, PullRequest, PullResponse, PushAck, PushRequest};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Creates a `200` response with a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(200, body),
            Err(e) => Self::new(500, e.to_string()),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a `POST` with the given `Authorization` header value.
    ///
    /// Returns `Err` only when no response was received at all.
    async fn post(&self, url: &str, authorization: &str, body: Vec<u8>)
        -> Result<HttpResponse, String>;
}

/// HTTP-based remote gateway.
pub struct HttpGateway<C: HttpClient> {
    /// Base URL of the sync backend (e.g., "https://api.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
}

impl<C: HttpClient> HttpGateway<C> {
    /// Creates a new HTTP gateway.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, entity_type: &str, action: &str) -> String {
        format!("{}/sync/{}/{}", self.base_url, entity_type, action)
    }

    async fn post_json<Req, Res>(
        &self,
        url: &str,
        subject: &str,
        credential: &Credential,
        request: &Req,
    ) -> SyncResult<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(ProtocolError::from)?;

        let response = self
            .client
            .post(url, &credential.header_value(), body)
            .await
            .map_err(|e| {
                warn!(url, error = %e, "request failed");
                SyncError::network_retryable(e)
            })?;

        debug!(url, status = response.status, "response received");
        classify(subject, response)
    }
}

fn classify<Res: DeserializeOwned>(subject: &str, response: HttpResponse) -> SyncResult<Res> {
    let message = || String::from_utf8_lossy(&response.body).into_owned();
    match response.status {
        200..=299 => Ok(serde_json::from_slice(&response.body).map_err(ProtocolError::from)?),
        401 | 403 => Err(SyncError::Unauthorized),
        400 | 409 | 422 => Err(SyncError::validation(subject, message())),
        408 | 504 => Err(SyncError::Timeout),
        429 | 500..=599 => Err(SyncError::network_retryable(format!(
            "HTTP {}: {}",
            response.status,
            message()
        ))),
        status => Err(SyncError::network_fatal(format!("HTTP {status}: {}", message()))),
    }
}

#[async_trait]
impl<C: HttpClient> RemoteSyncGateway for HttpGateway<C> {
    async fn pull(&self, credential: &Credential, request: PullRequest) -> SyncResult<PullResponse> {
        let url = self.url(&request.entity_type, "pull");
        self.post_json(&url, &request.entity_type, credential, &request)
            .await
    }

    async fn push(&self, credential: &Credential, request: PushRequest) -> SyncResult<PushAck> {
        let url = self.url(&request.entity_type, "push");
        // Validation errors name the first mutation; the queue pushes one
        // mutation per request.
        let subject = request
            .mutations
            .first()
            .map_or_else(|| request.entity_type.clone(), |m| m.entity_id.clone());
        self.post_json(&url, &subject, credential, &request).await
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a `POST` to `path` (starting at `/sync/`).
    fn handle_post(&self, path: &str, authorization: &str, body: &[u8]) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(
        &self,
        url: &str,
        authorization: &str,
        body: Vec<u8>,
    ) -> Result<HttpResponse, String> {
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        Ok(self.server.handle_post(path, authorization, &body))
    }
}

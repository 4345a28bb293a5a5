//! HTTP transport seam and the shared retry policy.
//!
//! The client never talks to an HTTP library directly: every request goes
//! through the [`Transport`] trait so tests (and embedders) can substitute
//! their own. [`ReqwestTransport`] is the default implementation.
//!
//! [`RetryingTransport`] wraps a transport with the generic retry rule used by
//! the metadata exchange and every data RPC:
//! - 2xx is returned as is
//! - 5xx and transient network failures retransmit the identical body, up to
//!   `max_retries` extra attempts, sequentially, with exponential backoff
//! - any other status fails immediately
//!
//! Unary calls go through [`RetryingTransport::send_buffered`], which reads the
//! body inside the retry loop so a connection lost mid-body is retried too.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Future, StreamExt, TryStreamExt};
use kvconnect_types::{Error, ProtocolError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, std::result::Result<Bytes, TransportFailure>>;

/// A single POST request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: Vec<(&'static str, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response head plus a lazily consumed body.
pub struct HttpResponse {
    pub status: u16,
    /// Final location of the response, after any redirects.
    pub url: Url,
    pub content_type: Option<String>,
    pub body: BodyStream,
}

impl HttpResponse {
    /// Response with a fully buffered body.
    pub fn from_bytes(
        status: u16,
        url: Url,
        content_type: Option<&str>,
        body: impl Into<Bytes>,
    ) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            url,
            content_type: content_type.map(str::to_string),
            body: futures::stream::once(futures::future::ready(Ok::<_, TransportFailure>(body)))
                .boxed(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into a single buffer.
    pub async fn bytes(self) -> std::result::Result<Bytes, TransportFailure> {
        let mut buf = BytesMut::new();
        let mut body = self.body;
        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Successful response with the body read to the end.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    pub status: u16,
    /// Final location of the response, after any redirects.
    pub url: Url,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Failure below the HTTP layer (connect, TLS, reset, body read).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub message: String,
    /// Whether retransmitting the same request may succeed.
    pub transient: bool,
}

impl TransportFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// Pluggable HTTP transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn post(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportFailure>;
}

/// Default transport backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportFailure> {
        let mut builder = self.client.post(request.url.clone()).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send().await.map_err(|e| TransportFailure {
            message: format!("Request to {} failed: {}", request.url, e),
            transient: !e.is_builder(),
        })?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes_stream()
            .map_err(|e| TransportFailure::transient(format!("Body read failed: {}", e)))
            .boxed();

        Ok(HttpResponse {
            status,
            url,
            content_type,
            body,
        })
    }
}

/// Tunables for transport retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_base: Duration,
    /// Upper bound for a single backoff delay.
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let growth = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(growth)
            .min(self.backoff_max)
    }
}

/// Transport plus retry policy, shared by the session and the RPC client.
#[derive(Clone)]
pub struct RetryingTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
    debug: bool,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy, debug: bool) -> Self {
        Self {
            inner,
            policy,
            debug,
        }
    }

    /// Send `request`, retrying 5xx and transient failures.
    ///
    /// Returns only 2xx responses; everything else becomes an error. The body
    /// is handed back unread, so failures while streaming it are not retried.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute(request, |response| futures::future::ready(Ok(response)))
            .await
    }

    /// Like [`send`](Self::send), but the body is drained as part of each
    /// attempt and a transient body failure counts as a failed attempt.
    pub async fn send_buffered(&self, request: HttpRequest) -> Result<BufferedResponse> {
        self.execute(request, |response| async move {
            let status = response.status;
            let url = response.url.clone();
            let content_type = response.content_type.clone();
            let body = response.bytes().await?;
            Ok::<_, TransportFailure>(BufferedResponse {
                status,
                url,
                content_type,
                body,
            })
        })
        .await
    }

    async fn execute<T, F, Fut>(&self, request: HttpRequest, accept: F) -> Result<T>
    where
        F: Fn(HttpResponse) -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportFailure>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if self.debug {
                debug!(url = %request.url, attempt, bytes = request.body.len(), "POST");
            }

            let outcome = match self.inner.post(request.clone()).await {
                Ok(response) if response.is_success() => {
                    if self.debug {
                        debug!(url = %request.url, status = response.status, "Response");
                    }
                    match accept(response).await {
                        Ok(accepted) => return Ok(accepted),
                        Err(failure) => Err(failure),
                    }
                }
                Ok(response) if response.status >= 500 => Ok(response.status),
                Ok(response) => {
                    let status = response.status;
                    let url = response.url.to_string();
                    let body = response
                        .bytes()
                        .await
                        .map(|b| String::from_utf8_lossy(&b).into_owned())
                        .unwrap_or_default();
                    return Err(ProtocolError::UnexpectedStatus { url, status, body }.into());
                }
                Err(failure) => Err(failure),
            };

            let (status, message) = match outcome {
                Ok(status) => (Some(status), format!("Server returned status {}", status)),
                Err(failure) if failure.transient => (None, failure.message),
                Err(failure) => {
                    return Err(Error::Transport {
                        url: request.url.to_string(),
                        attempts: attempt,
                        status: None,
                        message: failure.message,
                    })
                }
            };

            if attempt > self.policy.max_retries {
                return Err(Error::Transport {
                    url: request.url.to_string(),
                    attempts: attempt,
                    status,
                    message,
                });
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                url = %request.url,
                attempt,
                status = ?status,
                delay_ms = delay.as_millis() as u64,
                "Retrying request: {}",
                message
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

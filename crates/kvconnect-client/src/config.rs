use crate::transport::{RetryPolicy, Transport};
use crate::value::ValueCodec;
use kvconnect_types::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Environment variable holding the metadata URL.
pub const ENV_URL: &str = "KV_CONNECT_URL";
/// Environment variable holding the access token.
pub const ENV_ACCESS_TOKEN: &str = "KV_CONNECT_ACCESS_TOKEN";

/// Configuration for a KV Connect client
#[derive(Clone)]
pub struct ClientConfig {
    /// Metadata exchange URL
    pub url: String,
    /// Access token presented on the metadata exchange
    pub access_token: String,
    /// Extra attempts for 5xx / network failures
    pub max_retries: u32,
    /// Protocol versions this client accepts
    pub supported_versions: Vec<u32>,
    /// Initial retry backoff, doubled per retry
    pub retry_backoff_base: Duration,
    /// Cap for a single retry backoff
    pub retry_backoff_max: Duration,
    /// Log every request and response at debug level
    pub debug: bool,
    /// Value codec override
    pub value_codec: Option<Arc<dyn ValueCodec>>,
    /// Transport override
    pub transport: Option<Arc<dyn Transport>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            url: String::new(),
            access_token: String::new(),
            max_retries: retry.max_retries,
            supported_versions: vec![1, 2, 3],
            retry_backoff_base: retry.backoff_base,
            retry_backoff_max: retry.backoff_max,
            debug: false,
            value_codec: None,
            transport: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("access_token", &"<redacted>")
            .field("max_retries", &self.max_retries)
            .field("supported_versions", &self.supported_versions)
            .field("retry_backoff_base", &self.retry_backoff_base)
            .field("retry_backoff_max", &self.retry_backoff_max)
            .field("debug", &self.debug)
            .field("value_codec", &self.value_codec.is_some())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    /// Read `KV_CONNECT_URL` and `KV_CONNECT_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_URL)
            .map_err(|_| Error::Config(format!("{} is not set", ENV_URL)))?;
        let token = std::env::var(ENV_ACCESS_TOKEN)
            .map_err(|_| Error::Config(format!("{} is not set", ENV_ACCESS_TOKEN)))?;
        Ok(Self::new(url, token))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_supported_versions(mut self, versions: impl Into<Vec<u32>>) -> Self {
        self.supported_versions = versions.into();
        self
    }

    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_backoff_base = base;
        self.retry_backoff_max = max;
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn with_value_codec(mut self, codec: impl ValueCodec) -> Self {
        self.value_codec = Some(Arc::new(codec));
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.retry_backoff_base,
            backoff_max: self.retry_backoff_max,
        }
    }

    /// Check required fields and parse the metadata URL.
    pub fn validate(&self) -> Result<Url> {
        if self.access_token.is_empty() {
            return Err(Error::Config("access token is required".to_string()));
        }
        if self.supported_versions.is_empty() {
            return Err(Error::Config(
                "at least one supported protocol version is required".to_string(),
            ));
        }
        let url = Url::parse(&self.url)
            .map_err(|e| Error::Config(format!("invalid url '{}': {}", self.url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::Config(format!(
                "unsupported url scheme '{}' in '{}'",
                other, self.url
            ))),
        }
    }
}

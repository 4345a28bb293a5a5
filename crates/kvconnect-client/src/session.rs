//! Metadata session: owns the live [`DatabaseMetadata`] and refreshes it.
//!
//! The metadata lives in an [`ArcSwap`]. Readers take an `Arc` snapshot and
//! keep it for the whole request; a refresh stores a brand-new `Arc`, so no
//! reader ever observes a half-updated value and no lock is held across I/O.
//!
//! Refresh triggers:
//! - [`Session::refresh_if_needed`] before every endpoint resolution, when the
//!   current metadata expires in less than five minutes
//! - [`Session::force_refresh`] from the consistency recovery path

use crate::config::ClientConfig;
use crate::metadata::DatabaseMetadata;
use crate::transport::{HttpRequest, RetryingTransport};
use arc_swap::ArcSwap;
use chrono::{Duration, Utc};
use kvconnect_types::{Error, ProtocolError, Result};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Remaining lifetime below which metadata is re-fetched.
pub const REFRESH_WINDOW_MINUTES: i64 = 5;

pub struct Session {
    url: Url,
    access_token: String,
    supported_versions: Vec<u32>,
    transport: RetryingTransport,
    metadata: ArcSwap<DatabaseMetadata>,
}

impl Session {
    /// Validate `config` and perform the initial metadata exchange.
    pub async fn open(config: &ClientConfig, transport: RetryingTransport) -> Result<Self> {
        let url = config.validate()?;
        let metadata = fetch_metadata(
            &transport,
            &url,
            &config.access_token,
            &config.supported_versions,
        )
        .await?;

        Ok(Self {
            url,
            access_token: config.access_token.clone(),
            supported_versions: config.supported_versions.clone(),
            transport,
            metadata: ArcSwap::from_pointee(metadata),
        })
    }

    /// Current metadata snapshot.
    pub fn snapshot(&self) -> Arc<DatabaseMetadata> {
        self.metadata.load_full()
    }

    /// Re-fetch when less than five minutes of validity remain.
    ///
    /// Returns whether a refresh happened.
    pub async fn refresh_if_needed(&self) -> Result<bool> {
        let window = Duration::minutes(REFRESH_WINDOW_MINUTES);
        if !self.metadata.load().expires_within(window, Utc::now()) {
            return Ok(false);
        }
        debug!(url = %self.url, "Metadata close to expiry, refreshing");
        self.force_refresh().await?;
        Ok(true)
    }

    /// Unconditionally re-fetch and swap in new metadata.
    pub async fn force_refresh(&self) -> Result<Arc<DatabaseMetadata>> {
        let metadata = Arc::new(
            fetch_metadata(
                &self.transport,
                &self.url,
                &self.access_token,
                &self.supported_versions,
            )
            .await?,
        );
        self.metadata.store(metadata.clone());
        Ok(metadata)
    }
}

async fn fetch_metadata(
    transport: &RetryingTransport,
    url: &Url,
    access_token: &str,
    supported_versions: &[u32],
) -> Result<DatabaseMetadata> {
    let body = serde_json::to_vec(&serde_json::json!({
        "supportedVersions": supported_versions,
    }))
    .map_err(|e| Error::Config(format!("Failed to encode metadata request: {}", e)))?;

    let request = HttpRequest::new(url.clone(), body)
        .with_header("authorization", format!("Bearer {}", access_token))
        .with_header("content-type", "application/json");

    let response = transport.send_buffered(request).await?;
    if !is_json(response.content_type.as_deref()) {
        return Err(ProtocolError::UnexpectedContentType {
            url: response.url.to_string(),
            content_type: response.content_type,
        }
        .into());
    }

    let location = response.url;
    let body = response.body;

    let metadata = DatabaseMetadata::parse(&body, &location, supported_versions)?;
    info!(
        version = metadata.version,
        database_id = %metadata.database_id,
        endpoints = metadata.endpoints.len(),
        expires_at = %metadata.expires_at,
        "Fetched database metadata"
    );
    Ok(metadata)
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|media| media.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

//! Database metadata returned by the metadata exchange.
//!
//! The JSON body is first decoded into a plain serde record and then checked
//! by [`DatabaseMetadata::from_raw`], which yields either a fully typed value
//! or a [`ProtocolError`] naming the violated rule.

use chrono::{DateTime, Duration, Utc};
use kvconnect_types::ProtocolError;
use serde::Deserialize;
use std::fmt;
use url::Url;

/// Consistency class of an endpoint or a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Consistency {
    /// Served by the primary.
    #[default]
    Strong,
    /// Served by replicas with bounded staleness.
    Eventual,
}

impl Consistency {
    /// Anything other than `"strong"` counts as eventual.
    pub fn from_wire(s: &str) -> Self {
        if s == "strong" {
            Consistency::Strong
        } else {
            Consistency::Eventual
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::Strong => "strong",
            Consistency::Eventual => "eventual",
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routable base URL plus its consistency class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Absolute URL without a trailing slash.
    pub url: String,
    pub consistency: Consistency,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    version: u32,
    // Version 1 servers name this field `uuid`.
    #[serde(alias = "uuid")]
    database_id: String,
    endpoints: Vec<RawEndpoint>,
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    url: String,
    consistency: String,
}

/// Validated metadata snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseMetadata {
    pub version: u32,
    pub database_id: String,
    pub endpoints: Vec<Endpoint>,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl DatabaseMetadata {
    /// Parse a metadata response body.
    ///
    /// `location` is the final URL of the response; relative endpoint URLs are
    /// resolved against it.
    pub fn parse(
        body: &[u8],
        location: &Url,
        supported_versions: &[u32],
    ) -> Result<Self, ProtocolError> {
        let raw: RawMetadata = serde_json::from_slice(body)
            .map_err(|e| ProtocolError::MalformedMetadata(e.to_string()))?;
        Self::from_raw(raw, location, supported_versions)
    }

    fn from_raw(
        raw: RawMetadata,
        location: &Url,
        supported_versions: &[u32],
    ) -> Result<Self, ProtocolError> {
        if !supported_versions.contains(&raw.version) {
            return Err(ProtocolError::UnsupportedVersion {
                version: raw.version,
                supported: supported_versions.to_vec(),
            });
        }
        if raw.token.is_empty() {
            return Err(ProtocolError::EmptyToken);
        }
        if raw.endpoints.is_empty() {
            return Err(ProtocolError::NoEndpoints);
        }

        let expires_at = DateTime::parse_from_rfc3339(&raw.expires_at)
            .map_err(|e| {
                ProtocolError::MalformedMetadata(format!(
                    "invalid expiresAt '{}': {}",
                    raw.expires_at, e
                ))
            })?
            .with_timezone(&Utc);

        let endpoints = raw
            .endpoints
            .into_iter()
            .map(|endpoint| {
                let resolved = location.join(&endpoint.url).map_err(|e| {
                    ProtocolError::MalformedMetadata(format!(
                        "invalid endpoint url '{}': {}",
                        endpoint.url, e
                    ))
                })?;
                Ok(Endpoint {
                    url: resolved.as_str().trim_end_matches('/').to_string(),
                    consistency: Consistency::from_wire(&endpoint.consistency),
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;

        Ok(Self {
            version: raw.version,
            database_id: raw.database_id,
            endpoints,
            token: raw.token,
            expires_at,
        })
    }

    /// Whether the metadata expires less than `window` after `now`.
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - now < window
    }

    pub fn supports_watch(&self) -> bool {
        self.version >= 3
    }
}

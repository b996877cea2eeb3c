//! Fetch policy, transports, and post-fetch filters.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use tsl_model::{Certificate, Tsl};
use tsl_types::{Result, TslError};

/// Content types sent when no `accept:` option is configured.
pub const DEFAULT_ACCEPT: &[&str] = &["application/xml", "text/xml", "*/*"];
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Key under which [`TslFilters`] live in the context scratch map.
pub const FILTERS_KEY: &str = "tsl_filters";
/// Key of the `prefer-xml` flag in the context scratch map.
pub const PREFER_XML_KEY: &str = "prefer_xml_over_pdf";

pub fn default_user_agent() -> String {
    format!("tsl-tool/{} TSL Fetcher", env!("CARGO_PKG_VERSION"))
}

pub fn default_accept() -> Vec<String> {
    DEFAULT_ACCEPT.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Transport used to retrieve TSL bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, negotiating with the given `accept` list.
    async fn fetch(&self, url: &str, options: &FetchOptions, accept: &[String]) -> Result<Vec<u8>>;
}

/// Verifies enveloped XML signatures on fetched documents.
pub trait SignatureVerifier: Send + Sync {
    /// Check the signature of `document` and return the signing certificate.
    fn verify(&self, document: &[u8]) -> Result<Certificate>;
}

/// HTTP(S) transport backed by `reqwest`. Local paths and `file://` URLs
/// are read from disk.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions, accept: &[String]) -> Result<Vec<u8>> {
        if let Some(path) = local_path(url) {
            return tokio::fs::read(path).await.map_err(|e| TslError::Load {
                url: url.to_string(),
                reason: Some("failed to read file".into()),
                source: Some(Box::new(e)),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TslError::load(url, "unsupported URL scheme"));
        }

        let accept = if accept.is_empty() {
            DEFAULT_ACCEPT.join(", ")
        } else {
            accept.join(", ")
        };
        tracing::debug!(url = %url, accept = %accept, "Fetching TSL");

        let resp = self
            .client
            .get(url)
            .timeout(options.timeout)
            .header(USER_AGENT, &options.user_agent)
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|e| TslError::Load {
                url: url.to_string(),
                reason: Some(if e.is_timeout() {
                    format!("timed out after {:?}", options.timeout)
                } else {
                    "request failed".to_string()
                }),
                source: Some(Box::new(e)),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TslError::load(url, format!("HTTP {}", status.as_u16())));
        }
        let body = resp.bytes().await.map_err(|e| TslError::Load {
            url: url.to_string(),
            reason: Some("failed to read response body".into()),
            source: Some(Box::new(e)),
        })?;
        Ok(body.to_vec())
    }
}

/// Filesystem path for `file://` URLs and scheme-less locators.
fn local_path(url: &str) -> Option<&Path> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(Path::new(rest));
    }
    if url.contains("://") {
        return None;
    }
    Some(Path::new(url))
}

// ---------------------------------------------------------------------------
// FetchOptions
// ---------------------------------------------------------------------------

/// How documents are fetched and how far pointers are followed.
#[derive(Clone)]
pub struct FetchOptions {
    pub user_agent: String,
    pub timeout: Duration,
    /// Ordered content types for negotiation.
    pub accept: Vec<String>,
    /// `0` = root only, negative = unlimited, `N` = follow N levels.
    pub max_depth: i64,
    /// Overrides the pipeline's fetcher when set.
    pub transport: Option<Arc<dyn Fetcher>>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout: DEFAULT_TIMEOUT,
            accept: default_accept(),
            max_depth: -1,
            transport: None,
        }
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("accept", &self.accept)
            .field("max_depth", &self.max_depth)
            .field("transport", &self.transport.as_ref().map(|_| "custom"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Post-fetch filters set by `set-fetch-options`. Keys are AND'ed, values
/// within a key are OR'ed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TslFilters {
    /// Territory codes, compared case-insensitively.
    #[serde(rename = "territory", default, skip_serializing_if = "Vec::is_empty")]
    pub territories: Vec<String>,
    /// Substrings of a service type identifier.
    #[serde(rename = "service-type", default, skip_serializing_if = "Vec::is_empty")]
    pub service_types: Vec<String>,
}

impl TslFilters {
    /// Read the filters stored in a context scratch map. Missing or
    /// malformed entries yield no filters.
    pub fn from_data(data: &HashMap<String, serde_json::Value>) -> Self {
        data.get(FILTERS_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.territories.is_empty() && self.service_types.is_empty()
    }

    pub fn matches(&self, tsl: &Tsl) -> bool {
        let territory_ok = self.territories.is_empty()
            || tsl.territory().is_some_and(|t| {
                self.territories
                    .iter()
                    .any(|want| want.trim().eq_ignore_ascii_case(t))
            });
        let service_ok = self.service_types.is_empty()
            || tsl.services().any(|(_, s)| {
                self.service_types
                    .iter()
                    .any(|want| s.service_type.contains(want.as_str()))
            });
        territory_ok && service_ok
    }

    pub fn apply(&self, tsls: Vec<Arc<Tsl>>) -> Vec<Arc<Tsl>> {
        if self.is_empty() {
            return tsls;
        }
        tsls.into_iter().filter(|t| self.matches(t)).collect()
    }
}

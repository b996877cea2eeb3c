//! Depth-bounded resolution of a TSL and the documents it points to.
//!
//! Pointers are followed sequentially, depth-first. A pointer that cannot be
//! fetched, parsed, or verified is logged and skipped; only a failure of the
//! root document is returned to the caller. The depth bound is the only
//! termination guarantee: a document pointing at itself is revisited once
//! per permitted level.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tsl_model::{Tsl, TslPointer};
use tsl_types::{Result, TslError};
use tracing::{debug, info, warn};

use crate::fetch::{FetchOptions, Fetcher, SignatureVerifier};
use crate::tree::TslTree;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Resolves a root locator into a tree of documents.
pub struct Resolver<'a> {
    fetcher: &'a dyn Fetcher,
    verifier: Option<&'a dyn SignatureVerifier>,
    options: &'a FetchOptions,
    prefer_xml: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, options: &'a FetchOptions) -> Self {
        Self {
            fetcher,
            verifier: None,
            options,
            prefer_xml: false,
        }
    }

    pub fn with_verifier(mut self, verifier: Option<&'a dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Fetch PDF-hinted pointers with XML negotiation straight away.
    pub fn prefer_xml(mut self, prefer: bool) -> Self {
        self.prefer_xml = prefer;
        self
    }

    /// Fetch `url` and follow its pointers up to `max_depth` levels
    /// (negative = unlimited).
    pub async fn resolve(&self, url: &str, max_depth: i64) -> Result<Arc<Tsl>> {
        let root = self.fetch_document(url, &self.options.accept).await?;
        info!(
            url = %url,
            territory = root.territory().unwrap_or("unknown"),
            services = root.service_count(),
            "Loaded TSL"
        );
        Ok(self.expand(root, max_depth).await)
    }

    /// Convenience wrapper returning the resolved tree.
    pub async fn resolve_tree(&self, url: &str, max_depth: i64) -> Result<TslTree> {
        let root = self.resolve(url, max_depth).await?;
        Ok(TslTree::new(Some(root)))
    }

    fn expand(&self, tsl: Tsl, remaining: i64) -> BoxFuture<'_, Arc<Tsl>> {
        Box::pin(async move {
            if remaining == 0 {
                return Arc::new(tsl);
            }
            let pointers = tsl.pointers();
            if pointers.is_empty() {
                return Arc::new(tsl);
            }
            let next = if remaining < 0 { remaining } else { remaining - 1 };

            let mut referenced = Vec::with_capacity(pointers.len());
            for pointer in &pointers {
                match self.fetch_pointer(pointer).await {
                    Ok(child) => {
                        debug!(
                            parent = %tsl.source,
                            child = %pointer.location,
                            "Resolved referenced TSL"
                        );
                        referenced.push(self.expand(child, next).await);
                    }
                    Err(e) => warn!(
                        parent = %tsl.source,
                        url = %pointer.location,
                        error = %e,
                        "Skipping unresolvable TSL reference"
                    ),
                }
            }
            Arc::new(tsl.with_referenced(referenced))
        })
    }

    /// Fetch a pointer target. A pointer hinting a non-XML format is first
    /// tried with that format and then with the default negotiation.
    async fn fetch_pointer(&self, pointer: &TslPointer) -> Result<Tsl> {
        match pointer.non_xml_mime() {
            Some(mime) if !self.prefer_xml => {
                let accept = [mime.to_string()];
                match self.fetch_document(&pointer.location, &accept).await {
                    Ok(tsl) => Ok(tsl),
                    Err(e) => {
                        debug!(
                            url = %pointer.location,
                            mime = %mime,
                            error = %e,
                            "Hinted format failed, retrying with XML negotiation"
                        );
                        self.fetch_document(&pointer.location, &self.options.accept)
                            .await
                    }
                }
            }
            _ => {
                self.fetch_document(&pointer.location, &self.options.accept)
                    .await
            }
        }
    }

    async fn fetch_document(&self, url: &str, accept: &[String]) -> Result<Tsl> {
        let bytes = self.fetcher.fetch(url, self.options, accept).await?;
        let mut tsl = Tsl::from_bytes(url, bytes).map_err(|e| TslError::Load {
            url: url.to_string(),
            reason: Some("failed to parse TSL".into()),
            source: Some(Box::new(e)),
        })?;

        if let Some(verifier) = self.verifier {
            if tsl.has_signature() {
                let raw = tsl.raw.as_deref().unwrap_or_default();
                let signer = verifier.verify(raw).map_err(|e| TslError::Load {
                    url: url.to_string(),
                    reason: Some("signature verification failed".into()),
                    source: Some(Box::new(e)),
                })?;
                tsl.signed = true;
                tsl.signer = Some(signer);
            }
        }
        Ok(tsl)
    }
}

//! Source adapter trait and registry.
//!
//! Each jurisdiction source is served by an adapter implementing
//! [`SourceAdapter`]. New jurisdictions are added by implementing the
//! trait and registering it under a name; the orchestrator never changes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexsync_shared::{FetchError, RawDocument, SourceConfig};

use crate::http_feed::HttpFeedAdapter;

/// One document a source currently publishes, as returned by a listing.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    /// Source-native document identifier.
    pub external_id: String,
    /// Where the document body is fetched from.
    pub url: String,
    /// Last-modified timestamp, when the source exposes one.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A pluggable source backend.
///
/// The orchestrator drives adapters strictly serially per source and
/// owns politeness delays, retries, and cancellation; adapters only
/// translate one listing call and one document fetch each into the
/// source's native protocol.
///
/// Individual-document interpretation problems must not surface as
/// errors from [`fetch_document`](Self::fetch_document): return a
/// [`RawDocument`] with `parse_error` set instead, so the orchestrator
/// skips just that item and continues the sequence.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name for tracing and registry lookup.
    fn name(&self) -> &str;

    /// List the documents the source currently publishes. `since`
    /// restricts the listing to documents changed after the watermark
    /// when the source supports it.
    async fn list(
        &self,
        source: &SourceConfig,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DocumentRef>, FetchError>;

    /// Fetch one document's raw payload.
    async fn fetch_document(
        &self,
        source: &SourceConfig,
        doc: &DocumentRef,
    ) -> Result<RawDocument, FetchError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters, selected by name from source config.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    /// Create a registry with all built-in adapters.
    pub fn new() -> Result<Self, FetchError> {
        let mut registry = Self {
            adapters: HashMap::new(),
        };
        registry.register(Arc::new(HttpFeedAdapter::new()?));
        Ok(registry)
    }

    /// Register an adapter under its own name, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Look up the adapter a source is configured to use.
    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_http_feed_by_default() {
        let registry = AdapterRegistry::new().expect("registry");
        assert!(registry.get("http-feed").is_some());
        assert!(registry.get("no-such-adapter").is_none());
    }

    #[test]
    fn registering_overrides_by_name() {
        struct Dummy;

        #[async_trait]
        impl SourceAdapter for Dummy {
            fn name(&self) -> &str {
                "http-feed"
            }
            async fn list(
                &self,
                _source: &SourceConfig,
                _since: Option<DateTime<Utc>>,
            ) -> Result<Vec<DocumentRef>, FetchError> {
                Ok(Vec::new())
            }
            async fn fetch_document(
                &self,
                _source: &SourceConfig,
                _doc: &DocumentRef,
            ) -> Result<RawDocument, FetchError> {
                Err(FetchError::parse("dummy"))
            }
        }

        let mut registry = AdapterRegistry::new().expect("registry");
        registry.register(Arc::new(Dummy));
        let adapter = registry.get("http-feed").expect("adapter");
        assert_eq!(adapter.name(), "http-feed");
    }
}

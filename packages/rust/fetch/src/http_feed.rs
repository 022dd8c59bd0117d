//! Adapter for sources that publish a JSON listing of documents.
//!
//! The listing endpoint (the source's `base_url`) returns an array of
//! entries `{ "id": ..., "url": ..., "updated_at": ... }`; each entry's
//! URL serves the document body. Most small regulators publish exactly
//! this shape, so it is the default adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexsync_shared::{FetchError, RawDocument, SourceConfig};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::adapter::{DocumentRef, SourceAdapter};

/// User-Agent string for all requests.
const USER_AGENT: &str = concat!("LexSync/", env!("CARGO_PKG_VERSION"));

/// One entry of the JSON listing.
#[derive(Debug, Deserialize)]
struct FeedEntry {
    id: String,
    url: String,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Default adapter: JSON listing endpoint plus one GET per document.
pub struct HttpFeedAdapter {
    client: Client,
}

impl HttpFeedAdapter {
    /// Build the adapter with its HTTP client. Per-attempt timeouts are
    /// enforced by the orchestrator, not the client.
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::parse(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceAdapter for HttpFeedAdapter {
    fn name(&self) -> &str {
        "http-feed"
    }

    #[instrument(skip_all, fields(source_id = %source.id))]
    async fn list(
        &self,
        source: &SourceConfig,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DocumentRef>, FetchError> {
        let mut request = self.client.get(&source.base_url);
        if let Some(watermark) = since {
            // Servers that ignore the parameter still work; the
            // client-side filter below covers them.
            request = request.query(&[("since", watermark.to_rfc3339())]);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::status(
                status.as_u16(),
                format!("listing request to {} failed", source.base_url),
            ));
        }

        let entries: Vec<FeedEntry> = response
            .json()
            .await
            .map_err(|e| FetchError::parse(format!("invalid listing payload: {e}")))?;

        let refs = entries
            .into_iter()
            .filter(|entry| match (since, entry.updated_at) {
                // Entries without a timestamp are always fetched; the
                // whole-document fingerprint check makes that cheap.
                (Some(watermark), Some(updated)) => updated > watermark,
                _ => true,
            })
            .map(|entry| DocumentRef {
                external_id: entry.id,
                url: entry.url,
                updated_at: entry.updated_at,
            })
            .collect();

        Ok(refs)
    }

    #[instrument(skip_all, fields(source_id = %source.id, external_id = %doc.external_id))]
    async fn fetch_document(
        &self,
        source: &SourceConfig,
        doc: &DocumentRef,
    ) -> Result<RawDocument, FetchError> {
        let response = self
            .client
            .get(&doc.url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FetchError::new(
                lexsync_shared::FetchErrorKind::RateLimited,
                format!("source throttled request for '{}'", doc.external_id),
            ));
        }
        if !status.is_success() {
            return Err(FetchError::status(
                status.as_u16(),
                format!("document request to {} failed", doc.url),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/plain")
            .to_string();

        let mut raw = RawDocument {
            source_id: source.id.clone(),
            external_id: doc.external_id.clone(),
            source_url: doc.url.clone(),
            retrieved_at: Utc::now(),
            payload: Vec::new(),
            content_type,
            status_code: Some(status.as_u16()),
            retry_count: 0,
            parse_error: None,
        };

        // Body-read problems are per-item: tag instead of erroring so the
        // orchestrator skips just this document.
        match response.bytes().await {
            Ok(bytes) => raw.payload = bytes.to_vec(),
            Err(e) => raw.parse_error = Some(format!("failed to read body: {e}")),
        }

        Ok(raw)
    }
}

/// Map transport-level failures onto the fetch taxonomy.
fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::timeout(e.to_string())
    } else if e.is_connect() {
        // Connection refused/reset behaves like a 5xx for retry purposes.
        FetchError::status(503, format!("connection failed: {e}"))
    } else {
        FetchError::parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexsync_shared::{FetchErrorKind, JurisdictionTier};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(base_url: String) -> SourceConfig {
        SourceConfig {
            id: "us-fed".into(),
            jurisdiction: JurisdictionTier::Federal,
            base_url,
            politeness_delay_ms: 0,
            adapter: "http-feed".into(),
        }
    }

    #[tokio::test]
    async fn list_parses_feed_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "cfr-1", "url": format!("{}/docs/1", server.uri()), "updated_at": "2026-08-01T00:00:00Z"},
                {"id": "cfr-2", "url": format!("{}/docs/2", server.uri())}
            ])))
            .mount(&server)
            .await;

        let adapter = HttpFeedAdapter::new().expect("adapter");
        let src = source(format!("{}/feed.json", server.uri()));
        let refs = adapter.list(&src, None).await.expect("list");

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].external_id, "cfr-1");
        assert!(refs[0].updated_at.is_some());
        assert!(refs[1].updated_at.is_none());
    }

    #[tokio::test]
    async fn list_applies_since_watermark() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.json"))
            .and(query_param("since", "2026-06-01T00:00:00+00:00"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "old", "url": "https://example.gov/old", "updated_at": "2026-01-01T00:00:00Z"},
                {"id": "new", "url": "https://example.gov/new", "updated_at": "2026-08-01T00:00:00Z"},
                {"id": "undated", "url": "https://example.gov/undated"}
            ])))
            .mount(&server)
            .await;

        let adapter = HttpFeedAdapter::new().expect("adapter");
        let src = source(format!("{}/feed.json", server.uri()));
        let since = "2026-06-01T00:00:00Z".parse().expect("timestamp");
        let refs = adapter.list(&src, Some(since)).await.expect("list");

        let ids: Vec<&str> = refs.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "undated"]);
    }

    #[tokio::test]
    async fn list_maps_http_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.json"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let adapter = HttpFeedAdapter::new().expect("adapter");
        let src = source(format!("{}/feed.json", server.uri()));
        let err = adapter.list(&src, None).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::HttpStatus(502));
        assert!(err.kind.is_transient());
    }

    #[tokio::test]
    async fn malformed_listing_is_a_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let adapter = HttpFeedAdapter::new().expect("adapter");
        let src = source(format!("{}/feed.json", server.uri()));
        let err = adapter.list(&src, None).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::ParseFailure);
        assert!(!err.kind.is_transient());
    }

    #[tokio::test]
    async fn fetch_document_captures_payload_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<p>Scope.</p>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let adapter = HttpFeedAdapter::new().expect("adapter");
        let src = source(format!("{}/feed.json", server.uri()));
        let doc_ref = DocumentRef {
            external_id: "cfr-1".into(),
            url: format!("{}/docs/1", server.uri()),
            updated_at: None,
        };

        let raw = adapter.fetch_document(&src, &doc_ref).await.expect("fetch");
        assert_eq!(raw.document_id(), "us-fed:cfr-1");
        assert_eq!(raw.status_code, Some(200));
        assert!(raw.content_type.starts_with("text/html"));
        assert_eq!(raw.payload, b"<p>Scope.</p>");
        assert!(raw.parse_error.is_none());
    }

    #[tokio::test]
    async fn rate_limited_status_maps_to_rate_limited_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/1"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = HttpFeedAdapter::new().expect("adapter");
        let src = source(server.uri());
        let doc_ref = DocumentRef {
            external_id: "cfr-1".into(),
            url: format!("{}/docs/1", server.uri()),
            updated_at: None,
        };

        let err = adapter.fetch_document(&src, &doc_ref).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::RateLimited);
        assert!(err.kind.is_transient());
    }
}

//! Source adapters and the per-source fetch orchestrator.
//!
//! This crate owns all network I/O of a pipeline run: listing what each
//! jurisdiction source publishes, fetching document payloads with retry
//! and politeness, and folding every failure mode into a per-source
//! outcome instead of erroring across source boundaries.

mod adapter;
mod http_feed;
mod orchestrator;

pub use adapter::{AdapterRegistry, DocumentRef, SourceAdapter};
pub use http_feed::HttpFeedAdapter;
pub use orchestrator::{FetchOrchestrator, FetchOutcome};

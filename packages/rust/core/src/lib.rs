//! Change-detection ingestion pipeline for weekly-refreshed regulation text.
//!
//! Composes the fetch, chunking, diff, store, and index crates into a
//! single [`IngestionPipeline`] with one entry point,
//! [`IngestionPipeline::run_ingestion`]. Each configured source is an
//! independent failure domain: one broken feed degrades its own report
//! entry and nothing else.

mod pipeline;

pub use pipeline::{IngestionPipeline, ProgressReporter, SilentProgress};

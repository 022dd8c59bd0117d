//! Shared types, error model, and configuration for LexSync.
//!
//! This crate is the foundation depended on by all other LexSync crates.
//! It provides:
//! - [`LexSyncError`] — the unified error type
//! - Domain types ([`Chunk`], [`Changeset`], [`DocumentVersion`], [`RunReport`])
//! - Configuration ([`AppConfig`], [`FetchPolicy`], [`UpsertPolicy`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchPolicy, SourceConfig, UpsertPolicy, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_db_path,
};
pub use error::{FetchError, FetchErrorKind, LexSyncError, NormalizationError, Result};
pub use types::{
    ChangeCounts, Changeset, Chunk, ChunkChange, DocumentStatus, DocumentVersion,
    JurisdictionTier, PriorChunk, PriorState, RawDocument, ReportEntry, RunId, RunMode,
    RunReport, SourceReport, SourceState, document_fingerprint, sha256_hex,
};

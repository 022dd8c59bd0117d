//! Core domain types for the LexSync ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Jurisdiction & run mode
// ---------------------------------------------------------------------------

/// Regulatory level a source publishes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JurisdictionTier {
    Federal,
    State,
    Local,
    Union,
}

impl std::fmt::Display for JurisdictionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Federal => "federal",
            Self::State => "state",
            Self::Local => "local",
            Self::Union => "union",
        };
        write!(f, "{s}")
    }
}

/// How a pipeline run treats previously seen documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Re-fetch and re-diff every document the sources expose.
    Full,
    /// Use each source's `since` capability to fetch only recent changes.
    Incremental,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

// ---------------------------------------------------------------------------
// RawDocument
// ---------------------------------------------------------------------------

/// A document as fetched from a source, before normalization.
///
/// Produced once per fetch attempt and discarded after normalization;
/// never persisted except in failure logs.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Configured source this came from.
    pub source_id: String,
    /// Source-native document identifier.
    pub external_id: String,
    /// Where the payload was fetched from (kept for provenance metadata).
    pub source_url: String,
    /// When the fetch completed.
    pub retrieved_at: DateTime<Utc>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Declared content type (e.g. `text/html`, `text/plain`).
    pub content_type: String,
    /// HTTP status from the fetch, when applicable.
    pub status_code: Option<u16>,
    /// How many attempts the fetch took.
    pub retry_count: u32,
    /// Set when the adapter could fetch but not interpret the item.
    /// The orchestrator skips just this item and continues the sequence.
    pub parse_error: Option<String>,
}

impl RawDocument {
    /// Pipeline-wide document identifier: `source_id:external_id`.
    pub fn document_id(&self) -> String {
        format!("{}:{}", self.source_id, self.external_id)
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Minimal addressable unit of normalized regulation text.
///
/// The id is content-addressed: identical normalized content at the same
/// ordinal always yields the same id, across runs. This is what makes
/// diffing possible without comparing raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `sha256(document_id, ordinal, text)`, hex-encoded.
    pub id: String,
    /// Back-reference to the owning document (not an ownership edge).
    pub document_id: String,
    /// Position within the document's ordered chunk sequence.
    pub ordinal: usize,
    /// Normalized text content.
    pub text: String,
    /// `sha256(text)`, hex-encoded. Position-independent content hash.
    pub fingerprint: String,
    /// Length of `text` in bytes.
    pub byte_len: usize,
}

impl Chunk {
    /// Build a chunk from normalized text, computing id and fingerprint.
    pub fn from_text(document_id: &str, ordinal: usize, text: String) -> Self {
        let fingerprint = sha256_hex(text.as_bytes());

        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(ordinal.to_le_bytes());
        hasher.update(text.as_bytes());
        let id = format!("{:x}", hasher.finalize());

        let byte_len = text.len();
        Self {
            id,
            document_id: document_id.to_string(),
            ordinal,
            text,
            fingerprint,
            byte_len,
        }
    }
}

/// SHA-256 of `bytes`, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Whole-document fingerprint: hash of the concatenated chunk fingerprints,
/// in ordinal order.
pub fn document_fingerprint<'a>(fingerprints: impl Iterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for fp in fingerprints {
        hasher.update(fp.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// DocumentVersion
// ---------------------------------------------------------------------------

/// One immutable snapshot of a document's chunk sequence.
///
/// Versions are appended, never mutated. The predecessor link is a weak
/// back-reference by `(document_id, version_no - 1)` lookup, never a
/// structural pointer, so history reconstructs without ownership cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_id: String,
    /// Monotonic per document, starting at 1, no gaps.
    pub version_no: u32,
    pub retrieved_at: DateTime<Utc>,
    /// Ordered chunk ids for this snapshot.
    pub chunk_ids: Vec<String>,
    /// Whole-document fingerprint (see [`document_fingerprint`]).
    pub fingerprint: String,
    /// Version number of the predecessor, if any.
    pub predecessor: Option<u32>,
}

/// Lifecycle state of a document within the version store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentStatus {
    Active,
    /// The source stopped publishing the document; history stays queryable.
    Retired,
}

// ---------------------------------------------------------------------------
// Prior state (diff input)
// ---------------------------------------------------------------------------

/// A chunk of the prior version as the diff engine needs to see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorChunk {
    pub id: String,
    pub ordinal: usize,
    pub fingerprint: String,
}

/// The latest committed state of one document, shaped for classification.
#[derive(Debug, Clone)]
pub struct PriorState {
    pub version_no: u32,
    /// Whole-document fingerprint of the prior version.
    pub fingerprint: String,
    /// Prior chunks in ordinal order.
    pub chunks: Vec<PriorChunk>,
}

// ---------------------------------------------------------------------------
// Changeset
// ---------------------------------------------------------------------------

/// Classification of one chunk slot in a document comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkChange {
    /// Content never seen in the prior version; carries the full chunk.
    New(Chunk),
    /// Same ordinal slot, different fingerprint; carries the full chunk.
    Changed(Chunk),
    /// Content present in the prior version. `chunk_id` is the prior
    /// chunk's id (stable even when content moved); `ordinal` is the
    /// position in the new sequence.
    Unchanged { chunk_id: String, ordinal: usize },
    /// Prior chunk whose content no longer appears; archived, not deleted.
    Removed { chunk_id: String },
}

/// Per-chunk counts extracted from a changeset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Full classification of one document comparison within a run.
#[derive(Debug, Clone)]
pub struct Changeset {
    pub run_id: RunId,
    pub document_id: String,
    pub source_id: String,
    pub source_url: String,
    pub jurisdiction: JurisdictionTier,
    pub retrieved_at: DateTime<Utc>,
    /// Whole-document fingerprint of the new chunk sequence.
    pub fingerprint: String,
    pub changes: Vec<ChunkChange>,
    /// True when the source confirmed the document disappeared entirely.
    pub retired: bool,
}

impl Changeset {
    /// Count changes by classification.
    pub fn counts(&self) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        for change in &self.changes {
            match change {
                ChunkChange::New(_) => counts.new += 1,
                ChunkChange::Changed(_) => counts.changed += 1,
                ChunkChange::Unchanged { .. } => counts.unchanged += 1,
                ChunkChange::Removed { .. } => counts.removed += 1,
            }
        }
        counts
    }

    /// True when the document matched its prior version exactly
    /// (zero NEW/CHANGED/REMOVED entries).
    pub fn is_unchanged(&self) -> bool {
        self.changes.iter().all(|c| matches!(c, ChunkChange::Unchanged { .. }))
    }

    /// Chunks that need embedding and index upsert.
    pub fn new_or_changed(&self) -> impl Iterator<Item = &Chunk> {
        self.changes.iter().filter_map(|c| match c {
            ChunkChange::New(chunk) | ChunkChange::Changed(chunk) => Some(chunk),
            _ => None,
        })
    }

    /// Chunk ids to tombstone in the external index.
    pub fn removed_ids(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().filter_map(|c| match c {
            ChunkChange::Removed { chunk_id } => Some(chunk_id.as_str()),
            _ => None,
        })
    }

    /// The new version's ordered chunk ids: NEW/CHANGED/UNCHANGED entries
    /// sorted by their ordinal in the new sequence.
    pub fn ordered_chunk_ids(&self) -> Vec<String> {
        let mut slots: Vec<(usize, &str)> = self
            .changes
            .iter()
            .filter_map(|c| match c {
                ChunkChange::New(chunk) | ChunkChange::Changed(chunk) => {
                    Some((chunk.ordinal, chunk.id.as_str()))
                }
                ChunkChange::Unchanged { chunk_id, ordinal } => {
                    Some((*ordinal, chunk_id.as_str()))
                }
                ChunkChange::Removed { .. } => None,
            })
            .collect();
        slots.sort_by_key(|(ordinal, _)| *ordinal);
        slots.into_iter().map(|(_, id)| id.to_string()).collect()
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Final state of one source after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceState {
    /// Every document fetched and processed.
    Ok,
    /// Some items were skipped or failed; the rest went through.
    Partial,
    /// The circuit breaker tripped; remaining documents were skipped.
    Open,
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Partial => write!(f, "partial"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// One terminal failure entry, with enough context for operator triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub document_id: String,
    pub error: String,
}

/// Per-source outcome aggregated into the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub state: SourceState,
    #[serde(flatten)]
    pub counts: ChangeCounts,
    /// Documents skipped before classification (fetch/normalize failures).
    pub skipped: Vec<ReportEntry>,
    /// Documents that failed after classification (store/index failures).
    pub failed: Vec<ReportEntry>,
    pub elapsed_ms: u64,
}

impl SourceReport {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            state: SourceState::Ok,
            counts: ChangeCounts::default(),
            skipped: Vec::new(),
            failed: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// Merge one document's change counts into the source totals.
    pub fn add_counts(&mut self, counts: ChangeCounts) {
        self.counts.new += counts.new;
        self.counts.changed += counts.changed;
        self.counts.unchanged += counts.unchanged;
        self.counts.removed += counts.removed;
    }
}

/// Serializable summary of one pipeline run, returned to the caller and
/// handed to the logging/dashboard collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    /// True when every source finished `Ok`.
    pub fn is_clean(&self) -> bool {
        self.sources
            .iter()
            .all(|s| s.state == SourceState::Ok && s.skipped.is_empty() && s.failed.is_empty())
    }
}

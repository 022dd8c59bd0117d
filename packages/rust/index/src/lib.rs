//! Embedding and semantic-index collaborator boundaries.
//!
//! The pipeline never talks to a concrete vector database or embedding
//! service directly; it goes through the [`Embedder`] and
//! [`SemanticIndex`] traits so backends are swappable at the composition
//! root. [`coordinator::UpsertCoordinator`] drives both from a committed
//! changeset.

pub mod coordinator;
pub mod memory;

use async_trait::async_trait;
use lexsync_shared::{JurisdictionTier, Result};
use serde::{Deserialize, Serialize};

pub use coordinator::{UpsertCoordinator, UpsertFailure, UpsertReport};
pub use memory::{DeterministicEmbedder, InMemoryIndex};

/// An embedding backend: text in, fixed-dimension vector out.
///
/// Failures are treated as retryable I/O errors by the coordinator.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded for observability.
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Provenance metadata attached to every index entry so the serving
/// layer can cite where a chunk came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkProvenance {
    pub source_url: String,
    pub jurisdiction: JurisdictionTier,
    pub document_id: String,
    /// Document version the chunk was last written under.
    pub version: u32,
}

/// The external semantic index boundary.
///
/// Upsert keys are deterministic chunk ids, so replaying the same
/// changeset overwrites identically instead of duplicating entries.
/// Tombstoned entries stay stored but are excluded from query results.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn upsert(
        &self,
        chunk_id: &str,
        vector: Vec<f32>,
        provenance: ChunkProvenance,
    ) -> Result<()>;

    async fn tombstone(&self, chunk_id: &str) -> Result<()>;
}

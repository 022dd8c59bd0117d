//! In-memory semantic index and a deterministic test embedder.
//!
//! [`InMemoryIndex`] is the default index backend for local runs and
//! tests. It honors the same upsert/tombstone semantics a remote vector
//! store would, which keeps coordinator behavior observable without
//! network dependencies.

use std::collections::HashMap;

use async_trait::async_trait;
use lexsync_shared::Result;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::{ChunkProvenance, Embedder, SemanticIndex};

/// One stored index entry.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub provenance: ChunkProvenance,
    pub tombstoned: bool,
}

/// Thread-safe in-memory semantic index.
#[derive(Default)]
pub struct InMemoryIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry by chunk id, tombstoned or not.
    pub async fn entry(&self, chunk_id: &str) -> Option<IndexEntry> {
        self.entries.read().await.get(chunk_id).cloned()
    }

    /// Number of entries visible to queries (tombstones excluded).
    pub async fn active_len(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.tombstoned)
            .count()
    }

    /// Total entries including tombstones.
    pub async fn total_len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl SemanticIndex for InMemoryIndex {
    async fn upsert(
        &self,
        chunk_id: &str,
        vector: Vec<f32>,
        provenance: ChunkProvenance,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            chunk_id.to_string(),
            IndexEntry {
                vector,
                provenance,
                tombstoned: false,
            },
        );
        Ok(())
    }

    async fn tombstone(&self, chunk_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(chunk_id) {
            entry.tombstoned = true;
        }
        Ok(())
    }
}

/// Hash-derived pseudo-embeddings: same text always yields the same
/// vector. No semantic meaning, but exercises the full upsert path
/// without a model, which is all local runs and tests need.
pub struct DeterministicEmbedder {
    dims: usize,
}

impl DeterministicEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    fn model_name(&self) -> &str {
        "deterministic-sha256"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| pseudo_vector(t, self.dims)).collect())
    }
}

fn pseudo_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut counter: u32 = 0;
    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for bytes in digest.chunks_exact(4) {
            if out.len() == dims {
                break;
            }
            let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            // Map onto [-1, 1].
            out.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
        }
        counter += 1;
    }
    out
}

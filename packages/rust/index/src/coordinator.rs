//! Applies a committed changeset to the external semantic index.
//!
//! Only NEW and CHANGED chunks are embedded and upserted; UNCHANGED
//! chunks are untouched (that is the entire point of diffing — embedding
//! calls are the dominant cost of a run). REMOVED chunks are tombstoned,
//! never purged, matching the version store's archival policy.

use std::sync::Arc;
use std::time::Duration;

use lexsync_shared::{Changeset, Chunk, LexSyncError, Result, UpsertPolicy};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{ChunkProvenance, Embedder, SemanticIndex};

/// Attempts per embedding batch before its chunks are reported failed.
const EMBED_ATTEMPTS: u32 = 3;

/// Base delay between embedding retries, doubled per attempt.
const RETRY_BASE: Duration = Duration::from_millis(500);

/// One chunk that could not be applied to the index.
#[derive(Debug, Clone)]
pub struct UpsertFailure {
    pub chunk_id: String,
    pub error: String,
}

/// Outcome of applying one changeset to the index.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    /// Chunks embedded and upserted, plus tombstones written.
    pub applied: usize,
    /// UNCHANGED chunks that never touched the index.
    pub skipped: usize,
    /// Chunks whose embedding or index write terminally failed.
    pub failed: Vec<UpsertFailure>,
}

/// Drives the embedding and index collaborators for one changeset.
pub struct UpsertCoordinator {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SemanticIndex>,
    policy: UpsertPolicy,
}

impl UpsertCoordinator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SemanticIndex>,
        policy: UpsertPolicy,
    ) -> Self {
        Self {
            embedder,
            index,
            policy,
        }
    }

    /// Apply a changeset to the index.
    ///
    /// Batches run concurrently up to the policy's ceiling (admission
    /// control for the external service). One chunk's failure is recorded
    /// and does not abort the rest; the call only errors when every
    /// single operation failed, which is indistinguishable from the index
    /// being unreachable and must abort the run rather than mark it
    /// PARTIAL.
    ///
    /// Replay-safe: upsert keys are deterministic chunk ids, so applying
    /// the same changeset twice overwrites identically.
    #[instrument(skip_all, fields(document_id = %changeset.document_id, version = version_no))]
    pub async fn apply(
        &self,
        changeset: &Changeset,
        version_no: u32,
        cancel: &CancellationToken,
    ) -> Result<UpsertReport> {
        let provenance = ChunkProvenance {
            source_url: changeset.source_url.clone(),
            jurisdiction: changeset.jurisdiction,
            document_id: changeset.document_id.clone(),
            version: version_no,
        };

        let to_embed: Vec<Chunk> = changeset.new_or_changed().cloned().collect();
        let removed: Vec<String> = changeset.removed_ids().map(String::from).collect();
        let attempted = to_embed.len() + removed.len();

        let mut report = UpsertReport {
            skipped: changeset.counts().unchanged,
            ..Default::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.policy.concurrency));
        let mut tasks: JoinSet<(usize, Vec<UpsertFailure>)> = JoinSet::new();

        for batch in to_embed.chunks(self.policy.batch_size.max(1)) {
            let batch: Vec<Chunk> = batch.to_vec();
            let embedder = self.embedder.clone();
            let index = self.index.clone();
            let provenance = provenance.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let embed_timeout = self.policy.embed_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (0, batch_failures(&batch, "worker pool shut down"));
                };
                if cancel.is_cancelled() {
                    return (0, batch_failures(&batch, "run cancelled"));
                }
                embed_and_upsert(&*embedder, &*index, &batch, provenance, embed_timeout, &cancel)
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((applied, failures)) => {
                    report.applied += applied;
                    report.failed.extend(failures);
                }
                Err(e) => {
                    return Err(LexSyncError::Index(format!("embedding task panicked: {e}")));
                }
            }
        }

        for chunk_id in &removed {
            if cancel.is_cancelled() {
                report.failed.push(UpsertFailure {
                    chunk_id: chunk_id.clone(),
                    error: "run cancelled".into(),
                });
                continue;
            }
            match self.index.tombstone(chunk_id).await {
                Ok(()) => report.applied += 1,
                Err(e) => report.failed.push(UpsertFailure {
                    chunk_id: chunk_id.clone(),
                    error: e.to_string(),
                }),
            }
        }

        if attempted > 0
            && report.applied == 0
            && report.failed.len() == attempted
            && !cancel.is_cancelled()
        {
            return Err(LexSyncError::Index(format!(
                "all {attempted} index operations failed for '{}', index appears unreachable",
                changeset.document_id
            )));
        }

        tracing::debug!(
            applied = report.applied,
            skipped = report.skipped,
            failed = report.failed.len(),
            "changeset applied to index"
        );
        Ok(report)
    }
}

/// Embed one batch (with bounded retry) and upsert its vectors.
async fn embed_and_upsert(
    embedder: &dyn Embedder,
    index: &dyn SemanticIndex,
    batch: &[Chunk],
    provenance: ChunkProvenance,
    embed_timeout: Duration,
    cancel: &CancellationToken,
) -> (usize, Vec<UpsertFailure>) {
    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

    let vectors = match embed_with_retry(embedder, &texts, embed_timeout, cancel).await {
        Ok(vectors) => vectors,
        Err(e) => return (0, batch_failures(batch, &e.to_string())),
    };
    if vectors.len() != batch.len() {
        return (
            0,
            batch_failures(
                batch,
                &format!(
                    "embedder returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                ),
            ),
        );
    }

    let mut applied = 0;
    let mut failed = Vec::new();
    for (chunk, vector) in batch.iter().zip(vectors) {
        match index.upsert(&chunk.id, vector, provenance.clone()).await {
            Ok(()) => applied += 1,
            Err(e) => failed.push(UpsertFailure {
                chunk_id: chunk.id.clone(),
                error: e.to_string(),
            }),
        }
    }
    (applied, failed)
}

/// Call the embedder with per-attempt timeout and exponential backoff.
async fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
    embed_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<f32>>> {
    let mut delay = RETRY_BASE;
    let mut last_error = None;

    for attempt in 1..=EMBED_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(LexSyncError::Index("run cancelled".into()));
        }

        match tokio::time::timeout(embed_timeout, embedder.embed_batch(texts)).await {
            Ok(Ok(vectors)) => return Ok(vectors),
            Ok(Err(e)) => {
                tracing::warn!(attempt, error = %e, "embedding batch failed");
                last_error = Some(e.to_string());
            }
            Err(_) => {
                tracing::warn!(attempt, "embedding batch timed out");
                last_error = Some(format!("timed out after {embed_timeout:?}"));
            }
        }

        if attempt < EMBED_ATTEMPTS {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(LexSyncError::Index("run cancelled".into()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay *= 2;
        }
    }

    Err(LexSyncError::Index(
        last_error.unwrap_or_else(|| "embedding failed".into()),
    ))
}

fn batch_failures(batch: &[Chunk], error: &str) -> Vec<UpsertFailure> {
    batch
        .iter()
        .map(|c| UpsertFailure {
            chunk_id: c.id.clone(),
            error: error.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DeterministicEmbedder, InMemoryIndex};
    use async_trait::async_trait;
    use chrono::Utc;
    use lexsync_shared::{
        ChunkChange, JurisdictionTier, RunId, document_fingerprint,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    const DOC: &str = "us-fed:cfr-1201";

    fn policy() -> UpsertPolicy {
        UpsertPolicy {
            batch_size: 2,
            concurrency: 2,
            embed_timeout: Duration::from_secs(5),
        }
    }

    fn chunk(ordinal: usize, text: &str) -> Chunk {
        Chunk::from_text(DOC, ordinal, text.to_string())
    }

    fn changeset(changes: Vec<ChunkChange>) -> Changeset {
        let fingerprints: Vec<String> = changes
            .iter()
            .filter_map(|c| match c {
                ChunkChange::New(ch) | ChunkChange::Changed(ch) => Some(ch.fingerprint.clone()),
                _ => None,
            })
            .collect();
        Changeset {
            run_id: RunId::new(),
            document_id: DOC.into(),
            source_id: "us-fed".into(),
            source_url: "https://example.gov/cfr/1201".into(),
            jurisdiction: JurisdictionTier::Federal,
            retrieved_at: Utc::now(),
            fingerprint: document_fingerprint(fingerprints.iter().map(|s| s.as_str())),
            changes,
            retired: false,
        }
    }

    /// Embedder that fails a configurable number of times before working.
    struct FlakyEmbedder {
        inner: DeterministicEmbedder,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LexSyncError::Index("transient upstream error".into()));
            }
            self.inner.embed_batch(texts).await
        }
    }

    /// Index that rejects writes for one specific chunk id.
    struct RejectingIndex {
        inner: InMemoryIndex,
        reject_id: String,
    }

    #[async_trait]
    impl SemanticIndex for RejectingIndex {
        async fn upsert(
            &self,
            chunk_id: &str,
            vector: Vec<f32>,
            provenance: ChunkProvenance,
        ) -> Result<()> {
            if chunk_id == self.reject_id {
                return Err(LexSyncError::Index("write rejected".into()));
            }
            self.inner.upsert(chunk_id, vector, provenance).await
        }
        async fn tombstone(&self, chunk_id: &str) -> Result<()> {
            self.inner.tombstone(chunk_id).await
        }
    }

    #[tokio::test]
    async fn only_new_and_changed_touch_the_index() {
        let index = Arc::new(InMemoryIndex::new());
        let coordinator = UpsertCoordinator::new(
            Arc::new(DeterministicEmbedder::new(8)),
            index.clone(),
            policy(),
        );

        // Pre-existing entry for the unchanged chunk; it must stay as-is.
        let unchanged_id = "prior-chunk-id".to_string();
        index
            .upsert(
                &unchanged_id,
                vec![9.0; 8],
                ChunkProvenance {
                    source_url: "https://example.gov/cfr/1201".into(),
                    jurisdiction: JurisdictionTier::Federal,
                    document_id: DOC.into(),
                    version: 1,
                },
            )
            .await
            .unwrap();

        let new = chunk(1, "Fresh requirement.");
        let cs = changeset(vec![
            ChunkChange::Unchanged {
                chunk_id: unchanged_id.clone(),
                ordinal: 0,
            },
            ChunkChange::New(new.clone()),
        ]);

        let report = coordinator
            .apply(&cs, 2, &CancellationToken::new())
            .await
            .expect("apply");
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.failed.is_empty());

        // Untouched entry still carries version 1 and its old vector.
        let entry = index.entry(&unchanged_id).await.unwrap();
        assert_eq!(entry.provenance.version, 1);
        assert_eq!(entry.vector, vec![9.0; 8]);
        assert_eq!(index.entry(&new.id).await.unwrap().provenance.version, 2);
    }

    #[tokio::test]
    async fn removed_chunks_are_tombstoned() {
        let index = Arc::new(InMemoryIndex::new());
        let coordinator = UpsertCoordinator::new(
            Arc::new(DeterministicEmbedder::new(8)),
            index.clone(),
            policy(),
        );

        let old = chunk(0, "Superseded clause.");
        let cs1 = changeset(vec![ChunkChange::New(old.clone())]);
        coordinator
            .apply(&cs1, 1, &CancellationToken::new())
            .await
            .unwrap();

        let cs2 = changeset(vec![ChunkChange::Removed {
            chunk_id: old.id.clone(),
        }]);
        let report = coordinator
            .apply(&cs2, 2, &CancellationToken::new())
            .await
            .expect("apply");
        assert_eq!(report.applied, 1);

        let entry = index.entry(&old.id).await.unwrap();
        assert!(entry.tombstoned);
        assert_eq!(index.active_len().await, 0);
    }

    #[tokio::test]
    async fn replaying_a_changeset_is_idempotent() {
        let index = Arc::new(InMemoryIndex::new());
        let coordinator = UpsertCoordinator::new(
            Arc::new(DeterministicEmbedder::new(8)),
            index.clone(),
            policy(),
        );

        let chunks: Vec<Chunk> = (0..5)
            .map(|i| chunk(i, &format!("Requirement {i}.")))
            .collect();
        let cs = changeset(chunks.iter().cloned().map(ChunkChange::New).collect());

        let first = coordinator
            .apply(&cs, 1, &CancellationToken::new())
            .await
            .unwrap();
        let second = coordinator
            .apply(&cs, 1, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.applied, 5);
        assert_eq!(second.applied, 5);
        assert_eq!(index.total_len().await, 5);
    }

    #[tokio::test]
    async fn one_failing_chunk_does_not_abort_the_rest() {
        let good = chunk(0, "Good clause.");
        let bad = chunk(1, "Bad clause.");
        let index = Arc::new(RejectingIndex {
            inner: InMemoryIndex::new(),
            reject_id: bad.id.clone(),
        });
        let coordinator = UpsertCoordinator::new(
            Arc::new(DeterministicEmbedder::new(8)),
            index,
            policy(),
        );

        let cs = changeset(vec![
            ChunkChange::New(good.clone()),
            ChunkChange::New(bad.clone()),
        ]);
        let report = coordinator
            .apply(&cs, 1, &CancellationToken::new())
            .await
            .expect("apply stays Ok on partial failure");
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].chunk_id, bad.id);
    }

    #[tokio::test]
    async fn transient_embedding_failures_are_retried() {
        let embedder = Arc::new(FlakyEmbedder {
            inner: DeterministicEmbedder::new(8),
            failures_left: AtomicU32::new(2),
        });
        let index = Arc::new(InMemoryIndex::new());
        let coordinator = UpsertCoordinator::new(embedder, index.clone(), policy());

        let cs = changeset(vec![ChunkChange::New(chunk(0, "Retried clause."))]);
        let report = coordinator
            .apply(&cs, 1, &CancellationToken::new())
            .await
            .expect("apply");
        assert_eq!(report.applied, 1);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn total_failure_is_treated_as_unreachable_index() {
        let embedder = Arc::new(FlakyEmbedder {
            inner: DeterministicEmbedder::new(8),
            failures_left: AtomicU32::new(u32::MAX),
        });
        let coordinator =
            UpsertCoordinator::new(embedder, Arc::new(InMemoryIndex::new()), policy());

        let cs = changeset(vec![
            ChunkChange::New(chunk(0, "First.")),
            ChunkChange::New(chunk(1, "Second.")),
        ]);
        let err = coordinator
            .apply(&cs, 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LexSyncError::Index(_)));
        assert!(err.to_string().contains("unreachable"));
    }

    #[tokio::test]
    async fn cancellation_reports_without_unreachable_error() {
        let coordinator = UpsertCoordinator::new(
            Arc::new(DeterministicEmbedder::new(8)),
            Arc::new(InMemoryIndex::new()),
            policy(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let cs = changeset(vec![ChunkChange::New(chunk(0, "Never embedded."))]);
        let report = coordinator.apply(&cs, 1, &cancel).await.expect("apply");
        assert_eq!(report.applied, 0);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("cancelled"));
    }
}

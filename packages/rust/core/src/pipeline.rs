//! End-to-end ingestion pipeline: list → fetch → normalize → diff → commit → upsert.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use lexsync_fetch::{AdapterRegistry, FetchOrchestrator};
use lexsync_index::UpsertCoordinator;
use lexsync_shared::{
    ChangeCounts, Changeset, FetchPolicy, LexSyncError, RawDocument, ReportEntry, Result,
    RunId, RunMode, RunReport, SourceConfig, SourceReport, SourceState,
};
use lexsync_store::VersionStore;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new run phase.
    fn phase(&self, name: &str);
    /// Called when a source's fetch sequence starts.
    fn source_started(&self, source_id: &str);
    /// Called after each document finishes processing.
    fn document_processed(&self, document_id: &str, current: usize, total: usize);
    /// Called when a source's report is final.
    fn source_finished(&self, report: &SourceReport);
    /// Called once with the assembled run report.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn source_started(&self, _source_id: &str) {}
    fn document_processed(&self, _document_id: &str, _current: usize, _total: usize) {}
    fn source_finished(&self, _report: &SourceReport) {}
    fn done(&self, _report: &RunReport) {}
}

/// The composed ingestion pipeline.
///
/// Collaborators are injected at the composition root: the store is the
/// sole writer of lineage, the coordinator owns the embedding/index
/// boundary, and the registry supplies one adapter per configured source.
pub struct IngestionPipeline {
    store: Arc<VersionStore>,
    registry: Arc<AdapterRegistry>,
    coordinator: Arc<UpsertCoordinator>,
    fetch_policy: FetchPolicy,
    max_chunk_bytes: usize,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<VersionStore>,
        registry: Arc<AdapterRegistry>,
        coordinator: Arc<UpsertCoordinator>,
        fetch_policy: FetchPolicy,
        max_chunk_bytes: usize,
    ) -> Self {
        Self {
            store,
            registry,
            coordinator,
            fetch_policy,
            max_chunk_bytes,
        }
    }

    /// Run one full ingestion pass over the given sources.
    ///
    /// FULL re-fetches and re-diffs everything a source publishes;
    /// INCREMENTAL narrows listings to documents changed since the last
    /// completed run. Sources run concurrently as independent failure
    /// domains; a run always completes with a report unless the store or
    /// the index itself is unreachable.
    #[instrument(skip_all, fields(mode = %mode, sources = sources.len()))]
    pub async fn run_ingestion(
        &self,
        sources: &[SourceConfig],
        mode: RunMode,
        cancel: &CancellationToken,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<RunReport> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(%run_id, "starting ingestion run");

        progress.phase("Preparing run");
        let since = match mode {
            RunMode::Full => None,
            RunMode::Incremental => self.store.last_completed_run().await?,
        };
        self.store.insert_run(&run_id, mode, started_at).await?;

        progress.phase("Ingesting sources");
        let mut tasks: JoinSet<Result<SourceReport>> = JoinSet::new();
        for source in sources {
            let worker = Arc::new(SourceWorker {
                source: source.clone(),
                store: self.store.clone(),
                coordinator: self.coordinator.clone(),
                orchestrator: FetchOrchestrator::new(
                    self.registry.clone(),
                    self.fetch_policy.clone(),
                ),
                max_chunk_bytes: self.max_chunk_bytes,
                run_id: run_id.clone(),
                mode,
                since,
                cancel: cancel.clone(),
                progress: progress.clone(),
            });
            tasks.spawn(worker.run());
        }

        let mut source_reports = Vec::with_capacity(sources.len());
        while let Some(joined) = tasks.join_next().await {
            let report = joined
                .map_err(|e| LexSyncError::Storage(format!("source task panicked: {e}")))??;
            source_reports.push(report);
        }
        // Completion order is nondeterministic across sources.
        source_reports.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let report = RunReport {
            run_id: run_id.clone(),
            mode,
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            sources: source_reports,
        };

        // A cancelled run must not advance the incremental watermark, so
        // it stays unfinished in the run table.
        if !cancel.is_cancelled() {
            let report_json = serde_json::to_string(&report)
                .map_err(|e| LexSyncError::Storage(format!("failed to serialize report: {e}")))?;
            self.store.finish_run(&run_id, &report_json).await?;
        }

        info!(
            %run_id,
            elapsed_ms = report.elapsed_ms,
            clean = report.is_clean(),
            "ingestion run finished"
        );
        progress.done(&report);
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Per-source worker
// ---------------------------------------------------------------------------

/// Processes one source within a run: fetch, then per-document
/// normalize/diff/commit/upsert, then (FULL mode) the retirement sweep.
struct SourceWorker {
    source: SourceConfig,
    store: Arc<VersionStore>,
    coordinator: Arc<UpsertCoordinator>,
    orchestrator: FetchOrchestrator,
    max_chunk_bytes: usize,
    run_id: RunId,
    mode: RunMode,
    since: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    progress: Arc<dyn ProgressReporter>,
}

/// What one document contributed to its source report.
struct DocumentOutcome {
    document_id: String,
    counts: ChangeCounts,
    skipped: Option<ReportEntry>,
    failed: Vec<ReportEntry>,
}

impl DocumentOutcome {
    fn new(document_id: String) -> Self {
        Self {
            document_id,
            counts: ChangeCounts::default(),
            skipped: None,
            failed: Vec::new(),
        }
    }
}

impl SourceWorker {
    #[instrument(skip_all, fields(source_id = %self.source.id))]
    async fn run(self: Arc<Self>) -> Result<SourceReport> {
        let start = Instant::now();
        self.progress.source_started(&self.source.id);
        let mut report = SourceReport::new(&self.source.id);

        let outcome = self
            .orchestrator
            .fetch_source(&self.source, self.since, &self.cancel)
            .await;
        report.state = outcome.state;
        report.skipped = outcome.skipped;

        let total = outcome.documents.len();
        let mut fetched_ids: HashSet<String> = HashSet::with_capacity(total);

        // Fetching is serial per source, but normalize/diff/commit is
        // CPU-plus-store work with no cross-document ordering, so it
        // fans out under a pool bounded by available cores.
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut doc_tasks: JoinSet<Result<DocumentOutcome>> = JoinSet::new();
        for raw in outcome.documents {
            fetched_ids.insert(raw.document_id());
            let worker = self.clone();
            let semaphore = semaphore.clone();
            doc_tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| LexSyncError::Storage("document worker pool closed".into()))?;
                worker.process_document(raw).await
            });
        }

        let mut completed = 0usize;
        while let Some(joined) = doc_tasks.join_next().await {
            let doc = joined
                .map_err(|e| LexSyncError::Storage(format!("document task panicked: {e}")))??;
            completed += 1;
            self.progress
                .document_processed(&doc.document_id, completed, total);
            report.add_counts(doc.counts);
            report.skipped.extend(doc.skipped);
            report.failed.extend(doc.failed);
        }

        // Documents that vanished from a trustworthy FULL listing get
        // retired. Partial or incremental listings say nothing about
        // absence, so they never retire anything.
        let sweep_safe = self.mode == RunMode::Full
            && outcome.listing_complete
            && report.state == SourceState::Ok;
        if sweep_safe {
            self.retire_missing(&fetched_ids, &mut report).await?;
        }

        if report.state == SourceState::Ok
            && (!report.failed.is_empty() || !report.skipped.is_empty())
        {
            report.state = SourceState::Partial;
        }
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        self.progress.source_finished(&report);
        Ok(report)
    }

    /// Normalize, diff, commit, and upsert one fetched document.
    ///
    /// Document-scoped failures (malformed content, corrupted prior
    /// record, chunk-level index failures) land in the report; only
    /// store unavailability and an unreachable index propagate and
    /// abort the run.
    async fn process_document(&self, raw: RawDocument) -> Result<DocumentOutcome> {
        let document_id = raw.document_id();
        let mut outcome = DocumentOutcome::new(document_id.clone());

        let chunks = match lexsync_chunker::normalize_and_chunk(&raw, self.max_chunk_bytes) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(%document_id, error = %e, "normalization failed, skipping document");
                outcome.skipped = Some(ReportEntry {
                    document_id,
                    error: e.to_string(),
                });
                return Ok(outcome);
            }
        };

        let prior = self.store.prior_state(&document_id).await?;
        let diff = match lexsync_diff::classify(&document_id, &chunks, prior.as_ref()) {
            Ok(diff) => diff,
            Err(e) => {
                warn!(%document_id, error = %e, "classification failed");
                outcome.failed.push(ReportEntry {
                    document_id,
                    error: e.to_string(),
                });
                return Ok(outcome);
            }
        };

        let changeset = Changeset {
            run_id: self.run_id.clone(),
            document_id: document_id.clone(),
            source_id: self.source.id.clone(),
            source_url: raw.source_url.clone(),
            jurisdiction: self.source.jurisdiction,
            retrieved_at: raw.retrieved_at,
            fingerprint: diff.fingerprint,
            changes: diff.changes,
            retired: false,
        };
        outcome.counts = changeset.counts();

        // Only an exact whole-document fingerprint match skips the
        // commit; this is the common weekly case. A pure reorder is
        // all-UNCHANGED but a different fingerprint, and still appends
        // a version so the stored chunk order tracks the source.
        if prior
            .as_ref()
            .is_some_and(|p| p.fingerprint == changeset.fingerprint)
        {
            return Ok(outcome);
        }

        let version = self.store.commit(&changeset).await?;
        let upsert = self
            .coordinator
            .apply(&changeset, version.version_no, &self.cancel)
            .await?;
        for failure in upsert.failed {
            outcome.failed.push(ReportEntry {
                document_id: document_id.clone(),
                error: format!("chunk {}: {}", failure.chunk_id, failure.error),
            });
        }
        Ok(outcome)
    }

    /// Retire documents the source no longer publishes: classify against
    /// an empty sequence (all REMOVED), commit, and tombstone.
    async fn retire_missing(
        &self,
        fetched_ids: &HashSet<String>,
        report: &mut SourceReport,
    ) -> Result<()> {
        let known = self.store.active_documents(&self.source.id).await?;
        for document_id in known {
            if fetched_ids.contains(&document_id) {
                continue;
            }
            let Some(prior) = self.store.prior_state(&document_id).await? else {
                continue;
            };
            let diff = match lexsync_diff::classify(&document_id, &[], Some(&prior)) {
                Ok(diff) => diff,
                Err(e) => {
                    report.failed.push(ReportEntry {
                        document_id: document_id.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let source_url = self
                .store
                .document_source_url(&document_id)
                .await?
                .unwrap_or_default();

            info!(%document_id, "document disappeared from listing, retiring");
            let changeset = Changeset {
                run_id: self.run_id.clone(),
                document_id: document_id.clone(),
                source_id: self.source.id.clone(),
                source_url,
                jurisdiction: self.source.jurisdiction,
                retrieved_at: Utc::now(),
                fingerprint: diff.fingerprint,
                changes: diff.changes,
                retired: true,
            };
            report.add_counts(changeset.counts());

            let version = self.store.commit(&changeset).await?;
            let upsert = self
                .coordinator
                .apply(&changeset, version.version_no, &self.cancel)
                .await?;
            for failure in upsert.failed {
                report.failed.push(ReportEntry {
                    document_id: document_id.clone(),
                    error: format!("chunk {}: {}", failure.chunk_id, failure.error),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    use lexsync_fetch::{DocumentRef, SourceAdapter};
    use lexsync_index::{DeterministicEmbedder, InMemoryIndex};
    use lexsync_shared::{DocumentStatus, FetchError, JurisdictionTier, UpsertPolicy};

    const SOURCE: &str = "us-fed";

    /// Adapter serving documents straight out of a shared map, so tests
    /// can mutate the "published" corpus between runs.
    struct StaticAdapter {
        docs: Arc<RwLock<BTreeMap<String, String>>>,
        listed_since: StdMutex<Vec<Option<DateTime<Utc>>>>,
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn name(&self) -> &str {
            "static"
        }

        async fn list(
            &self,
            _source: &SourceConfig,
            since: Option<DateTime<Utc>>,
        ) -> std::result::Result<Vec<DocumentRef>, FetchError> {
            self.listed_since.lock().unwrap().push(since);
            Ok(self
                .docs
                .read()
                .await
                .keys()
                .map(|id| DocumentRef {
                    external_id: id.clone(),
                    url: format!("http://example.test/{id}"),
                    updated_at: None,
                })
                .collect())
        }

        async fn fetch_document(
            &self,
            source: &SourceConfig,
            doc: &DocumentRef,
        ) -> std::result::Result<RawDocument, FetchError> {
            let docs = self.docs.read().await;
            let text = docs
                .get(&doc.external_id)
                .ok_or_else(|| FetchError::status(404, "document vanished mid-run"))?;
            Ok(RawDocument {
                source_id: source.id.clone(),
                external_id: doc.external_id.clone(),
                source_url: doc.url.clone(),
                retrieved_at: Utc::now(),
                payload: text.clone().into_bytes(),
                content_type: "text/plain".to_string(),
                status_code: Some(200),
                retry_count: 0,
                parse_error: None,
            })
        }
    }

    struct Harness {
        pipeline: IngestionPipeline,
        store: Arc<VersionStore>,
        index: Arc<InMemoryIndex>,
        docs: Arc<RwLock<BTreeMap<String, String>>>,
        adapter: Arc<StaticAdapter>,
    }

    impl Harness {
        async fn run(&self, mode: RunMode) -> RunReport {
            self.pipeline
                .run_ingestion(
                    &[source(SOURCE)],
                    mode,
                    &CancellationToken::new(),
                    Arc::new(SilentProgress),
                )
                .await
                .expect("run")
        }
    }

    async fn harness(initial: &[(&str, &str)]) -> Harness {
        let docs: Arc<RwLock<BTreeMap<String, String>>> = Arc::new(RwLock::new(
            initial
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        let adapter = Arc::new(StaticAdapter {
            docs: docs.clone(),
            listed_since: StdMutex::new(Vec::new()),
        });

        let mut registry = AdapterRegistry::new().expect("registry");
        registry.register(adapter.clone());

        let tmp = std::env::temp_dir().join(format!("lexsync_core_{}.db", Uuid::now_v7()));
        let store = Arc::new(VersionStore::open(&tmp).await.expect("open store"));

        let index = Arc::new(InMemoryIndex::new());
        let coordinator = Arc::new(UpsertCoordinator::new(
            Arc::new(DeterministicEmbedder::new(8)),
            index.clone(),
            UpsertPolicy {
                batch_size: 4,
                concurrency: 2,
                embed_timeout: Duration::from_secs(5),
            },
        ));

        let policy = FetchPolicy {
            max_attempts: 2,
            backoff_base: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(20),
            circuit_threshold: 3,
            fetch_timeout: Duration::from_secs(5),
        };
        let pipeline = IngestionPipeline::new(
            store.clone(),
            Arc::new(registry),
            coordinator,
            policy,
            64,
        );
        Harness {
            pipeline,
            store,
            index,
            docs,
            adapter,
        }
    }

    fn source(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            jurisdiction: JurisdictionTier::Federal,
            base_url: "http://example.test/feed".to_string(),
            politeness_delay_ms: 0,
            adapter: "static".to_string(),
        }
    }

    const REG_A: &str = "Section 1. No vessel may operate without a permit.\n\n\
                         Section 2. Permits expire after one calendar year.";
    const REG_B: &str = "Fireworks sales require a county license.";

    #[tokio::test]
    async fn first_run_ingests_everything_as_new() {
        let h = harness(&[("cfr-10", REG_A), ("cfr-11", REG_B)]).await;
        let report = h.run(RunMode::Full).await;

        assert_eq!(report.sources.len(), 1);
        let src = &report.sources[0];
        assert_eq!(src.state, SourceState::Ok);
        assert_eq!(src.counts.new, 3);
        assert_eq!(src.counts.changed, 0);
        assert_eq!(src.counts.removed, 0);
        assert!(src.failed.is_empty());

        let latest = h
            .store
            .latest("us-fed:cfr-10")
            .await
            .expect("latest")
            .expect("version");
        assert_eq!(latest.version_no, 1);
        assert_eq!(h.index.active_len().await, 3);
    }

    #[tokio::test]
    async fn unchanged_rerun_creates_no_new_version() {
        let h = harness(&[("cfr-10", REG_A)]).await;
        h.run(RunMode::Full).await;
        let report = h.run(RunMode::Full).await;

        let src = &report.sources[0];
        assert_eq!(src.counts.new, 0);
        assert_eq!(src.counts.unchanged, 2);

        let latest = h
            .store
            .latest("us-fed:cfr-10")
            .await
            .expect("latest")
            .expect("version");
        assert_eq!(latest.version_no, 1);
        assert_eq!(h.index.total_len().await, 2);
    }

    #[tokio::test]
    async fn edited_document_gets_a_new_version() {
        let h = harness(&[("cfr-10", REG_A)]).await;
        h.run(RunMode::Full).await;

        let edited = "Section 1. No vessel may operate without a permit.\n\n\
                      Section 2. Permits expire after two calendar years.";
        h.docs
            .write()
            .await
            .insert("cfr-10".to_string(), edited.to_string());
        let report = h.run(RunMode::Full).await;

        let src = &report.sources[0];
        assert_eq!(src.counts.changed, 1);
        assert_eq!(src.counts.unchanged, 1);
        assert_eq!(src.counts.removed, 0);

        let latest = h
            .store
            .latest("us-fed:cfr-10")
            .await
            .expect("latest")
            .expect("version");
        assert_eq!(latest.version_no, 2);
        assert_eq!(latest.predecessor, Some(1));

        // The edited chunk landed in the index under the new version
        // while the untouched one kept its original provenance.
        let mut versions = Vec::new();
        for id in &latest.chunk_ids {
            let entry = h.index.entry(id).await.expect("indexed chunk");
            versions.push(entry.provenance.version);
        }
        versions.sort_unstable();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn reordered_document_commits_a_new_version() {
        let h = harness(&[("cfr-10", REG_A)]).await;
        h.run(RunMode::Full).await;
        let v1 = h
            .store
            .latest("us-fed:cfr-10")
            .await
            .expect("latest")
            .expect("version");

        let swapped = "Section 2. Permits expire after one calendar year.\n\n\
                       Section 1. No vessel may operate without a permit.";
        h.docs
            .write()
            .await
            .insert("cfr-10".to_string(), swapped.to_string());
        let report = h.run(RunMode::Full).await;

        // Same content at swapped ordinals: nothing to re-embed, but the
        // stored order must follow the source.
        let src = &report.sources[0];
        assert_eq!(src.counts.unchanged, 2);
        assert_eq!(src.counts.new + src.counts.changed + src.counts.removed, 0);

        let v2 = h
            .store
            .latest("us-fed:cfr-10")
            .await
            .expect("latest")
            .expect("version");
        assert_eq!(v2.version_no, 2, "reorder must append a version");
        assert_eq!(
            v2.chunk_ids,
            vec![v1.chunk_ids[1].clone(), v1.chunk_ids[0].clone()]
        );
        assert_ne!(v2.fingerprint, v1.fingerprint);
        // Index untouched: both chunks keep their original entries.
        assert_eq!(h.index.total_len().await, 2);
    }

    #[tokio::test]
    async fn vanished_document_is_retired_and_tombstoned() {
        let h = harness(&[("cfr-10", REG_A), ("cfr-11", REG_B)]).await;
        h.run(RunMode::Full).await;

        let prior = h
            .store
            .prior_state("us-fed:cfr-11")
            .await
            .expect("prior")
            .expect("known doc");
        h.docs.write().await.remove("cfr-11");
        let report = h.run(RunMode::Full).await;

        let src = &report.sources[0];
        assert_eq!(src.counts.removed, 1);
        assert_eq!(src.counts.unchanged, 2);

        let status = h
            .store
            .document_status("us-fed:cfr-11")
            .await
            .expect("status");
        assert_eq!(status, Some(DocumentStatus::Retired));

        for chunk in &prior.chunks {
            let entry = h.index.entry(&chunk.id).await.expect("entry kept");
            assert!(entry.tombstoned);
        }

        // Lineage stays queryable after retirement.
        let history = h.store.history("us-fed:cfr-11").await.expect("history");
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn incremental_run_passes_last_completed_watermark() {
        let h = harness(&[("cfr-10", REG_A)]).await;
        let first = h.run(RunMode::Full).await;
        h.run(RunMode::Incremental).await;

        let listed = h.adapter.listed_since.lock().unwrap().clone();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], None);
        assert_eq!(listed[1], Some(first.started_at));
    }

    #[tokio::test]
    async fn cancelled_run_does_not_advance_watermark() {
        let h = harness(&[("cfr-10", REG_A)]).await;
        let first = h.run(RunMode::Full).await;

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let aborted = h
            .pipeline
            .run_ingestion(
                &[source(SOURCE)],
                RunMode::Full,
                &cancelled,
                Arc::new(SilentProgress),
            )
            .await
            .expect("aborted run still reports");
        assert_eq!(aborted.sources[0].state, SourceState::Partial);

        h.run(RunMode::Incremental).await;
        let listed = h.adapter.listed_since.lock().unwrap().clone();
        // The cancelled run never listed; the watermark is still the
        // first run's start, not the cancelled run's.
        assert_eq!(listed.last().copied().flatten(), Some(first.started_at));
    }

    #[tokio::test]
    async fn broken_source_does_not_affect_healthy_one() {
        let h = harness(&[("cfr-10", REG_A)]).await;
        let broken = SourceConfig {
            id: "eu-union".to_string(),
            jurisdiction: JurisdictionTier::Union,
            base_url: "http://example.test/other".to_string(),
            politeness_delay_ms: 0,
            adapter: "no-such-adapter".to_string(),
        };

        let report = h
            .pipeline
            .run_ingestion(
                &[source(SOURCE), broken],
                RunMode::Full,
                &CancellationToken::new(),
                Arc::new(SilentProgress),
            )
            .await
            .expect("run");

        assert_eq!(report.sources.len(), 2);
        let eu = &report.sources[0];
        assert_eq!(eu.source_id, "eu-union");
        assert_eq!(eu.state, SourceState::Open);
        let us = &report.sources[1];
        assert_eq!(us.source_id, SOURCE);
        assert_eq!(us.state, SourceState::Ok);
        assert_eq!(us.counts.new, 2);
    }

    #[tokio::test]
    async fn run_is_recorded_with_report_json() {
        let h = harness(&[("cfr-10", REG_A)]).await;
        let report = h.run(RunMode::Full).await;
        let watermark = h
            .store
            .last_completed_run()
            .await
            .expect("query watermark");
        assert_eq!(watermark, Some(report.started_at));
    }
}

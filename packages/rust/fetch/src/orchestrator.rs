//! Per-source fetch driver: retries, politeness, circuit breaking.
//!
//! One orchestrator call fetches everything a single source publishes.
//! The pipeline runs one such call per source concurrently; within a
//! source all requests are strictly sequential, so politeness delays
//! hold against the same host.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lexsync_shared::{FetchPolicy, RawDocument, ReportEntry, SourceConfig, SourceState};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::adapter::{AdapterRegistry, DocumentRef, SourceAdapter};

/// Everything one source produced during a run.
#[derive(Debug)]
pub struct FetchOutcome {
    /// Cleanly fetched documents, listing order preserved.
    pub documents: Vec<RawDocument>,
    /// Items skipped with reason (terminal failures, parse markers,
    /// circuit-open leftovers, cancellation).
    pub skipped: Vec<ReportEntry>,
    /// Final source state for the run report.
    pub state: SourceState,
    /// True when the listing itself succeeded. A retirement sweep is only
    /// safe when the listing is trustworthy and nothing was skipped.
    pub listing_complete: bool,
}

/// Drives one source adapter through a full listing + fetch sequence.
pub struct FetchOrchestrator {
    registry: Arc<AdapterRegistry>,
    policy: FetchPolicy,
}

impl FetchOrchestrator {
    pub fn new(registry: Arc<AdapterRegistry>, policy: FetchPolicy) -> Self {
        Self { registry, policy }
    }

    /// Fetch all documents a source publishes. Never errors: every
    /// failure mode is folded into the outcome so other sources keep
    /// running unaffected.
    #[instrument(skip_all, fields(source_id = %source.id))]
    pub async fn fetch_source(
        &self,
        source: &SourceConfig,
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let mut outcome = FetchOutcome {
            documents: Vec::new(),
            skipped: Vec::new(),
            state: SourceState::Ok,
            listing_complete: false,
        };

        if cancel.is_cancelled() {
            outcome.skipped.push(ReportEntry {
                document_id: source.id.clone(),
                error: "run cancelled before listing".into(),
            });
            outcome.state = SourceState::Partial;
            return outcome;
        }

        let Some(adapter) = self.registry.get(&source.adapter) else {
            outcome.skipped.push(ReportEntry {
                document_id: source.id.clone(),
                error: format!("unknown adapter '{}'", source.adapter),
            });
            outcome.state = SourceState::Open;
            return outcome;
        };

        let refs = match self.list_with_retry(&*adapter, source, since, cancel).await {
            Ok(refs) => refs,
            Err(reason) => {
                outcome.skipped.push(ReportEntry {
                    document_id: source.id.clone(),
                    error: format!("listing failed: {reason}"),
                });
                outcome.state = SourceState::Open;
                return outcome;
            }
        };
        outcome.listing_complete = true;
        debug!(documents = refs.len(), "source listing complete");

        let politeness = Duration::from_millis(source.politeness_delay_ms);
        let mut consecutive_failures: u32 = 0;

        for (idx, doc_ref) in refs.iter().enumerate() {
            if cancel.is_cancelled() {
                self.skip_remaining(&mut outcome, source, &refs[idx..], "run cancelled");
                outcome.state = SourceState::Partial;
                return outcome;
            }

            if idx > 0 && !politeness.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.skip_remaining(&mut outcome, source, &refs[idx..], "run cancelled");
                        outcome.state = SourceState::Partial;
                        return outcome;
                    }
                    _ = tokio::time::sleep(politeness) => {}
                }
            }

            match self
                .fetch_with_retry(&*adapter, source, doc_ref, cancel)
                .await
            {
                Ok(raw) => {
                    if let Some(parse_error) = &raw.parse_error {
                        // Item-level interpretation failure: skip just
                        // this document, keep the sequence going.
                        outcome.skipped.push(ReportEntry {
                            document_id: raw.document_id(),
                            error: format!("parse failure: {parse_error}"),
                        });
                        consecutive_failures += 1;
                    } else {
                        outcome.documents.push(raw);
                        consecutive_failures = 0;
                    }
                }
                Err(reason) => {
                    outcome.skipped.push(ReportEntry {
                        document_id: format!("{}:{}", source.id, doc_ref.external_id),
                        error: reason,
                    });
                    consecutive_failures += 1;
                }
            }

            if consecutive_failures >= self.policy.circuit_threshold {
                warn!(
                    consecutive_failures,
                    "circuit breaker tripped, skipping remaining documents"
                );
                self.skip_remaining(&mut outcome, source, &refs[idx + 1..], "circuit open");
                outcome.state = SourceState::Open;
                return outcome;
            }
        }

        if !outcome.skipped.is_empty() {
            outcome.state = SourceState::Partial;
        }
        outcome
    }

    fn skip_remaining(
        &self,
        outcome: &mut FetchOutcome,
        source: &SourceConfig,
        remaining: &[DocumentRef],
        reason: &str,
    ) {
        for doc_ref in remaining {
            outcome.skipped.push(ReportEntry {
                document_id: format!("{}:{}", source.id, doc_ref.external_id),
                error: reason.into(),
            });
        }
    }

    async fn list_with_retry(
        &self,
        adapter: &dyn SourceAdapter,
        source: &SourceConfig,
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentRef>, String> {
        for attempt in 1..=self.policy.max_attempts {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err("run cancelled".into()),
                result = tokio::time::timeout(self.policy.fetch_timeout, adapter.list(source, since)) => result,
            };

            let error = match result {
                Ok(Ok(refs)) => return Ok(refs),
                Ok(Err(e)) => {
                    if !e.kind.is_transient() {
                        return Err(e.to_string());
                    }
                    e.to_string()
                }
                Err(_) => format!("timed out after {:?}", self.policy.fetch_timeout),
            };

            warn!(attempt, error = %error, "listing attempt failed");
            if attempt < self.policy.max_attempts {
                self.backoff(attempt, cancel).await?;
            } else {
                return Err(error);
            }
        }
        Err("retry budget exhausted".into())
    }

    async fn fetch_with_retry(
        &self,
        adapter: &dyn SourceAdapter,
        source: &SourceConfig,
        doc_ref: &DocumentRef,
        cancel: &CancellationToken,
    ) -> Result<RawDocument, String> {
        for attempt in 1..=self.policy.max_attempts {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err("run cancelled".into()),
                result = tokio::time::timeout(
                    self.policy.fetch_timeout,
                    adapter.fetch_document(source, doc_ref),
                ) => result,
            };

            let error = match result {
                Ok(Ok(mut raw)) => {
                    raw.retry_count = attempt - 1;
                    return Ok(raw);
                }
                Ok(Err(e)) => {
                    // 4xx and parse errors mean the request itself is
                    // bad; retrying cannot help.
                    if !e.kind.is_transient() {
                        return Err(e.to_string());
                    }
                    e.to_string()
                }
                Err(_) => format!("timed out after {:?}", self.policy.fetch_timeout),
            };

            warn!(attempt, error = %error, "fetch attempt failed");
            if attempt < self.policy.max_attempts {
                self.backoff(attempt, cancel).await?;
            } else {
                return Err(error);
            }
        }
        Err("retry budget exhausted".into())
    }

    /// Exponential backoff with uniform jitter, cancellation-aware.
    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), String> {
        let exp = self
            .policy
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.policy.backoff_cap);
        let jitter_ms = rand::rng().random_range(0..=(capped.as_millis() as u64 / 2).max(1));
        let delay = capped + Duration::from_millis(jitter_ms);

        tokio::select! {
            _ = cancel.cancelled() => Err("run cancelled".into()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

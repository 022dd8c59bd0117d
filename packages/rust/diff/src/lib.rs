//! Fingerprint-based change classification.
//!
//! Compares a freshly normalized chunk sequence against the latest stored
//! version of the same document and classifies every chunk slot as
//! NEW, CHANGED, UNCHANGED, or REMOVED. Classification is pure and
//! deterministic: identical inputs always yield identical results, which
//! is what makes crash-replay of a run safe downstream.
//!
//! Equality is decided purely on normalized-text fingerprints. Content
//! that moved to a different ordinal stays UNCHANGED (position alone is
//! not a change for retrieval purposes); only an edited slot is CHANGED.

use std::collections::HashMap;

use lexsync_shared::{
    Chunk, ChunkChange, LexSyncError, PriorState, Result, document_fingerprint,
};
use tracing::instrument;

/// Outcome of classifying one document's new chunk sequence.
#[derive(Debug, Clone)]
pub struct DocumentDiff {
    /// Whole-document fingerprint of the new sequence.
    pub fingerprint: String,
    /// Version number the store should assign if this diff is committed.
    pub next_version: u32,
    /// Per-slot classifications, new-sequence order first, REMOVED last.
    pub changes: Vec<ChunkChange>,
}

impl DocumentDiff {
    /// True when nothing needs committing or re-embedding.
    pub fn is_unchanged(&self) -> bool {
        self.changes
            .iter()
            .all(|c| matches!(c, ChunkChange::Unchanged { .. }))
    }
}

/// Classify `new_chunks` against the document's prior state.
///
/// With no prior state every chunk is NEW and the diff requests version 1.
/// When whole-document fingerprints match, per-chunk comparison is skipped
/// entirely and every prior chunk comes back UNCHANGED at its ordinal.
///
/// An empty `new_chunks` with a prior state classifies every prior chunk
/// REMOVED; the caller decides whether that means retirement (successful
/// fetch, document gone) or is a failure it should not have forwarded.
#[instrument(skip_all, fields(document_id, new = new_chunks.len()))]
pub fn classify(
    document_id: &str,
    new_chunks: &[Chunk],
    prior: Option<&PriorState>,
) -> Result<DocumentDiff> {
    validate_new_sequence(document_id, new_chunks)?;

    let fingerprint =
        document_fingerprint(new_chunks.iter().map(|c| c.fingerprint.as_str()));

    let Some(prior) = prior else {
        return Ok(DocumentDiff {
            fingerprint,
            next_version: 1,
            changes: new_chunks.iter().cloned().map(ChunkChange::New).collect(),
        });
    };

    validate_prior_state(document_id, prior)?;
    let next_version = prior.version_no + 1;

    // Fast path: identical whole-document fingerprints mean an identical
    // chunk sequence, so every slot maps 1:1 onto the prior chunks.
    if fingerprint == prior.fingerprint {
        let changes = prior
            .chunks
            .iter()
            .map(|p| ChunkChange::Unchanged {
                chunk_id: p.id.clone(),
                ordinal: p.ordinal,
            })
            .collect();
        return Ok(DocumentDiff {
            fingerprint,
            next_version,
            changes,
        });
    }

    Ok(DocumentDiff {
        fingerprint,
        next_version,
        changes: classify_slots(new_chunks, prior),
    })
}

// ---------------------------------------------------------------------------
// Slot classification
// ---------------------------------------------------------------------------

/// Match state for one new chunk during classification.
enum SlotMatch {
    /// Index into `prior.chunks` of the consumed match.
    Unchanged(usize),
    Unmatched,
}

fn classify_slots(new_chunks: &[Chunk], prior: &PriorState) -> Vec<ChunkChange> {
    let prior_len = prior.chunks.len();
    let mut consumed = vec![false; prior_len];

    // Prior chunk indices grouped by fingerprint, in ordinal order.
    // Duplicate content consumes one prior chunk per occurrence, so a
    // repeated clause is matched at most once per copy.
    let mut by_fingerprint: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, p) in prior.chunks.iter().enumerate() {
        by_fingerprint.entry(p.fingerprint.as_str()).or_default().push(idx);
    }

    let mut matches: Vec<SlotMatch> = Vec::with_capacity(new_chunks.len());

    // First pass: same-ordinal fingerprint matches win before any
    // moved-content matching, so an unmodified slot is never "stolen"
    // by a duplicate elsewhere in the document.
    for chunk in new_chunks {
        let same_slot = chunk.ordinal < prior_len
            && !consumed[chunk.ordinal]
            && prior.chunks[chunk.ordinal].fingerprint == chunk.fingerprint;
        if same_slot {
            consumed[chunk.ordinal] = true;
            matches.push(SlotMatch::Unchanged(chunk.ordinal));
        } else {
            matches.push(SlotMatch::Unmatched);
        }
    }

    // Second pass: moved content. Match remaining new chunks to the
    // lowest-ordinal unconsumed prior chunk with the same fingerprint.
    for (chunk, slot) in new_chunks.iter().zip(matches.iter_mut()) {
        if matches!(slot, SlotMatch::Unchanged(_)) {
            continue;
        }
        let Some(candidates) = by_fingerprint.get(chunk.fingerprint.as_str()) else {
            continue;
        };
        if let Some(&idx) = candidates.iter().find(|&&idx| !consumed[idx]) {
            consumed[idx] = true;
            *slot = SlotMatch::Unchanged(idx);
        }
    }

    // Third pass: no fingerprint match anywhere. CHANGED when the prior
    // chunk at the same ordinal slot is still unclaimed (in-place edit,
    // superseding it); NEW otherwise.
    let mut changes: Vec<ChunkChange> = Vec::with_capacity(new_chunks.len());
    for (chunk, slot) in new_chunks.iter().zip(matches.iter()) {
        match slot {
            SlotMatch::Unchanged(idx) => changes.push(ChunkChange::Unchanged {
                chunk_id: prior.chunks[*idx].id.clone(),
                ordinal: chunk.ordinal,
            }),
            SlotMatch::Unmatched => {
                if chunk.ordinal < prior_len && !consumed[chunk.ordinal] {
                    consumed[chunk.ordinal] = true;
                    changes.push(ChunkChange::Changed(chunk.clone()));
                } else {
                    changes.push(ChunkChange::New(chunk.clone()));
                }
            }
        }
    }

    // Prior chunks neither matched nor superseded are gone from the
    // document; they are archived, never deleted.
    for (idx, p) in prior.chunks.iter().enumerate() {
        if !consumed[idx] {
            changes.push(ChunkChange::Removed {
                chunk_id: p.id.clone(),
            });
        }
    }

    changes
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

/// Reject a new sequence whose ordinals are not contiguous from 0.
fn validate_new_sequence(document_id: &str, chunks: &[Chunk]) -> Result<()> {
    for (idx, chunk) in chunks.iter().enumerate() {
        if chunk.ordinal != idx {
            return Err(LexSyncError::diff(
                document_id,
                format!("new chunk ordinal {} at position {idx}", chunk.ordinal),
            ));
        }
    }
    Ok(())
}

/// Reject a corrupted prior version record (duplicate or gapped ordinals).
/// Fatal for this document only; the run continues.
fn validate_prior_state(document_id: &str, prior: &PriorState) -> Result<()> {
    for (idx, chunk) in prior.chunks.iter().enumerate() {
        if chunk.ordinal != idx {
            return Err(LexSyncError::diff(
                document_id,
                format!(
                    "prior version {} has ordinal {} at position {idx}",
                    prior.version_no, chunk.ordinal
                ),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

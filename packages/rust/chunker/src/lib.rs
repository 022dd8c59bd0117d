//! Deterministic normalization and chunking for fetched documents.
//!
//! Turns a [`RawDocument`] into an ordered sequence of [`Chunk`]s whose
//! identities are stable across runs: the same payload bytes always
//! produce the same chunk ids and fingerprints. Everything downstream
//! (diffing, versioning, index upserts) relies on that property.

mod cleanup;

use lexsync_shared::{Chunk, NormalizationError, RawDocument};
use tracing::instrument;

/// Normalize a raw document and split it into ordered chunks.
///
/// Fails with [`NormalizationError::UnsupportedEncoding`] when the payload
/// is not valid UTF-8 and with [`NormalizationError::EmptyAfterCleaning`]
/// when nothing textual survives the cleanup pipeline. Both are terminal
/// for the document: malformed content does not get better on retry.
#[instrument(skip_all, fields(document_id = %raw.document_id(), content_type = %raw.content_type))]
pub fn normalize_and_chunk(
    raw: &RawDocument,
    max_chunk_bytes: usize,
) -> Result<Vec<Chunk>, NormalizationError> {
    let text = std::str::from_utf8(&raw.payload)
        .map_err(|e| NormalizationError::UnsupportedEncoding(e.to_string()))?;

    let text = if is_html(&raw.content_type) {
        cleanup::extract_html_text(text)
    } else {
        text.to_string()
    };

    let normalized = cleanup::run_pipeline(&text);
    if normalized.is_empty() {
        return Err(NormalizationError::EmptyAfterCleaning);
    }

    let document_id = raw.document_id();
    let chunks = split_chunks(&document_id, &normalized, max_chunk_bytes);
    tracing::debug!(chunks = chunks.len(), "document chunked");
    Ok(chunks)
}

fn is_html(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    essence.eq_ignore_ascii_case("text/html") || essence.eq_ignore_ascii_case("application/xhtml+xml")
}

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

/// Split normalized text into chunks on paragraph boundaries.
///
/// Paragraphs accumulate into a chunk until adding the next one would
/// exceed `max_bytes`. A single oversized paragraph is split on sentence
/// boundaries; a single oversized sentence is hard-split at the nearest
/// space before the limit. Ordinals are contiguous from 0.
fn split_chunks(document_id: &str, text: &str, max_bytes: usize) -> Vec<Chunk> {
    let max_bytes = max_bytes.max(64);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        let joined_len = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };

        if joined_len > max_bytes && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if para.len() > max_bytes {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            split_oversized(para, max_bytes, &mut pieces);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(para);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(ordinal, piece)| Chunk::from_text(document_id, ordinal, piece))
        .collect()
}

/// Split an oversized paragraph on sentence boundaries, falling back to a
/// hard split at a space (or char boundary) for a single giant sentence.
fn split_oversized(para: &str, max_bytes: usize, pieces: &mut Vec<String>) {
    let mut buf = String::new();

    for sentence in split_sentences(para) {
        let joined_len = if buf.is_empty() {
            sentence.len()
        } else {
            buf.len() + 1 + sentence.len()
        };

        if joined_len > max_bytes && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if sentence.len() > max_bytes {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            hard_split(sentence, max_bytes, pieces);
        } else {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(sentence);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
}

/// Split a paragraph after sentence-ending punctuation followed by a space.
///
/// Deliberately simple: legal text is dense with abbreviations, but any
/// consistent rule works here because splitting only needs to be
/// deterministic, not linguistically perfect.
fn split_sentences(para: &str) -> Vec<&str> {
    let bytes = para.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0;

    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?')
            && bytes.get(i + 1).is_some_and(|b| *b == b' ')
        {
            let sentence = para[start..=i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i + 2;
            i += 2;
            continue;
        }
        i += 1;
    }

    let tail = para[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Hard-split a single oversized sentence, preferring space boundaries.
fn hard_split(sentence: &str, max_bytes: usize, pieces: &mut Vec<String>) {
    let mut remaining = sentence;
    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            pieces.push(remaining.to_string());
            break;
        }
        let limit = floor_char_boundary(remaining, max_bytes);
        let split_at = remaining[..limit]
            .rfind(' ')
            .map(|pos| pos + 1)
            .filter(|pos| *pos > 0)
            .unwrap_or(limit);
        let split_at = floor_char_boundary(remaining, split_at).max(1);
        let split_at = if remaining.is_char_boundary(split_at) {
            split_at
        } else {
            ceil_char_boundary(remaining, split_at)
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Error types for LexSync.
//!
//! Library crates use [`LexSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all LexSync operations.
#[derive(Debug, thiserror::Error)]
pub enum LexSyncError {
    /// Fetch failure from a source adapter or the orchestrator.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Normalization failure — malformed source content, never retried.
    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    /// Prior version record is inconsistent; fatal for that document only.
    #[error("diff inconsistency for document '{document_id}': {message}")]
    Diff {
        document_id: String,
        message: String,
    },

    /// Version store layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Semantic index or embedding collaborator error.
    #[error("index error: {0}")]
    Index(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LexSyncError>;

impl LexSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a diff-inconsistency error scoped to one document.
    pub fn diff(document_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Diff {
            document_id: document_id.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch errors
// ---------------------------------------------------------------------------

/// Classification of a fetch failure.
///
/// The orchestrator consults [`FetchErrorKind::is_transient`] to decide
/// whether an attempt is retried or surfaced immediately as a skipped item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The request exceeded its per-attempt deadline.
    Timeout,
    /// Non-success HTTP status from the source.
    HttpStatus(u16),
    /// The source returned a payload the adapter could not interpret.
    ParseFailure,
    /// The source signalled throttling (HTTP 429 or equivalent).
    RateLimited,
}

impl FetchErrorKind {
    /// Whether a failure of this kind is worth retrying.
    ///
    /// Timeouts, throttling, and 5xx are transient; 4xx and parse
    /// failures indicate the request itself is bad.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited => true,
            Self::HttpStatus(code) => *code >= 500,
            Self::ParseFailure => false,
        }
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::HttpStatus(code) => write!(f, "http {code}"),
            Self::ParseFailure => write!(f, "parse failure"),
            Self::RateLimited => write!(f, "rate limited"),
        }
    }
}

/// A fetch failure with its retry classification and context.
#[derive(Debug, thiserror::Error)]
#[error("fetch error ({kind}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, msg)
    }

    pub fn status(code: u16, msg: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::HttpStatus(code), msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::ParseFailure, msg)
    }
}

// ---------------------------------------------------------------------------
// Normalization errors
// ---------------------------------------------------------------------------

/// Normalization failure for one raw document.
///
/// Always skipped-and-reported, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    /// The raw payload is not valid UTF-8.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Cleaning stripped everything; there is no text left to chunk.
    #[error("document is empty after cleaning")]
    EmptyAfterCleaning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = LexSyncError::config("missing source list");
        assert_eq!(err.to_string(), "config error: missing source list");

        let err = LexSyncError::diff("us-fed:cfr-12", "duplicate ordinal 3");
        assert!(err.to_string().contains("us-fed:cfr-12"));
        assert!(err.to_string().contains("duplicate ordinal 3"));
    }

    #[test]
    fn transient_classification() {
        assert!(FetchErrorKind::Timeout.is_transient());
        assert!(FetchErrorKind::RateLimited.is_transient());
        assert!(FetchErrorKind::HttpStatus(503).is_transient());
        assert!(!FetchErrorKind::HttpStatus(404).is_transient());
        assert!(!FetchErrorKind::HttpStatus(403).is_transient());
        assert!(!FetchErrorKind::ParseFailure.is_transient());
    }

    #[test]
    fn fetch_error_display() {
        let err = FetchError::status(502, "bad gateway from upstream");
        assert_eq!(
            err.to_string(),
            "fetch error (http 502): bad gateway from upstream"
        );
    }

    #[test]
    fn normalization_error_display() {
        let err = NormalizationError::EmptyAfterCleaning;
        assert_eq!(err.to_string(), "document is empty after cleaning");
    }
}

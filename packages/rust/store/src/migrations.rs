//! SQL migration definitions for the LexSync version store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: documents, document_versions, chunks, version_chunks, runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per known document; status flips to 'retired' when the source
-- stops publishing it, the row itself is never deleted
CREATE TABLE IF NOT EXISTS documents (
    id           TEXT PRIMARY KEY,
    source_id    TEXT NOT NULL,
    source_url   TEXT NOT NULL,
    jurisdiction TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'active',
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source_id);
CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);

-- Append-only version lineage; predecessor is a version number, not a
-- foreign row reference
CREATE TABLE IF NOT EXISTS document_versions (
    document_id  TEXT NOT NULL REFERENCES documents(id),
    version_no   INTEGER NOT NULL,
    run_id       TEXT NOT NULL,
    retrieved_at TEXT NOT NULL,
    fingerprint  TEXT NOT NULL,
    predecessor  INTEGER,
    created_at   TEXT NOT NULL,
    PRIMARY KEY (document_id, version_no)
);

-- Chunk bodies, content-addressed by id; archived chunks keep their row
-- plus the version at which they were retired
CREATE TABLE IF NOT EXISTS chunks (
    id                 TEXT PRIMARY KEY,
    document_id        TEXT NOT NULL REFERENCES documents(id),
    first_version      INTEGER NOT NULL,
    ordinal            INTEGER NOT NULL,
    text               TEXT NOT NULL,
    fingerprint        TEXT NOT NULL,
    byte_len           INTEGER NOT NULL,
    archived           INTEGER NOT NULL DEFAULT 0,
    retired_in_version INTEGER
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_chunks_fingerprint ON chunks(fingerprint);

-- Ordered chunk membership per version
CREATE TABLE IF NOT EXISTS version_chunks (
    document_id TEXT NOT NULL,
    version_no  INTEGER NOT NULL,
    ordinal     INTEGER NOT NULL,
    chunk_id    TEXT NOT NULL REFERENCES chunks(id),
    PRIMARY KEY (document_id, version_no, ordinal)
);

CREATE INDEX IF NOT EXISTS idx_version_chunks_chunk ON version_chunks(chunk_id);

-- Pipeline run bookkeeping
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    mode        TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    report_json TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}

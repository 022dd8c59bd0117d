//! libSQL-backed append-only version store.
//!
//! The [`VersionStore`] is the sole writer of document lineage: every
//! committed [`Changeset`] appends one immutable [`DocumentVersion`] and
//! never rewrites or deletes a prior one. REMOVED chunks are archived
//! with the version at which they retired, so history stays queryable
//! forever.
//!
//! Commits for different documents may run in parallel; commits for the
//! same document are serialized through a per-document async lock. Each
//! commit runs its transaction on a dedicated connection so parallel
//! transactions never share a SQLite session.

mod migrations;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lexsync_shared::{
    Changeset, ChunkChange, DocumentStatus, DocumentVersion, LexSyncError, PriorChunk,
    PriorState, Result, RunId, RunMode,
};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;

/// Primary storage handle wrapping a libSQL database.
///
/// `conn` serves reads and single-statement writes; transactional
/// commits each open their own connection from `db`.
pub struct VersionStore {
    db: Database,
    conn: Connection,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VersionStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LexSyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        let store = Self {
            db,
            conn,
            locks: Mutex::new(HashMap::new()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    LexSyncError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Per-document commit lock: same document serializes, different
    /// documents proceed in parallel.
    async fn document_lock(&self, document_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Atomically commit a changeset as the document's next version.
    ///
    /// Replay-safe: committing a changeset whose fingerprint equals the
    /// latest stored version's fingerprint returns that version unchanged
    /// instead of appending a duplicate. This is what makes crash-recovery
    /// re-runs of a pipeline produce one version, not two.
    pub async fn commit(&self, changeset: &Changeset) -> Result<DocumentVersion> {
        let lock = self.document_lock(&changeset.document_id).await;
        let _guard = lock.lock().await;

        let latest = self.latest_inner(&changeset.document_id).await?;
        if let Some(latest) = latest.as_ref() {
            if latest.fingerprint == changeset.fingerprint {
                tracing::debug!(
                    document_id = %changeset.document_id,
                    version = latest.version_no,
                    "changeset replay detected, returning existing version"
                );
                return Ok(latest.clone());
            }
        }

        let predecessor = latest.as_ref().map(|v| v.version_no);
        let version_no = predecessor.map_or(1, |v| v + 1);
        let now = Utc::now().to_rfc3339();
        let retrieved_at = changeset.retrieved_at.to_rfc3339();
        let chunk_ids = changeset.ordered_chunk_ids();
        let status = if changeset.retired {
            "retired"
        } else {
            "active"
        };

        // A transaction owns its SQLite session; sharing the read
        // connection would interleave BEGIN/COMMIT across documents.
        let conn = self
            .db
            .connect()
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        tx.execute(
            "INSERT INTO documents (id, source_id, source_url, jurisdiction, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
               source_url = excluded.source_url,
               status = excluded.status,
               updated_at = excluded.updated_at",
            params![
                changeset.document_id.as_str(),
                changeset.source_id.as_str(),
                changeset.source_url.as_str(),
                changeset.jurisdiction.to_string(),
                status,
                now.as_str(),
            ],
        )
        .await
        .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        tx.execute(
            "INSERT INTO document_versions
               (document_id, version_no, run_id, retrieved_at, fingerprint, predecessor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                changeset.document_id.as_str(),
                version_no as i64,
                changeset.run_id.to_string(),
                retrieved_at.as_str(),
                changeset.fingerprint.as_str(),
                predecessor.map(|v| v as i64),
                now.as_str(),
            ],
        )
        .await
        .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        for change in &changeset.changes {
            match change {
                ChunkChange::New(chunk) | ChunkChange::Changed(chunk) => {
                    // Content-addressed ids make replays overwrite-identical.
                    // Re-inserting a previously removed chunk clears its
                    // archival marks, since it is live again.
                    tx.execute(
                        "INSERT INTO chunks
                           (id, document_id, first_version, ordinal, text, fingerprint, byte_len)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                         ON CONFLICT(id) DO UPDATE SET
                           archived = 0,
                           retired_in_version = NULL",
                        params![
                            chunk.id.as_str(),
                            chunk.document_id.as_str(),
                            version_no as i64,
                            chunk.ordinal as i64,
                            chunk.text.as_str(),
                            chunk.fingerprint.as_str(),
                            chunk.byte_len as i64,
                        ],
                    )
                    .await
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?;
                }
                ChunkChange::Removed { chunk_id } => {
                    tx.execute(
                        "UPDATE chunks SET archived = 1, retired_in_version = ?1 WHERE id = ?2",
                        params![version_no as i64, chunk_id.as_str()],
                    )
                    .await
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?;
                }
                ChunkChange::Unchanged { .. } => {}
            }
        }

        for (ordinal, chunk_id) in chunk_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO version_chunks (document_id, version_no, ordinal, chunk_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    changeset.document_id.as_str(),
                    version_no as i64,
                    ordinal as i64,
                    chunk_id.as_str(),
                ],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        tracing::info!(
            document_id = %changeset.document_id,
            version = version_no,
            chunks = chunk_ids.len(),
            retired = changeset.retired,
            "committed document version"
        );

        Ok(DocumentVersion {
            document_id: changeset.document_id.clone(),
            version_no,
            retrieved_at: changeset.retrieved_at,
            chunk_ids,
            fingerprint: changeset.fingerprint.clone(),
            predecessor,
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Latest committed version of a document, if any.
    pub async fn latest(&self, document_id: &str) -> Result<Option<DocumentVersion>> {
        let lock = self.document_lock(document_id).await;
        let _guard = lock.lock().await;
        self.latest_inner(document_id).await
    }

    async fn latest_inner(&self, document_id: &str) -> Result<Option<DocumentVersion>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, version_no, retrieved_at, fingerprint, predecessor
                 FROM document_versions
                 WHERE document_id = ?1
                 ORDER BY version_no DESC
                 LIMIT 1",
                params![document_id],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let mut version = row_to_version(&row)?;
                version.chunk_ids = self
                    .version_chunk_ids(document_id, version.version_no)
                    .await?;
                Ok(Some(version))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LexSyncError::Storage(e.to_string())),
        }
    }

    /// Full version history of a document, oldest to newest.
    pub async fn history(&self, document_id: &str) -> Result<Vec<DocumentVersion>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, version_no, retrieved_at, fingerprint, predecessor
                 FROM document_versions
                 WHERE document_id = ?1
                 ORDER BY version_no ASC",
                params![document_id],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        let mut versions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            versions.push(row_to_version(&row)?);
        }
        for version in &mut versions {
            version.chunk_ids = self
                .version_chunk_ids(document_id, version.version_no)
                .await?;
        }
        Ok(versions)
    }

    /// Latest version shaped for the diff engine: ordinals, ids, and
    /// fingerprints of the current chunk sequence.
    pub async fn prior_state(&self, document_id: &str) -> Result<Option<PriorState>> {
        let Some(latest) = self.latest(document_id).await? else {
            return Ok(None);
        };

        let mut rows = self
            .conn
            .query(
                "SELECT vc.ordinal, c.id, c.fingerprint
                 FROM version_chunks vc
                 JOIN chunks c ON c.id = vc.chunk_id
                 WHERE vc.document_id = ?1 AND vc.version_no = ?2
                 ORDER BY vc.ordinal ASC",
                params![document_id, latest.version_no as i64],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        let mut chunks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            chunks.push(PriorChunk {
                ordinal: row
                    .get::<i64>(0)
                    .map_err(|e| LexSyncError::Storage(e.to_string()))? as usize,
                id: row
                    .get::<String>(1)
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?,
                fingerprint: row
                    .get::<String>(2)
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?,
            });
        }

        Ok(Some(PriorState {
            version_no: latest.version_no,
            fingerprint: latest.fingerprint,
            chunks,
        }))
    }

    /// Ids of documents a source currently publishes (status 'active').
    /// Drives the retirement sweep after a clean full fetch.
    pub async fn active_documents(&self, source_id: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM documents WHERE source_id = ?1 AND status = 'active' ORDER BY id",
                params![source_id],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            ids.push(
                row.get::<String>(0)
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?,
            );
        }
        Ok(ids)
    }

    /// Stored source URL of a document. Used when synthesizing a
    /// retirement changeset, where no fresh fetch exists to supply one.
    pub async fn document_source_url(&self, document_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT source_url FROM documents WHERE id = ?1",
                params![document_id],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(LexSyncError::Storage(e.to_string())),
        }
    }

    /// Lifecycle status of a document, if known.
    pub async fn document_status(&self, document_id: &str) -> Result<Option<DocumentStatus>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status FROM documents WHERE id = ?1",
                params![document_id],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let status: String = row
                    .get(0)
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?;
                match status.as_str() {
                    "active" => Ok(Some(DocumentStatus::Active)),
                    "retired" => Ok(Some(DocumentStatus::Retired)),
                    other => Err(LexSyncError::Storage(format!(
                        "unknown document status '{other}'"
                    ))),
                }
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LexSyncError::Storage(e.to_string())),
        }
    }

    /// Archival state of a chunk: `(archived, retired_in_version)`.
    pub async fn chunk_archival(&self, chunk_id: &str) -> Result<Option<(bool, Option<u32>)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT archived, retired_in_version FROM chunks WHERE id = ?1",
                params![chunk_id],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let archived: i64 = row
                    .get(0)
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?;
                let retired_in: Option<i64> = row.get(1).ok();
                Ok(Some((archived != 0, retired_in.map(|v| v as u32))))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LexSyncError::Storage(e.to_string())),
        }
    }

    async fn version_chunk_ids(&self, document_id: &str, version_no: u32) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT chunk_id FROM version_chunks
                 WHERE document_id = ?1 AND version_no = ?2
                 ORDER BY ordinal ASC",
                params![document_id, version_no as i64],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            ids.push(
                row.get::<String>(0)
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?,
            );
        }
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Run bookkeeping
    // -----------------------------------------------------------------------

    /// Record the start of a pipeline run.
    pub async fn insert_run(
        &self,
        run_id: &RunId,
        mode: RunMode,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO runs (id, mode, started_at) VALUES (?1, ?2, ?3)",
                params![
                    run_id.to_string(),
                    mode.to_string(),
                    started_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Mark a run completed and attach its serialized report.
    pub async fn finish_run(&self, run_id: &RunId, report_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, report_json = ?2 WHERE id = ?3",
                params![now.as_str(), report_json, run_id.to_string()],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Start time of the most recent completed run. Incremental runs use
    /// this as the `since` watermark for source listings.
    pub async fn last_completed_run(&self) -> Result<Option<DateTime<Utc>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT started_at FROM runs
                 WHERE finished_at IS NOT NULL
                 ORDER BY started_at DESC
                 LIMIT 1",
                params![],
            )
            .await
            .map_err(|e| LexSyncError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let s: String = row
                    .get(0)
                    .map_err(|e| LexSyncError::Storage(e.to_string()))?;
                let ts = DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| LexSyncError::Storage(format!("invalid date: {e}")))?;
                Ok(Some(ts))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LexSyncError::Storage(e.to_string())),
        }
    }
}

/// Convert a database row to a [`DocumentVersion`] (chunk ids filled later).
fn row_to_version(row: &libsql::Row) -> Result<DocumentVersion> {
    Ok(DocumentVersion {
        document_id: row
            .get::<String>(0)
            .map_err(|e| LexSyncError::Storage(e.to_string()))?,
        version_no: row
            .get::<i64>(1)
            .map_err(|e| LexSyncError::Storage(e.to_string()))? as u32,
        retrieved_at: {
            let s: String = row
                .get(2)
                .map_err(|e| LexSyncError::Storage(e.to_string()))?;
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| LexSyncError::Storage(format!("invalid date: {e}")))?
        },
        chunk_ids: Vec::new(),
        fingerprint: row
            .get::<String>(3)
            .map_err(|e| LexSyncError::Storage(e.to_string()))?,
        predecessor: row.get::<i64>(4).ok().map(|v| v as u32),
    })
}

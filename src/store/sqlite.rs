//! SQLite-backed [`JobStore`] reference implementation.
//!
//! Jobs live in a single `ingestion_jobs` table with secondary indexes for
//! the document, path, and repository lookups. Status updates are
//! compare-and-set through a conditional `UPDATE ... WHERE status = ?`, so
//! a writer that lost a race observes a storage failure instead of
//! silently clobbering the winner.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::cursor::{cursor_i64, cursor_str, PageKey};
use crate::error::{Error, Result};
use crate::models::{ChunkingStrategy, IngestionJob, JobStatus};

use super::{JobPage, JobStore};

fn storage_err(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

/// SQLite [`JobStore`].
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if missing) a job database at `path` and bootstrap
    /// the schema.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("failed to create {}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(storage_err)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingestion_jobs (
                id TEXT PRIMARY KEY,
                repository_id TEXT NOT NULL,
                collection_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                chunk_strategy TEXT NOT NULL,
                embedding_model TEXT NOT NULL,
                source_path TEXT NOT NULL,
                username TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_repository
             ON ingestion_jobs(repository_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_document ON ingestion_jobs(document_id)")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_path ON ingestion_jobs(source_path)")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_job(row: &SqliteRow) -> Result<IngestionJob> {
    let strategy_json: String = row.try_get("chunk_strategy").map_err(storage_err)?;
    let chunk_strategy: ChunkingStrategy = serde_json::from_str(&strategy_json)
        .map_err(|e| Error::Storage(format!("corrupt chunk_strategy column: {e}")))?;

    let metadata_json: String = row.try_get("metadata").map_err(storage_err)?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|e| Error::Storage(format!("corrupt metadata column: {e}")))?;

    let status_raw: String = row.try_get("status").map_err(storage_err)?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| Error::Storage(format!("unknown status value '{status_raw}'")))?;

    let created_ms: i64 = row.try_get("created_at").map_err(storage_err)?;
    let updated_ms: i64 = row.try_get("updated_at").map_err(storage_err)?;

    Ok(IngestionJob {
        id: row.try_get("id").map_err(storage_err)?,
        repository_id: row.try_get("repository_id").map_err(storage_err)?,
        collection_id: row.try_get("collection_id").map_err(storage_err)?,
        document_id: row.try_get("document_id").map_err(storage_err)?,
        chunk_strategy,
        embedding_model: row.try_get("embedding_model").map_err(storage_err)?,
        source_path: row.try_get("source_path").map_err(storage_err)?,
        username: row.try_get("username").map_err(storage_err)?,
        metadata,
        status,
        created_at: millis_to_datetime(created_ms)?,
        updated_at: millis_to_datetime(updated_ms)?,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Storage(format!("timestamp out of range: {ms}")))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &IngestionJob) -> Result<()> {
        let strategy_json = serde_json::to_string(&job.chunk_strategy)
            .map_err(|e| Error::Storage(e.to_string()))?;
        let metadata_json =
            serde_json::to_string(&job.metadata).map_err(|e| Error::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO ingestion_jobs
                (id, repository_id, collection_id, document_id, chunk_strategy,
                 embedding_model, source_path, username, metadata, status,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                repository_id = excluded.repository_id,
                collection_id = excluded.collection_id,
                document_id = excluded.document_id,
                chunk_strategy = excluded.chunk_strategy,
                embedding_model = excluded.embedding_model,
                source_path = excluded.source_path,
                username = excluded.username,
                metadata = excluded.metadata,
                status = excluded.status,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.repository_id)
        .bind(&job.collection_id)
        .bind(&job.document_id)
        .bind(&strategy_json)
        .bind(&job.embedding_model)
        .bind(&job.source_path)
        .bind(&job.username)
        .bind(&metadata_json)
        .bind(job.status.as_str())
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<IngestionJob> {
        let row = sqlx::query("SELECT * FROM ingestion_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(Error::not_found("job", id)),
        }
    }

    async fn find_by_document(&self, document_id: &str) -> Result<Option<IngestionJob>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM ingestion_jobs
            WHERE document_id = ? AND status IN ('pending', 'in_progress', 'deleting')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn find_by_path(&self, source_path: &str) -> Result<Vec<IngestionJob>> {
        let rows = sqlx::query(
            "SELECT * FROM ingestion_jobs WHERE source_path = ? ORDER BY created_at, id",
        )
        .bind(source_path)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn update_status(
        &self,
        job: &IngestionJob,
        new_status: JobStatus,
    ) -> Result<IngestionJob> {
        let result = sqlx::query(
            "UPDATE ingestion_jobs SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(new_status.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(&job.id)
        .bind(job.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            let found: Option<String> =
                sqlx::query_scalar("SELECT status FROM ingestion_jobs WHERE id = ?")
                    .bind(&job.id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(storage_err)?;
            return match found {
                None => Err(Error::not_found("job", &job.id)),
                Some(current) => Err(Error::Storage(format!(
                    "job {} status changed concurrently (expected {}, found {current})",
                    job.id,
                    job.status.as_str()
                ))),
            };
        }

        self.find_by_id(&job.id).await
    }

    async fn list_by_repository(
        &self,
        repository_id: &str,
        page_size: usize,
        cursor: Option<&PageKey>,
        max_age: Option<Duration>,
    ) -> Result<JobPage> {
        let (after_ts, after_id) = match cursor {
            Some(key) => (cursor_i64(key, "created_at")?, cursor_str(key, "id")?),
            // Sentinels ordered before every real row.
            None => (-1, String::new()),
        };
        let cutoff_ms = max_age
            .map(|age| (Utc::now() - age).timestamp_millis())
            .unwrap_or(0);

        let rows = sqlx::query(
            r#"
            SELECT * FROM ingestion_jobs
            WHERE repository_id = ?
              AND created_at >= ?
              AND (created_at > ? OR (created_at = ? AND id > ?))
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(repository_id)
        .bind(cutoff_ms)
        .bind(after_ts)
        .bind(after_ts)
        .bind(&after_id)
        .bind(page_size as i64 + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut jobs: Vec<IngestionJob> = rows.iter().map(row_to_job).collect::<Result<_>>()?;

        let next_cursor = if jobs.len() > page_size {
            jobs.truncate(page_size);
            jobs.last().map(|j| {
                let mut key = PageKey::new();
                key.insert(
                    "created_at".to_string(),
                    serde_json::json!(j.created_at.timestamp_millis()),
                );
                key.insert("id".to_string(), serde_json::json!(j.id));
                key
            })
        } else {
            None
        };

        Ok(JobPage { jobs, next_cursor })
    }

    async fn count_active_deletions(&self, repository_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ingestion_jobs WHERE repository_id = ? AND status = 'deleting'",
        )
        .bind(repository_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(count as usize)
    }
}

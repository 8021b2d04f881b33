use chrono::{DateTime, Utc};
use sqlx::PgPool;

use markbase_model::IngestStateRecord;

use crate::error::Result;

/// Repository for the `ingest_state` table: one row per (source, scope),
/// carrying the resumable cursor and the last run's counters.
#[derive(Clone, Debug)]
pub struct IngestStateStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct IngestStateRow {
    id: i32,
    source: String,
    scope_key: String,
    last_started_at: Option<DateTime<Utc>>,
    last_ended_at: Option<DateTime<Utc>>,
    last_error_message: Option<String>,
    cursor_updated_at: Option<DateTime<Utc>>,
    total_files: i64,
    processed: i64,
    skipped: i64,
    errors: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<IngestStateRow> for IngestStateRecord {
    fn from(row: IngestStateRow) -> Self {
        IngestStateRecord {
            id: row.id,
            source: row.source,
            scope_key: row.scope_key,
            last_started_at: row.last_started_at,
            last_ended_at: row.last_ended_at,
            last_error_message: row.last_error_message,
            cursor_updated_at: row.cursor_updated_at,
            total_files: row.total_files,
            processed: row.processed,
            skipped: row.skipped,
            errors: row.errors,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const STATE_COLUMNS: &str = "id, source, scope_key, last_started_at, last_ended_at, \
     last_error_message, cursor_updated_at, total_files, processed, skipped, \
     errors, created_at, updated_at";

impl IngestStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the state row for a scope, creating it on first use.
    pub async fn get_or_create(&self, source: &str, scope_key: &str) -> Result<IngestStateRecord> {
        let row = sqlx::query_as::<_, IngestStateRow>(&format!(
            r#"
            INSERT INTO ingest_state (source, scope_key)
            VALUES ($1, $2)
            ON CONFLICT (source, scope_key) DO UPDATE SET updated_at = NOW()
            RETURNING {STATE_COLUMNS}
            "#
        ))
        .bind(source)
        .bind(scope_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    /// Mark a run as started and clear the previous error.
    pub async fn begin_run(&self, id: i32, started_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE ingest_state SET last_started_at = $2, last_error_message = NULL, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_total_files(&self, id: i32, total: i64) -> Result<()> {
        sqlx::query(
            "UPDATE ingest_state SET total_files = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_error(&self, id: i32, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE ingest_state SET last_error_message = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Final counter write; runs in the coordinator's finalize block
    /// regardless of how the run ended.
    pub async fn finish_run(
        &self,
        id: i32,
        processed: i64,
        skipped: i64,
        errors: i64,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE ingest_state SET processed = $2, skipped = $3, errors = $4, \
             last_ended_at = $5, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(processed)
        .bind(skipped)
        .bind(errors)
        .bind(ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Advance the mtime watermark. Called only after a successful,
    /// non-cancelled completion.
    pub async fn advance_cursor(&self, id: i32, to: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE ingest_state SET cursor_updated_at = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

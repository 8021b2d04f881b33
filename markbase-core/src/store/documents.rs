use chrono::{DateTime, Utc};
use sqlx::PgPool;

use markbase_model::{ConversionType, Document, DocumentStatus, NormalizedPathKey};

use crate::error::{IndexError, Result};
use crate::fs::FileMetadata;

/// Repository for the `documents` table.
///
/// The unique index on `file_path` (and its case-insensitive companion)
/// makes every write here an atomic insert-or-update; concurrent upserts on
/// the same path serialize inside Postgres. One statement per file bounds
/// the blast radius of crashes.
#[derive(Clone, Debug)]
pub struct DocumentStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: i32,
    file_name: String,
    file_type: String,
    file_size: i64,
    file_created_at: Option<DateTime<Utc>>,
    file_modified_time: Option<DateTime<Utc>>,
    file_path: String,
    markdown_content: Option<String>,
    conversion_type: Option<i16>,
    status: String,
    error_message: Option<String>,
    source: String,
    source_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        let status = DocumentStatus::parse(&self.status).ok_or_else(|| {
            IndexError::Internal(format!("unknown document status '{}'", self.status))
        })?;
        let conversion_type = self
            .conversion_type
            .map(|raw| {
                ConversionType::from_i16(raw).ok_or_else(|| {
                    IndexError::Internal(format!("unknown conversion type {raw}"))
                })
            })
            .transpose()?;
        let file_path = NormalizedPathKey::new(self.file_path)
            .map_err(|e| IndexError::Internal(format!("stored path invalid: {e}")))?;

        Ok(Document {
            id: self.id,
            file_name: self.file_name,
            file_type: self.file_type,
            file_size: self.file_size,
            file_created_at: self.file_created_at,
            file_modified_time: self.file_modified_time,
            file_path,
            markdown_content: self.markdown_content,
            conversion_type,
            status,
            error_message: self.error_message,
            source: self.source,
            source_url: self.source_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "id, file_name, file_type, file_size, file_created_at, \
     file_modified_time, file_path, markdown_content, conversion_type, status, \
     error_message, source, source_url, created_at, updated_at";

impl DocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get(&self, id: i32) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    /// Case-insensitive path lookup; paths on case-insensitive filesystems
    /// may reach us with differing drive/directory casing.
    pub async fn lookup_by_path(&self, path: &NormalizedPathKey) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE lower(file_path) = lower($1)"
        ))
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    /// Record a successful conversion, inserting or replacing the row for
    /// this path. Clears any previous error.
    pub async fn mark_completed(
        &self,
        meta: &FileMetadata,
        content: &str,
        conversion_type: ConversionType,
        source: &str,
        source_url: Option<&str>,
    ) -> Result<Document> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            INSERT INTO documents (
                file_name, file_type, file_size, file_created_at,
                file_modified_time, file_path, markdown_content,
                conversion_type, status, error_message, source, source_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'completed', NULL, $9, $10)
            ON CONFLICT (file_path) DO UPDATE SET
                file_name = EXCLUDED.file_name,
                file_type = EXCLUDED.file_type,
                file_size = EXCLUDED.file_size,
                file_created_at = EXCLUDED.file_created_at,
                file_modified_time = EXCLUDED.file_modified_time,
                markdown_content = EXCLUDED.markdown_content,
                conversion_type = EXCLUDED.conversion_type,
                status = 'completed',
                error_message = NULL,
                source = EXCLUDED.source,
                source_url = EXCLUDED.source_url,
                updated_at = NOW()
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(&meta.file_name)
        .bind(&meta.file_type)
        .bind(meta.file_size)
        .bind(meta.file_created_at)
        .bind(meta.file_modified_time)
        .bind(meta.file_path.as_str())
        .bind(content)
        .bind(conversion_type.as_i16())
        .bind(source)
        .bind(source_url)
        .fetch_one(&self.pool)
        .await?;
        row.into_document()
    }

    /// Record a failed conversion. An existing row keeps its previous
    /// content and mtime so the next scan re-attempts the file; only the
    /// failure fields are replaced.
    pub async fn mark_failed(
        &self,
        meta: &FileMetadata,
        error: &str,
        source: &str,
        source_url: Option<&str>,
    ) -> Result<Document> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            INSERT INTO documents (
                file_name, file_type, file_size, file_created_at,
                file_modified_time, file_path, status, error_message,
                source, source_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'failed', $7, $8, $9)
            ON CONFLICT (file_path) DO UPDATE SET
                status = 'failed',
                error_message = EXCLUDED.error_message,
                source = EXCLUDED.source,
                source_url = EXCLUDED.source_url,
                updated_at = NOW()
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(&meta.file_name)
        .bind(&meta.file_type)
        .bind(meta.file_size)
        .bind(meta.file_created_at)
        .bind(meta.file_modified_time)
        .bind(meta.file_path.as_str())
        .bind(error)
        .bind(source)
        .bind(source_url)
        .fetch_one(&self.pool)
        .await?;
        row.into_document()
    }

    /// Flip a retried document back to completed in place.
    pub async fn complete_retry(
        &self,
        id: i32,
        content: &str,
        conversion_type: ConversionType,
    ) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            UPDATE documents SET
                markdown_content = $2,
                conversion_type = $3,
                status = 'completed',
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(content)
        .bind(conversion_type.as_i16())
        .fetch_optional(&self.pool)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    /// Record another failure on a retried document.
    pub async fn fail_retry(&self, id: i32, error: &str) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            UPDATE documents SET
                status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DocumentRow::into_document).transpose()
    }

    pub async fn bulk_delete(&self, ids: &[i32]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM documents WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn distinct_file_types(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT file_type FROM documents \
             WHERE file_type <> '' ORDER BY file_type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// Documents whose path is no longer under `folder`, paged and ordered
    /// by path. Returns the page plus the total match count.
    pub async fn find_orphans(
        &self,
        folder: &NormalizedPathKey,
        file_type: Option<&str>,
        path_keyword: Option<&str>,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Document>, i64)> {
        let prefix = format!("{}/%", folder.as_str().trim_end_matches('/'));
        let keyword = path_keyword.map(|k| format!("%{k}%"));
        let offset = (page.max(1) - 1) * per_page;

        let filter = "NOT (file_path ILIKE $1) \
             AND ($2::text IS NULL OR file_type = $2) \
             AND ($3::text IS NULL OR file_path ILIKE $3)";

        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM documents WHERE {filter}"
        ))
        .bind(&prefix)
        .bind(file_type)
        .bind(keyword.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE {filter} \
             ORDER BY file_path ASC LIMIT $4 OFFSET $5"
        ))
        .bind(&prefix)
        .bind(file_type)
        .bind(keyword.as_deref())
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let documents = rows
            .into_iter()
            .map(DocumentRow::into_document)
            .collect::<Result<Vec<_>>>()?;
        Ok((documents, total))
    }
}

// Store tests need a live Postgres with the migrations applied; they are
// ignored by default. Run with DATABASE_URL set and `cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn store() -> DocumentStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL for store tests");
        let pool = PgPool::connect(&url).await.expect("connect");
        DocumentStore::new(pool)
    }

    fn meta(path: &str) -> FileMetadata {
        FileMetadata {
            file_name: path.rsplit('/').next().unwrap().to_string(),
            file_type: "md".to_string(),
            file_size: 10,
            file_created_at: Some(Utc::now()),
            file_modified_time: Utc::now(),
            file_path: NormalizedPathKey::new(path.to_string()).unwrap(),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn upsert_is_idempotent_per_path() {
        let store = store().await;
        let meta = meta("/markbase-test/upsert/a.md");

        let first = store
            .mark_completed(&meta, "# a", ConversionType::Direct, "local_fs", None)
            .await
            .unwrap();
        let second = store
            .mark_completed(&meta, "# a v2", ConversionType::Direct, "local_fs", None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.markdown_content.as_deref(), Some("# a v2"));
        assert_eq!(second.status, DocumentStatus::Completed);

        store.bulk_delete(&[first.id]).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn failure_then_success_clears_error() {
        let store = store().await;
        let meta = meta("/markbase-test/upsert/b.md");

        let failed = store
            .mark_failed(&meta, "boom", "local_fs", None)
            .await
            .unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        let fixed = store
            .mark_completed(&meta, "# b", ConversionType::Direct, "local_fs", None)
            .await
            .unwrap();
        assert_eq!(fixed.id, failed.id);
        assert_eq!(fixed.status, DocumentStatus::Completed);
        assert!(fixed.error_message.is_none());

        store.bulk_delete(&[fixed.id]).await.unwrap();
    }
}

use std::path::Path as FsPath;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use markbase_core::fs::normalize_path;
use markbase_core::IndexError;
use markbase_model::DocumentStatus;

use crate::errors::{AppError, AppResult};
use crate::AppState;

/// Re-run conversion for a failed document. Rejects documents in any other
/// status with 409 so completed rows cannot be clobbered.
pub async fn retry_document_handler(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let document = state.ingestor.retry_document(id).await.map_err(|e| match e {
        IndexError::InvalidRequest(msg) => AppError::conflict(msg),
        other => AppError::from(other),
    })?;

    let ok = document.status == DocumentStatus::Completed;
    let message = if ok {
        format!("Document {id} reconverted successfully")
    } else {
        format!(
            "Retry failed: {}",
            document.error_message.as_deref().unwrap_or("unknown error")
        )
    };

    Ok(Json(json!({
        "status": "success",
        "ok": ok,
        "message": message,
    })))
}

#[derive(Debug, Deserialize)]
pub struct OrphanQuery {
    pub folder: String,
    pub file_type: Option<String>,
    pub path_keyword: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

/// Paged list of documents whose path is no longer under the given folder.
pub async fn list_orphans_handler(
    State(state): State<AppState>,
    Query(query): Query<OrphanQuery>,
) -> AppResult<Json<Value>> {
    if query.folder.trim().is_empty() {
        return Err(AppError::bad_request("folder is required"));
    }
    let folder = normalize_path(FsPath::new(&query.folder))?;
    let per_page = query.per_page.clamp(1, 200);

    let (orphans, total) = state
        .ingestor
        .documents()
        .find_orphans(
            &folder,
            query.file_type.as_deref().filter(|t| !t.is_empty()),
            query.path_keyword.as_deref().filter(|k| !k.is_empty()),
            query.page,
            per_page,
        )
        .await?;

    Ok(Json(json!({
        "status": "success",
        "orphans": orphans,
        "total": total,
        "page": query.page.max(1),
        "per_page": per_page,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<i32>,
}

pub async fn delete_documents_handler(
    State(state): State<AppState>,
    Json(request): Json<DeleteRequest>,
) -> AppResult<Json<Value>> {
    if request.ids.is_empty() {
        return Err(AppError::bad_request("no document ids given"));
    }

    let deleted = state.ingestor.documents().bulk_delete(&request.ids).await?;
    info!("Deleted {deleted} document(s)");

    Ok(Json(json!({
        "status": "success",
        "deleted": deleted,
    })))
}

/// Distinct file types present in the index, for filter dropdowns.
pub async fn file_types_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let file_types = state.ingestor.documents().distinct_file_types().await?;
    Ok(Json(json!({
        "status": "success",
        "file_types": file_types,
    })))
}

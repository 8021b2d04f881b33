use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::Stream;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

use markbase_model::{IngestRequest, SessionId};

use crate::errors::{AppError, AppResult};
use crate::AppState;

/// Start a folder ingestion session. Events are served separately on the
/// session's SSE endpoint, which replays history for late subscribers.
pub async fn start_ingest_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> AppResult<Json<Value>> {
    info!(
        "Ingest request: path={}, recursive={}, from={:?}, to={:?}, types={:?}",
        request.folder_path,
        request.recursive,
        request.date_from,
        request.date_to,
        request.file_types
    );

    // The returned receiver is dropped here; SSE clients attach through
    // the events endpoint and get the buffered history.
    let (session_id, _events) = state.ingestor.start(request).await?;

    Ok(Json(json!({
        "status": "success",
        "session_id": session_id,
    })))
}

/// SSE stream of one session's events: buffered history first, then live
/// events, closing after the terminal stage.
pub async fn ingest_events_sse_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let id = SessionId::from(session_id);
    let session = state
        .ingestor
        .sessions()
        .get(&id)
        .ok_or_else(|| AppError::not_found(format!("session {id} not found")))?;

    info!("SSE subscriber attached to session {id}");
    let receiver = session.subscribe().await;
    let stream = ReceiverStream::new(receiver)
        .map(|event| Event::default().event("ingest").json_data(&event));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    ))
}

pub async fn cancel_ingest_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = SessionId::from(session_id);
    let cancelled = state.ingestor.sessions().request_cancel(&id);

    Ok(Json(json!({
        "status": "success",
        "cancelled": cancelled,
    })))
}

pub async fn cancel_all_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let cancelled = state.ingestor.sessions().cancel_all();
    info!("Cancelled {} active session(s)", cancelled.len());

    Ok(Json(json!({
        "status": "success",
        "cancelled": cancelled,
    })))
}

pub async fn list_sessions_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let sessions = state.ingestor.sessions().active_ids();
    Ok(Json(json!({
        "status": "success",
        "sessions": sessions,
    })))
}

/// Diagnostic snapshot: parameters, flags, and the buffered event history.
/// Clients that lost their stream reconcile through this endpoint.
pub async fn session_debug_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = SessionId::from(session_id);
    let session = state
        .ingestor
        .sessions()
        .get(&id)
        .ok_or_else(|| AppError::not_found(format!("session {id} not found")))?;

    let snapshot = session.snapshot().await;
    Ok(Json(json!({
        "status": "success",
        "session": snapshot,
    })))
}

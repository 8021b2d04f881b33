use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    document_handlers::{
        delete_documents_handler, file_types_handler, list_orphans_handler,
        retry_document_handler,
    },
    health_handler,
    ingest_handlers::{
        cancel_all_handler, cancel_ingest_handler, ingest_events_sse_handler,
        list_sessions_handler, session_debug_handler, start_ingest_handler,
    },
    AppState,
};

/// All v1 API routes.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/ingest", post(start_ingest_handler))
        .route("/api/v1/ingest/cancel-all", post(cancel_all_handler))
        .route("/api/v1/ingest/sessions", get(list_sessions_handler))
        .route("/api/v1/ingest/{session_id}", get(session_debug_handler))
        .route(
            "/api/v1/ingest/{session_id}/events",
            get(ingest_events_sse_handler),
        )
        .route(
            "/api/v1/ingest/{session_id}/cancel",
            post(cancel_ingest_handler),
        )
        .route("/api/v1/documents/{id}/retry", post(retry_document_handler))
        .route("/api/v1/documents/orphans", get(list_orphans_handler))
        .route("/api/v1/documents/delete", post(delete_documents_handler))
        .route("/api/v1/documents/file-types", get(file_types_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use markbase_core::{IngestConfig, Ingestor};

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        // connect_lazy never touches the database.
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/markbase").unwrap();
        let ingestor = Arc::new(Ingestor::new(Arc::new(IngestConfig::default()), pool));
        let _app = create_app(AppState { ingestor });
    }
}

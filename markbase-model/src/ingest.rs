use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of one ingestion session (random 128-bit token).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Parameters of one ingestion run, echoed back on session snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub folder_path: String,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Inclusive lower bound on file mtime. When absent, the persisted
    /// cursor for this scope is used instead.
    #[serde(default)]
    pub date_from: Option<String>,
    /// Inclusive upper bound on file mtime; date-only values mean end of day.
    #[serde(default)]
    pub date_to: Option<String>,
    /// Extension allow-list; empty means every extension the converter
    /// registry knows.
    #[serde(default)]
    pub file_types: Option<Vec<String>>,
}

fn default_recursive() -> bool {
    true
}

/// Per-(source, scope) ingestion history row backing resumable runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStateRecord {
    pub id: i32,
    pub source: String,
    /// For local filesystem scopes: the normalized absolute folder path.
    pub scope_key: String,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_ended_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    /// Watermark used as the implicit mtime lower bound of the next run.
    /// Advanced only after a successful (non-cancelled) completion.
    pub cursor_updated_at: Option<DateTime<Utc>>,
    pub total_files: i64,
    pub processed: i64,
    pub skipped: i64,
    pub errors: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_opaque_and_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn ingest_request_defaults_recursive() {
        let req: IngestRequest =
            serde_json::from_str(r#"{"folder_path": "/data/docs"}"#).unwrap();
        assert!(req.recursive);
        assert!(req.date_from.is_none());
        assert!(req.file_types.is_none());
    }
}

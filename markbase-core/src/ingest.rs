use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use sqlx::PgPool;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use markbase_model::{
    Document, DocumentStatus, EventLevel, IngestEvent, IngestRequest, IngestStage, IngestSummary,
    NormalizedPathKey, SessionId,
};

use crate::config::IngestConfig;
use crate::convert::ConverterRegistry;
use crate::error::{IndexError, Result};
use crate::fs::{normalize_path, probe_file, FileMetadata, FolderScanner};
use crate::session::{IngestSession, SessionRegistry};
use crate::store::{DocumentStore, IngestStateStore};

/// The ingestion coordinator: wires the scanner, probe, converter registry,
/// stores, and session registry together and runs each session on its own
/// task, streaming progress events to subscribers.
#[derive(Clone)]
pub struct Ingestor {
    config: Arc<IngestConfig>,
    registry: Arc<ConverterRegistry>,
    documents: DocumentStore,
    states: IngestStateStore,
    sessions: Arc<SessionRegistry>,
    // Pre-normalized downloads root for source labeling.
    downloads_root: Option<NormalizedPathKey>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor").finish()
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    processed: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
}

impl RunCounters {
    fn summary(&self, total: usize) -> IngestSummary {
        IngestSummary {
            total_files: total,
            processed_files: self.processed.load(Ordering::Relaxed) as usize,
            skipped_files: self.skipped.load(Ordering::Relaxed) as usize,
            error_files: self.errors.load(Ordering::Relaxed) as usize,
        }
    }
}

impl Ingestor {
    pub fn new(config: Arc<IngestConfig>, pool: PgPool) -> Self {
        let registry = Arc::new(ConverterRegistry::from_config(&config));
        let sessions = Arc::new(SessionRegistry::new(
            config.session_history_capacity,
            std::time::Duration::from_secs(config.session_grace_seconds),
        ));
        let downloads_root = config
            .downloads_root
            .as_deref()
            .and_then(|root| normalize_path(root).ok());

        Self {
            config,
            registry,
            documents: DocumentStore::new(pool.clone()),
            states: IngestStateStore::new(pool),
            sessions,
            downloads_root,
        }
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn config(&self) -> &Arc<IngestConfig> {
        &self.config
    }

    /// Start an ingestion session for a folder. Validates the request,
    /// spawns the run on its own task, and returns the session id plus the
    /// subscribed event stream.
    pub async fn start(
        &self,
        request: IngestRequest,
    ) -> Result<(SessionId, mpsc::Receiver<IngestEvent>)> {
        let folder = PathBuf::from(&request.folder_path);
        if !folder.is_dir() {
            return Err(IndexError::InvalidRequest(format!(
                "not a folder: {}",
                request.folder_path
            )));
        }

        // Reject malformed date bounds before any state is touched.
        if let Some(raw) = request.date_from.as_deref() {
            parse_date_bound(raw, false)
                .map_err(IndexError::InvalidRequest)?;
        }
        if let Some(raw) = request.date_to.as_deref() {
            parse_date_bound(raw, true)
                .map_err(IndexError::InvalidRequest)?;
        }

        let scope = normalize_path(&folder)?;
        let session = self
            .sessions
            .start_session(scope.as_str().to_string(), request);
        let receiver = session.subscribe().await;

        let ingestor = self.clone();
        let run = session.clone();
        tokio::spawn(async move {
            ingestor.run_session(run).await;
        });

        Ok((session.id.clone(), receiver))
    }

    async fn run_session(self, session: Arc<IngestSession>) {
        let started_at = Utc::now();
        let counters = Arc::new(RunCounters::default());

        let state = match self
            .states
            .get_or_create(&self.config.source_local_fs, &session.folder_path)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                error!("Could not load ingest state: {e}");
                session
                    .emit(IngestEvent::new(
                        EventLevel::Critical,
                        IngestStage::CriticalError,
                        session.id.clone(),
                        format!("A critical error occurred: {e}"),
                    ))
                    .await;
                self.sessions.clone().end_session(&session.id);
                return;
            }
        };

        if let Err(e) = self.states.begin_run(state.id, started_at).await {
            warn!("Could not record run start: {e}");
        }

        let cursor = state.cursor_updated_at;
        let mut total_files = 0usize;
        let outcome = self
            .run_loop(&session, state.id, started_at, cursor, &counters, &mut total_files)
            .await;

        if let Err(e) = outcome {
            let message = format!("A critical error occurred: {e}");
            error!("Ingestion session {} failed: {e}", session.id);
            if let Err(db_err) = self.states.record_error(state.id, &message).await {
                warn!("Could not persist ingest error: {db_err}");
            }
            session
                .emit(IngestEvent::new(
                    EventLevel::Critical,
                    IngestStage::CriticalError,
                    session.id.clone(),
                    message,
                ))
                .await;
        }

        // Finalize regardless of how the run ended.
        let summary = counters.summary(total_files);
        if let Err(e) = self
            .states
            .finish_run(
                state.id,
                summary.processed_files as i64,
                summary.skipped_files as i64,
                summary.error_files as i64,
                Utc::now(),
            )
            .await
        {
            warn!("Could not persist final counters: {e}");
        }
        self.sessions.clone().end_session(&session.id);
    }

    async fn run_loop(
        &self,
        session: &Arc<IngestSession>,
        state_id: i32,
        started_at: DateTime<Utc>,
        cursor: Option<DateTime<Utc>>,
        counters: &Arc<RunCounters>,
        total_out: &mut usize,
    ) -> Result<()> {
        let request = &session.params;

        // Explicit lower bound wins; otherwise resume from the cursor.
        let date_from = match request.date_from.as_deref() {
            Some(raw) => Some(
                parse_date_bound(raw, false).map_err(IndexError::InvalidRequest)?,
            ),
            None => cursor,
        };
        let date_to = request
            .date_to
            .as_deref()
            .map(|raw| parse_date_bound(raw, true).map_err(IndexError::InvalidRequest))
            .transpose()?;

        session
            .emit(self.event(
                session,
                EventLevel::Info,
                IngestStage::ScanStart,
                format!("Starting folder scan: {}", session.folder_path),
            ))
            .await;

        // An unspecified or empty allow-list means every extension the
        // registry knows.
        let mut allowed: Vec<String> = request
            .file_types
            .iter()
            .flatten()
            .map(|t| t.trim().trim_start_matches('.').to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if allowed.is_empty() {
            allowed = self.registry.known_extensions();
        }
        let scanner = FolderScanner::new(
            request.recursive,
            allowed,
            self.config.excluded_dirs.iter().cloned(),
            self.config.excluded_file_extensions.iter().cloned(),
        )
        .with_mtime_window(date_from, date_to);

        let root = PathBuf::from(&session.folder_path);
        let files = tokio::task::spawn_blocking(move || scanner.scan(&root))
            .await
            .map_err(|e| IndexError::Internal(format!("scan task failed: {e}")))??;

        let total = files.len();
        *total_out = total;
        if let Err(e) = self.states.set_total_files(state_id, total as i64).await {
            warn!("Could not persist total_files: {e}");
        }
        session
            .emit(
                self.event(
                    session,
                    EventLevel::Info,
                    IngestStage::ScanComplete,
                    format!("Scan found {total} matching files."),
                )
                .with_total_files(total),
            )
            .await;

        if total == 0 {
            session
                .emit(
                    self.event(
                        session,
                        EventLevel::Info,
                        IngestStage::Done,
                        "No files to process.",
                    )
                    .with_summary(counters.summary(0)),
                )
                .await;
            self.states.advance_cursor(state_id, started_at).await?;
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for (index, path) in files.into_iter().enumerate() {
            // Cooperative cancellation: polled before each dispatch;
            // in-flight conversions are allowed to complete.
            if session.is_cancelled() {
                session
                    .emit(self.event(
                        session,
                        EventLevel::Warning,
                        IngestStage::Cancelled,
                        "Ingestion cancelled by user request.",
                    ))
                    .await;
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");
            let ingestor = self.clone();
            let session = session.clone();
            let counters = counters.clone();
            tasks.spawn(async move {
                let _permit = permit;
                ingestor
                    .process_file(&session, &counters, index, total, path)
                    .await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("File task panicked: {e}");
            }
        }

        let summary = counters.summary(total);
        if session.is_cancelled() {
            session
                .emit(
                    self.event(
                        session,
                        EventLevel::Warning,
                        IngestStage::Done,
                        "Processing stopped before completion.",
                    )
                    .with_summary(summary),
                )
                .await;
        } else {
            self.states.advance_cursor(state_id, started_at).await?;
            session
                .emit(
                    self.event(
                        session,
                        EventLevel::Info,
                        IngestStage::Done,
                        "All files processed.",
                    )
                    .with_summary(summary),
                )
                .await;
        }

        Ok(())
    }

    fn event(
        &self,
        session: &IngestSession,
        level: EventLevel,
        stage: IngestStage,
        message: impl Into<String>,
    ) -> IngestEvent {
        IngestEvent::new(level, stage, session.id.clone(), message)
    }

    /// Process one file end to end: probe, dedup, convert, persist, emit.
    async fn process_file(
        &self,
        session: &Arc<IngestSession>,
        counters: &RunCounters,
        index: usize,
        total: usize,
        path: PathBuf,
    ) {
        let meta = match probe_file(&path) {
            Ok(meta) => meta,
            Err(_) => {
                session
                    .emit(
                        self.event(
                            session,
                            EventLevel::Warning,
                            IngestStage::FileSkip,
                            format!("Could not get metadata for {}, skipping.", path.display()),
                        )
                        .with_reason("metadata"),
                    )
                    .await;
                return;
            }
        };

        let progress = (((index + 1) * 100) / total) as u8;
        session
            .emit(
                self.event(
                    session,
                    EventLevel::Info,
                    IngestStage::FileProcessing,
                    format!(
                        "Processing file {}/{}: {}",
                        index + 1,
                        total,
                        meta.file_name
                    ),
                )
                .with_progress(progress, meta.file_name.clone()),
            )
            .await;

        let source_url = read_sidecar_source_url(&path).await;
        let source = derive_source(
            &meta.file_path,
            self.downloads_root.as_ref(),
            &self.config.download_source_prefix,
            &self.config.source_local_fs,
        );

        let existing = match self.documents.lookup_by_path(&meta.file_path).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Lookup failed for {}: {e}", meta.file_path);
                None
            }
        };
        if let Some(existing) = &existing {
            if is_unchanged(existing, &meta) {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                session
                    .emit(
                        self.event(
                            session,
                            EventLevel::Info,
                            IngestStage::FileSkip,
                            format!("Skipping unchanged file: {}", path.display()),
                        )
                        .with_reason("unchanged"),
                    )
                    .await;
                return;
            }
        }

        let result = self.registry.convert(&path, &meta.file_type).await;

        if result.success {
            let content = result.content.as_deref().unwrap_or_default();
            let tag = result
                .conversion_type
                .expect("successful conversion carries a tag");
            match self
                .documents
                .mark_completed(&meta, content, tag, &source, source_url.as_deref())
                .await
            {
                Ok(_) => {
                    counters.processed.fetch_add(1, Ordering::Relaxed);
                    session
                        .emit(self.event(
                            session,
                            EventLevel::Info,
                            IngestStage::FileSuccess,
                            format!("Successfully processed: {}", path.display()),
                        ))
                        .await;
                }
                Err(e) => {
                    // Per-file DB failures do not stop the run.
                    error!("Persist failed for {}: {e}", meta.file_path);
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                    session
                        .emit(self.event(
                            session,
                            EventLevel::Error,
                            IngestStage::FileError,
                            format!(
                                "Failed to store converted file: {}. Reason: {e}",
                                path.display()
                            ),
                        ))
                        .await;
                }
            }
        } else {
            let message = result
                .error
                .unwrap_or_else(|| "conversion failed".to_string());
            counters.errors.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self
                .documents
                .mark_failed(&meta, &message, &source, source_url.as_deref())
                .await
            {
                error!("Persist of failure failed for {}: {e}", meta.file_path);
            }
            session
                .emit(self.event(
                    session,
                    EventLevel::Error,
                    IngestStage::FileError,
                    format!(
                        "Failed to convert file: {}. Reason: {message}",
                        path.display()
                    ),
                ))
                .await;
        }
    }

    /// Re-run the converter for a currently-failed document. Rejects any
    /// other status so completed rows cannot be clobbered by stale retries.
    pub async fn retry_document(&self, id: i32) -> Result<Document> {
        let document = self
            .documents
            .get(id)
            .await?
            .ok_or_else(|| IndexError::NotFound(format!("document {id}")))?;
        if document.status != DocumentStatus::Failed {
            return Err(IndexError::InvalidRequest(format!(
                "document {id} is not in failed status"
            )));
        }

        let path = PathBuf::from(document.file_path.as_str());
        let meta = match probe_file(&path) {
            Ok(meta) => meta,
            Err(e) => {
                // The file may be gone; record that on the row.
                let message = format!("Retry failed: {e}");
                return self
                    .documents
                    .fail_retry(id, &message)
                    .await?
                    .ok_or_else(|| IndexError::NotFound(format!("document {id}")));
            }
        };

        info!("Retrying conversion for document {id} ({})", meta.file_path);
        let result = self.registry.convert(&path, &meta.file_type).await;

        let updated = if result.success {
            let content = result.content.as_deref().unwrap_or_default();
            let tag = result
                .conversion_type
                .expect("successful conversion carries a tag");
            self.documents.complete_retry(id, content, tag).await?
        } else {
            let message = result
                .error
                .unwrap_or_else(|| "conversion failed".to_string());
            self.documents.fail_retry(id, &message).await?
        };

        updated.ok_or_else(|| IndexError::NotFound(format!("document {id}")))
    }
}

/// Unchanged means: same mtime (at the database's microsecond precision)
/// and a completed prior conversion. Failed rows are always re-attempted.
fn is_unchanged(existing: &Document, meta: &FileMetadata) -> bool {
    let same_mtime = existing
        .file_modified_time
        .map(|stored| stored.timestamp_micros() == meta.file_modified_time.timestamp_micros())
        .unwrap_or(false);
    same_mtime && existing.status == DocumentStatus::Completed
}

/// Optional `<path>.meta.json` sidecar carrying a `source_url`. Missing or
/// malformed sidecars are ignored.
async fn read_sidecar_source_url(path: &Path) -> Option<String> {
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".meta.json");
    let raw = tokio::fs::read_to_string(Path::new(&sidecar)).await.ok()?;
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => value
            .get("source_url")
            .and_then(|u| u.as_str())
            .map(str::to_string),
        Err(e) => {
            warn!("Could not parse sidecar for {}: {e}", path.display());
            None
        }
    }
}

/// Files under the downloads root inherit a label from their immediate
/// child directory; everything else is plain local filesystem provenance.
fn derive_source(
    file_path: &NormalizedPathKey,
    downloads_root: Option<&NormalizedPathKey>,
    prefix: &str,
    default_source: &str,
) -> String {
    let Some(root) = downloads_root else {
        return default_source.to_string();
    };
    let root_prefix = format!("{}/", root.as_str().trim_end_matches('/'));
    let Some(relative) = file_path.as_str().strip_prefix(&root_prefix) else {
        return default_source.to_string();
    };
    match relative.split_once('/') {
        Some((account, _)) if !account.is_empty() => format!("{prefix}{account}"),
        _ => default_source.to_string(),
    }
}

/// Parse a date bound: date-only values mean start of day for lower bounds
/// and end of day for upper bounds; full timestamps are RFC 3339.
fn parse_date_bound(raw: &str, end_of_day: bool) -> std::result::Result<DateTime<Utc>, String> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let time = if end_of_day {
            NaiveTime::from_hms_milli_opt(23, 59, 59, 999).expect("valid time")
        } else {
            NaiveTime::MIN
        };
        return Ok(Utc.from_utc_datetime(&date.and_time(time)));
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("invalid date '{trimmed}': expected YYYY-MM-DD or RFC 3339"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> NormalizedPathKey {
        NormalizedPathKey::new(path.to_string()).unwrap()
    }

    #[test]
    fn date_only_bounds_expand_to_day_edges() {
        let from = parse_date_bound("2026-03-01", false).unwrap();
        assert_eq!(from.to_rfc3339(), "2026-03-01T00:00:00+00:00");

        let to = parse_date_bound("2026-03-01", true).unwrap();
        assert_eq!(to.to_rfc3339(), "2026-03-01T23:59:59.999+00:00");
    }

    #[test]
    fn rfc3339_bounds_pass_through() {
        let bound = parse_date_bound("2026-03-01T12:30:00+08:00", false).unwrap();
        assert_eq!(bound.to_rfc3339(), "2026-03-01T04:30:00+00:00");
    }

    #[test]
    fn invalid_dates_are_rejected() {
        assert!(parse_date_bound("yesterday", false).is_err());
        assert!(parse_date_bound("2026-13-01", false).is_err());
    }

    #[test]
    fn source_label_comes_from_downloads_subdirectory() {
        let root = key("/data/downloads");
        let labeled = derive_source(
            &key("/data/downloads/TechWeekly/article.html"),
            Some(&root),
            "公众号_",
            "local_fs",
        );
        assert_eq!(labeled, "公众号_TechWeekly");
    }

    #[test]
    fn files_directly_in_downloads_root_stay_local() {
        let root = key("/data/downloads");
        let plain = derive_source(
            &key("/data/downloads/loose.html"),
            Some(&root),
            "公众号_",
            "local_fs",
        );
        assert_eq!(plain, "local_fs");
    }

    #[test]
    fn files_outside_downloads_root_stay_local() {
        let root = key("/data/downloads");
        assert_eq!(
            derive_source(&key("/data/docs/a.md"), Some(&root), "公众号_", "local_fs"),
            "local_fs"
        );
        assert_eq!(
            derive_source(&key("/data/docs/a.md"), None, "公众号_", "local_fs"),
            "local_fs"
        );
    }

    #[test]
    fn unchanged_requires_completed_status() {
        let mtime = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let meta = FileMetadata {
            file_name: "a.md".into(),
            file_type: "md".into(),
            file_size: 1,
            file_created_at: None,
            file_modified_time: mtime,
            file_path: key("/data/a.md"),
        };
        let mut doc = Document {
            id: 1,
            file_name: "a.md".into(),
            file_type: "md".into(),
            file_size: 1,
            file_created_at: None,
            file_modified_time: Some(mtime),
            file_path: key("/data/a.md"),
            markdown_content: Some("# a".into()),
            conversion_type: Some(markbase_model::ConversionType::Direct),
            status: DocumentStatus::Completed,
            error_message: None,
            source: "local_fs".into(),
            source_url: None,
            created_at: mtime,
            updated_at: mtime,
        };
        assert!(is_unchanged(&doc, &meta));

        doc.status = DocumentStatus::Failed;
        assert!(!is_unchanged(&doc, &meta));

        doc.status = DocumentStatus::Completed;
        doc.file_modified_time = Some(mtime + chrono::Duration::seconds(1));
        assert!(!is_unchanged(&doc, &meta));
    }

    #[tokio::test]
    async fn sidecar_url_is_read_and_malformed_sidecars_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("article.html");
        std::fs::write(&file, "<p>x</p>").unwrap();

        assert_eq!(read_sidecar_source_url(&file).await, None);

        std::fs::write(
            dir.path().join("article.html.meta.json"),
            r#"{"source_url": "https://example.com/a"}"#,
        )
        .unwrap();
        assert_eq!(
            read_sidecar_source_url(&file).await.as_deref(),
            Some("https://example.com/a")
        );

        std::fs::write(dir.path().join("article.html.meta.json"), "{broken").unwrap();
        assert_eq!(read_sidecar_source_url(&file).await, None);
    }
}

use serde::{Deserialize, Serialize};

use crate::ingest::SessionId;

/// Severity attached to every ingestion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
    Critical,
}

/// Stage markers of an ingestion session, in protocol order.
///
/// Within one session the emitted sequence is
/// `scan_start < scan_complete < (file_* events)* < cancelled? <
/// (done | critical_error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    ScanStart,
    ScanComplete,
    FileProcessing,
    FileSkip,
    FileSuccess,
    FileError,
    Cancelled,
    Done,
    CriticalError,
}

impl IngestStage {
    /// Terminal stages close the event stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::CriticalError)
    }
}

/// Counters reported with the terminal `done` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub total_files: usize,
    pub processed_files: usize,
    pub skipped_files: usize,
    pub error_files: usize,
}

/// One event on a session's progress stream.
///
/// Serialized as a single flat JSON object per the SSE line protocol;
/// stage-specific fields are omitted when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    pub level: EventLevel,
    pub message: String,
    pub stage: IngestStage,
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
    /// Percentage 0..=100, only on `file_processing`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    /// Skip reason, only on `file_skip` (`unchanged`, `metadata`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<IngestSummary>,
}

impl IngestEvent {
    pub fn new(
        level: EventLevel,
        stage: IngestStage,
        session_id: SessionId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            stage,
            session_id,
            total_files: None,
            progress: None,
            current_file: None,
            reason: None,
            summary: None,
        }
    }

    pub fn with_total_files(mut self, total: usize) -> Self {
        self.total_files = Some(total);
        self
    }

    pub fn with_progress(mut self, progress: u8, current_file: impl Into<String>) -> Self {
        self.progress = Some(progress);
        self.current_file = Some(current_file.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_summary(mut self, summary: IngestSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Whether this event may be dropped for a slow subscriber. Terminal
    /// events and anything above `info` must always be delivered.
    pub fn is_droppable(&self) -> bool {
        self.level == EventLevel::Info && !self.stage.is_terminal()
    }
}

//! Core data model definitions shared across Markbase crates.

pub mod document;
pub mod events;
pub mod ingest;
pub mod path_key;

pub use document::{ConversionType, Document, DocumentStatus};
pub use events::{EventLevel, IngestEvent, IngestStage, IngestSummary};
pub use ingest::{IngestRequest, IngestStateRecord, SessionId};
pub use path_key::{NormalizedPathKey, PathKeyError};

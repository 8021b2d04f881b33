pub mod code;
pub mod drawio;
mod exec;
pub mod hash;
pub mod image;
pub mod native;
pub mod registry;
pub mod structured;
pub mod text;
pub mod video;
pub mod xmind;

use std::path::Path;

use async_trait::async_trait;

use markbase_model::ConversionType;

pub use registry::ConverterRegistry;

/// Outcome of one conversion attempt. Failures are values, never errors:
/// handlers must not raise to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub success: bool,
    pub content: Option<String>,
    pub conversion_type: Option<ConversionType>,
    pub error: Option<String>,
    pub file_path: String,
    pub file_type: String,
}

impl ConversionResult {
    /// Successful conversion; content is sanitized of NUL bytes, which
    /// Postgres text columns reject.
    pub fn ok(
        path: &Path,
        file_type: &str,
        content: String,
        conversion_type: ConversionType,
    ) -> Self {
        Self {
            success: true,
            content: Some(content.replace('\u{0}', "")),
            conversion_type: Some(conversion_type),
            error: None,
            file_path: path.display().to_string(),
            file_type: file_type.to_string(),
        }
    }

    pub fn failed(path: &Path, file_type: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            conversion_type: None,
            error: Some(error.into()),
            file_path: path.display().to_string(),
            file_type: file_type.to_string(),
        }
    }
}

/// A converter handler for one category of file types.
///
/// Handlers are pure with respect to their inputs (aside from provider
/// calls), hold no mutable state, and are safe to call concurrently.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn handle(&self, path: &Path, file_type: &str) -> ConversionResult;
}

/// Title heading used by the text/code/image handlers.
pub(crate) fn title_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

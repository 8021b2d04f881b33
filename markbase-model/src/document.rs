use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path_key::NormalizedPathKey;

/// How a document's markdown content was produced.
///
/// Discriminants are persisted in the `conversion_type` column and are part
/// of the storage contract: new values append, existing values never
/// renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ConversionType {
    /// Native markdown stored verbatim.
    Direct = 0,
    /// Plain text wrapped with a title heading.
    TextToMd = 1,
    /// Source code wrapped in a fenced block.
    CodeToMd = 2,
    /// Office document / PDF converted by the structured converter.
    StructuredToMd = 3,
    /// XMind mind map rendered as an outline.
    XmindToMd = 4,
    /// Image OCR or caption output.
    ImageToMd = 5,
    /// Video container metadata front matter.
    VideoMetadata = 6,
    /// HTML converted to markdown.
    HtmlToMd = 7,
    /// Draw.io diagram rendered as an outline.
    DrawioToMd = 8,
}

impl ConversionType {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Direct),
            1 => Some(Self::TextToMd),
            2 => Some(Self::CodeToMd),
            3 => Some(Self::StructuredToMd),
            4 => Some(Self::XmindToMd),
            5 => Some(Self::ImageToMd),
            6 => Some(Self::VideoMetadata),
            7 => Some(Self::HtmlToMd),
            8 => Some(Self::DrawioToMd),
            _ => None,
        }
    }
}

/// Lifecycle state of a document row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A converted document as stored in the `documents` table.
///
/// Identity is the normalized `file_path`; at most one row exists per path
/// (case-insensitive). `status = completed` implies `markdown_content` and
/// `conversion_type` are set and `error_message` is null; `status = failed`
/// implies `error_message` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i32,
    pub file_name: String,
    /// Lowercased extension without the leading dot; empty when absent.
    pub file_type: String,
    pub file_size: i64,
    /// Filesystem birth time where the platform reports it, otherwise ctime.
    pub file_created_at: Option<DateTime<Utc>>,
    pub file_modified_time: Option<DateTime<Utc>>,
    pub file_path: NormalizedPathKey,
    pub markdown_content: Option<String>,
    pub conversion_type: Option<ConversionType>,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    /// Free-form provenance label, e.g. `local_fs` or a per-account download
    /// label derived from the downloads root.
    pub source: String,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_type_discriminants_are_stable() {
        assert_eq!(ConversionType::Direct.as_i16(), 0);
        assert_eq!(ConversionType::TextToMd.as_i16(), 1);
        assert_eq!(ConversionType::CodeToMd.as_i16(), 2);
        assert_eq!(ConversionType::StructuredToMd.as_i16(), 3);
        assert_eq!(ConversionType::XmindToMd.as_i16(), 4);
        assert_eq!(ConversionType::ImageToMd.as_i16(), 5);
        assert_eq!(ConversionType::VideoMetadata.as_i16(), 6);
        assert_eq!(ConversionType::HtmlToMd.as_i16(), 7);
        assert_eq!(ConversionType::DrawioToMd.as_i16(), 8);
    }

    #[test]
    fn conversion_type_round_trips_through_i16() {
        for raw in 0..=8 {
            let tag = ConversionType::from_i16(raw).unwrap();
            assert_eq!(tag.as_i16(), raw);
        }
        assert!(ConversionType::from_i16(9).is_none());
        assert!(ConversionType::from_i16(-1).is_none());
    }

    #[test]
    fn status_parse_rejects_unknown() {
        assert_eq!(DocumentStatus::parse("completed"), Some(DocumentStatus::Completed));
        assert_eq!(DocumentStatus::parse("Completed"), None);
    }
}

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use markbase_model::NormalizedPathKey;

use crate::error::{IndexError, Result};
use crate::fs::paths::normalize_path;

/// Stat-derived metadata of one file, with the normalized identity path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_name: String,
    /// Lowercased extension without the leading dot; empty when absent.
    pub file_type: String,
    pub file_size: i64,
    /// Birth time where the platform reports it, otherwise ctime (Unix).
    pub file_created_at: Option<DateTime<Utc>>,
    pub file_modified_time: DateTime<Utc>,
    pub file_path: NormalizedPathKey,
}

/// Stat a path and return its normalized metadata.
///
/// Fails with [`IndexError::MetadataUnavailable`] when the file cannot be
/// stat'd; the coordinator treats that as a per-file skip, not an error.
pub fn probe_file(path: &Path) -> Result<FileMetadata> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        warn!("Could not stat {}: {}", path.display(), e);
        IndexError::MetadataUnavailable(format!("{}: {}", path.display(), e))
    })?;

    let modified = metadata.modified().map_err(|e| {
        IndexError::MetadataUnavailable(format!("{}: no mtime: {}", path.display(), e))
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(FileMetadata {
        file_name,
        file_type: extension_of(path),
        file_size: metadata.len() as i64,
        file_created_at: created_at(&metadata),
        file_modified_time: to_utc(modified),
        file_path: normalize_path(path)?,
    })
}

/// Lowercased extension without the dot; empty string when the file has none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(unix)]
fn created_at(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    use std::os::unix::fs::MetadataExt;

    // Birth time is not available on every Unix filesystem; ctime is the
    // documented fallback.
    metadata
        .created()
        .ok()
        .map(to_utc)
        .or_else(|| Utc.timestamp_opt(metadata.ctime(), 0).single())
}

#[cfg(not(unix))]
fn created_at(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.created().ok().map(to_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn probe_returns_normalized_metadata() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("Notes.MD");
        fs::write(&file, b"# hi").unwrap();

        let meta = probe_file(&file).unwrap();
        assert_eq!(meta.file_name, "Notes.MD");
        assert_eq!(meta.file_type, "md");
        assert_eq!(meta.file_size, 4);
        assert!(!meta.file_path.as_str().contains('\\'));
        assert!(meta.file_created_at.is_some());
    }

    #[test]
    fn probe_missing_file_is_metadata_unavailable() {
        let err = probe_file(Path::new("/no/such/file.txt")).unwrap_err();
        assert!(matches!(err, IndexError::MetadataUnavailable(_)));
    }

    #[test]
    fn extension_is_lowercased_and_optional() {
        assert_eq!(extension_of(Path::new("/a/b.TXT")), "txt");
        assert_eq!(extension_of(Path::new("/a/README")), "");
    }
}

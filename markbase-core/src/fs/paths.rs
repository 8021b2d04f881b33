use std::path::{Component, Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

use markbase_model::NormalizedPathKey;

use crate::error::{IndexError, Result};

/// Canonicalize a filesystem path into the identity form stored in the
/// database: absolute, lexically cleaned, NFC-normalized, with forward-slash
/// separators.
///
/// This is the only way paths enter the `documents` table or are compared
/// against stored paths. The function is lexical: it does not touch the
/// filesystem and does not resolve symlinks, so it is idempotent and usable
/// on paths that no longer exist.
pub fn normalize_path(path: &Path) -> Result<NormalizedPathKey> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| IndexError::Internal(format!("cannot resolve working directory: {e}")))?
            .join(path)
    };

    let cleaned = lexical_clean(&absolute);
    let as_string = cleaned.to_string_lossy();
    let nfc: String = as_string.nfc().collect();
    let key = nfc.replace('\\', "/");

    NormalizedPathKey::new(key)
        .map_err(|e| IndexError::Internal(format!("path normalization produced {e}")))
}

/// Remove `.` components and resolve `..` lexically, without touching the
/// filesystem. `..` at the root is dropped.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(component.as_os_str());
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_path(Path::new("/data/docs/note.md")).unwrap();
        let twice = normalize_path(Path::new(once.as_str())).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn relative_paths_become_absolute() {
        let key = normalize_path(Path::new("notes/today.md")).unwrap();
        assert!(key.as_str().starts_with('/'));
        assert!(key.as_str().ends_with("notes/today.md"));
    }

    #[test]
    fn dot_segments_are_cleaned() {
        let key = normalize_path(Path::new("/data/./docs/../archive/a.md")).unwrap();
        assert_eq!(key.as_str(), "/data/archive/a.md");
    }

    #[test]
    fn backslashes_become_forward_slashes() {
        // Mixed separators appear in paths carried over from Windows shares.
        let key = normalize_path(Path::new(r"/srv/share\team\doc.md")).unwrap();
        assert_eq!(key.as_str(), "/srv/share/team/doc.md");
    }

    #[test]
    fn non_nfc_input_is_nfc_normalized() {
        // "é" as 'e' + combining acute (NFD) vs the precomposed form (NFC).
        let nfd = "/data/cafe\u{0301}.md";
        let nfc = "/data/caf\u{e9}.md";
        let from_nfd = normalize_path(Path::new(nfd)).unwrap();
        let from_nfc = normalize_path(Path::new(nfc)).unwrap();
        assert_eq!(from_nfd, from_nfc);
        assert_eq!(from_nfd.as_str(), nfc);
    }
}

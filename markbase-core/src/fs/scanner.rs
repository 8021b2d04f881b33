use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IndexError, Result};

/// Walks a root folder and collects candidate files for ingestion.
///
/// Directories matching the excluded set (or ending in `.assets`) are pruned
/// before descent; files are filtered by extension allow/deny lists and an
/// optional mtime window. Errors on individual entries are logged and
/// skipped; only an unusable root fails the scan.
#[derive(Debug, Clone)]
pub struct FolderScanner {
    recursive: bool,
    allowed_extensions: HashSet<String>,
    excluded_dirs: HashSet<String>,
    excluded_extensions: HashSet<String>,
    mtime_from: Option<DateTime<Utc>>,
    mtime_to: Option<DateTime<Utc>>,
}

impl FolderScanner {
    /// `allowed_extensions` is the effective allow-list (already resolved by
    /// the caller; an explicit request or the registry's full known set).
    pub fn new(
        recursive: bool,
        allowed_extensions: impl IntoIterator<Item = String>,
        excluded_dirs: impl IntoIterator<Item = String>,
        excluded_extensions: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            recursive,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            excluded_dirs: excluded_dirs.into_iter().collect(),
            excluded_extensions: excluded_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
            mtime_from: None,
            mtime_to: None,
        }
    }

    /// Restrict matches to `mtime_from ≤ mtime ≤ mtime_to`; either bound may
    /// be absent.
    pub fn with_mtime_window(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.mtime_from = from;
        self.mtime_to = to;
        self
    }

    /// Scan `root` and return matching file paths in traversal order.
    ///
    /// Ordering is stable with respect to OS directory iteration within one
    /// scan; no cross-run guarantee.
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Err(IndexError::ScanFailed(format!(
                "Directory does not exist: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(IndexError::ScanFailed(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        info!(
            "Starting folder scan of {} (recursive: {})",
            root.display(),
            self.recursive
        );

        let mut walker = WalkDir::new(root);
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let excluded_dirs = self.excluded_dirs.clone();
        let mut matched = Vec::new();
        let mut skipped = 0usize;

        let entries = walker.into_iter().filter_entry(move |entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !(excluded_dirs.contains(name.as_ref()) || name.ends_with(".assets"))
        });

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error walking directory: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let ext = super::probe::extension_of(path);
            if self.excluded_extensions.contains(&ext) {
                skipped += 1;
                continue;
            }
            if !self.allowed_extensions.is_empty() && !self.allowed_extensions.contains(&ext) {
                skipped += 1;
                continue;
            }

            if self.mtime_from.is_some() || self.mtime_to.is_some() {
                let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
                let Some(modified) = modified else {
                    warn!("Could not read mtime of {}, skipping", path.display());
                    continue;
                };
                let mtime = DateTime::<Utc>::from(modified);
                if self.mtime_from.is_some_and(|from| mtime < from) {
                    skipped += 1;
                    continue;
                }
                if self.mtime_to.is_some_and(|to| mtime > to) {
                    skipped += 1;
                    continue;
                }
            }

            debug!("Matched file: {}", path.display());
            matched.push(path.to_path_buf());
        }

        info!(
            "Scan complete: {} matched, {} filtered out",
            matched.len(),
            skipped
        );
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    fn scanner(extensions: &[&str]) -> FolderScanner {
        FolderScanner::new(
            true,
            extensions.iter().map(|e| e.to_string()),
            [".git".to_string(), "node_modules".to_string()],
            ["tmp".to_string()],
        )
    }

    #[test]
    fn scan_empty_directory_matches_nothing() {
        let dir = TempDir::new().unwrap();
        let matched = scanner(&["md"]).scan(dir.path()).unwrap();
        assert!(matched.is_empty());
    }

    #[test]
    fn scan_nonexistent_root_fails() {
        let err = scanner(&["md"]).scan(Path::new("/nonexistent/path")).unwrap_err();
        assert!(matches!(err, IndexError::ScanFailed(_)));
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.MD"), b"x").unwrap();
        fs::write(dir.path().join("b.txt"), b"x").unwrap();
        fs::write(dir.path().join("c.tmp"), b"x").unwrap();

        let matched = scanner(&["md"]).scan(dir.path()).unwrap();
        assert_eq!(matched.len(), 1);
        assert!(matched[0].ends_with("a.MD"));
    }

    #[test]
    fn empty_allow_list_accepts_everything_not_excluded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.md"), b"x").unwrap();
        fs::write(dir.path().join("b.xyz"), b"x").unwrap();
        fs::write(dir.path().join("c.tmp"), b"x").unwrap();

        let matched = scanner(&[]).scan(dir.path()).unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn excluded_and_assets_directories_are_pruned() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/a.md"), b"x").unwrap();
        fs::create_dir(dir.path().join("note.assets")).unwrap();
        fs::write(dir.path().join("note.assets/img.md"), b"x").unwrap();
        fs::write(dir.path().join("note.md"), b"x").unwrap();

        let matched = scanner(&["md"]).scan(dir.path()).unwrap();
        assert_eq!(matched.len(), 1);
        assert!(matched[0].ends_with("note.md"));
    }

    #[test]
    fn non_recursive_stops_at_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/deep.md"), b"x").unwrap();
        fs::write(dir.path().join("top.md"), b"x").unwrap();

        let flat = FolderScanner::new(false, ["md".to_string()], [], []);
        let matched = flat.scan(dir.path()).unwrap();
        assert_eq!(matched.len(), 1);
        assert!(matched[0].ends_with("top.md"));
    }

    #[test]
    fn mtime_window_excludes_old_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("recent.md"), b"x").unwrap();

        let future = Utc::now() + Duration::hours(1);
        let matched = scanner(&["md"])
            .with_mtime_window(Some(future), None)
            .scan(dir.path())
            .unwrap();
        assert!(matched.is_empty());

        let past = Utc::now() - Duration::hours(1);
        let matched = scanner(&["md"])
            .with_mtime_window(Some(past), Some(future))
            .scan(dir.path())
            .unwrap();
        assert_eq!(matched.len(), 1);
    }
}

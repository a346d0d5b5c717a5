//! Directory traversal for both pipelines.
//!
//! Hidden entries (name starting with `.`) below the root are skipped along
//! with everything inside hidden directories. Remaining regular files are
//! kept if the filter regex matches anywhere in their full path.

use crate::error::{Result, SecretsError};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub const MATCH_ALL: &str = ".*";

#[derive(Debug, Clone)]
pub struct FileFilter {
    pattern: Regex,
}

impl FileFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| SecretsError::config(format!("invalid filter '{}': {}", pattern, e)))?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.is_match(&path.to_string_lossy())
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            pattern: Regex::new(MATCH_ALL).expect("match-all pattern is valid"),
        }
    }
}

/// Files found by [`walk`] plus entries that could not be read.
#[derive(Debug, Default)]
pub struct Walk {
    pub files: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, SecretsError)>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Collect matching regular files under `root`, sorted by path.
pub fn walk(root: &Path, filter: &FileFilter) -> Walk {
    let mut out = Walk::default();

    let entries = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!(path = %path.display(), error = %e, "cannot read directory entry");
                out.errors.push((path, SecretsError::io(e.to_string())));
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if !filter.matches(entry.path()) {
            debug!(path = %entry.path().display(), filter = filter.as_str(), "filtered out");
            continue;
        }
        out.files.push(entry.into_path());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(root: &Path, walk: &Walk) -> Vec<String> {
        walk.files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_skips_hidden_entries() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("conf")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join(".env"), "secret").unwrap();
        fs::write(root.join("conf/b.json"), "b").unwrap();
        fs::write(root.join(".git/objects/c"), "c").unwrap();

        let walk = walk(root, &FileFilter::default());
        assert!(walk.errors.is_empty());
        assert_eq!(names(root, &walk), vec!["a.txt", "conf/b.json"]);
    }

    #[test]
    fn test_filter_matches_full_path() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("prod")).unwrap();
        fs::create_dir_all(root.join("dev")).unwrap();
        fs::write(root.join("prod/db.json"), "p").unwrap();
        fs::write(root.join("dev/db.json"), "d").unwrap();

        let filter = FileFilter::new("prod/").unwrap();
        let walk = walk(root, &filter);
        assert_eq!(names(root, &walk), vec!["prod/db.json"]);
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        assert!(matches!(FileFilter::new("(unclosed"), Err(SecretsError::Config(_))));
    }

    #[test]
    fn test_missing_root_reports_error() {
        let tmp = TempDir::new().unwrap();
        let walk = walk(&tmp.path().join("nope"), &FileFilter::default());
        assert!(walk.files.is_empty());
        assert_eq!(walk.errors.len(), 1);
    }
}

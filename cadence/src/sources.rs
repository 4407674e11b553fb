//! Key and execution-context sources
//!
//! Both sources are newline-delimited text files loaded once at startup.
//! Blank lines are ignored. A missing or empty file is a fatal configuration
//! error.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::domain::Key;

/// Errors from loading key or context sources
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Source file is empty: {}", .0.display())]
    Empty(PathBuf),

    /// Keys must be unique; `ordinal` is the 1-based position of the repeat
    #[error("Duplicate key #{ordinal} in {}", path.display())]
    Duplicate { path: PathBuf, ordinal: usize },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Split text into trimmed, non-blank lines
pub fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read a newline-delimited source file, failing on missing or empty files
pub fn read_lines(path: &Path) -> Result<Vec<String>, SourceError> {
    debug!(path = %path.display(), "read_lines: called");
    let content = fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            SourceError::Missing(path.to_path_buf())
        } else {
            SourceError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let lines = parse_lines(&content);
    if lines.is_empty() {
        debug!(path = %path.display(), "read_lines: no usable lines");
        return Err(SourceError::Empty(path.to_path_buf()));
    }
    Ok(lines)
}

/// Position of the first key that repeats an earlier one
fn first_duplicate(keys: &[Key]) -> Option<usize> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter().position(|key| !seen.insert(key))
}

/// The fixed set of keys and their execution contexts
#[derive(Debug, Clone)]
pub struct Sources {
    keys: Vec<Key>,
    contexts: Vec<String>,
}

impl Sources {
    /// Load keys and contexts from their files
    ///
    /// A key listed twice is rejected; each key gets a single cooldown and
    /// at most one attempt in flight.
    pub fn load(keys_path: &Path, contexts_path: &Path) -> Result<Self, SourceError> {
        let keys: Vec<Key> = read_lines(keys_path)?.into_iter().map(Key::new).collect();
        if let Some(position) = first_duplicate(&keys) {
            debug!(path = %keys_path.display(), ordinal = position + 1, "Sources::load: duplicate key");
            return Err(SourceError::Duplicate {
                path: keys_path.to_path_buf(),
                ordinal: position + 1,
            });
        }
        let contexts = read_lines(contexts_path)?;
        info!(keys = keys.len(), contexts = contexts.len(), "Loaded sources");
        Ok(Self { keys, contexts })
    }

    /// Build sources from in-memory values
    ///
    /// Returns `None` when either list is empty or a key repeats.
    pub fn from_parts(keys: Vec<Key>, contexts: Vec<String>) -> Option<Self> {
        if keys.is_empty() || contexts.is_empty() || first_duplicate(&keys).is_some() {
            return None;
        }
        Some(Self { keys, contexts })
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    /// Context assigned to the key at `index`
    pub fn context_for(&self, index: usize) -> &str {
        &self.contexts[index % self.contexts.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_lines_skips_blanks_and_trims() {
        let lines = parse_lines("alpha\n\n  beta  \r\n\t\ngamma");
        assert_eq!(lines, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_read_lines_missing_file() {
        let result = read_lines(Path::new("/nonexistent/tokens.txt"));
        assert!(matches!(result, Err(SourceError::Missing(_))));
    }

    #[test]
    fn test_read_lines_empty_file() {
        let file = write_temp("\n   \n");
        let result = read_lines(file.path());
        assert!(matches!(result, Err(SourceError::Empty(_))));
    }

    #[test]
    fn test_load_sources() {
        let keys = write_temp("k1\nk2\nk3\n");
        let contexts = write_temp("ua-1\nua-2\n");

        let sources = Sources::load(keys.path(), contexts.path()).unwrap();
        assert_eq!(sources.keys().len(), 3);
        assert_eq!(sources.keys()[1].expose(), "k2");
        assert_eq!(sources.contexts().len(), 2);
    }

    #[test]
    fn test_context_for_wraps_around() {
        let sources = Sources::from_parts(
            vec![Key::new("a"), Key::new("b"), Key::new("c")],
            vec!["ua-1".to_string(), "ua-2".to_string()],
        )
        .unwrap();

        assert_eq!(sources.context_for(0), "ua-1");
        assert_eq!(sources.context_for(1), "ua-2");
        assert_eq!(sources.context_for(2), "ua-1");
    }

    #[test]
    fn test_load_rejects_duplicate_keys() {
        let keys = write_temp("k1\nk2\n\n  k1  \n");
        let contexts = write_temp("ua-1\n");

        let result = Sources::load(keys.path(), contexts.path());
        assert!(matches!(result, Err(SourceError::Duplicate { ordinal: 3, .. })));
    }

    #[test]
    fn test_duplicate_error_hides_key() {
        let keys = write_temp("secret-token-value\nsecret-token-value\n");
        let contexts = write_temp("ua-1\n");

        let err = Sources::load(keys.path(), contexts.path()).unwrap_err();
        assert!(err.to_string().starts_with("Duplicate key #2"));
        assert!(!err.to_string().contains("secret-token-value"));
    }

    #[test]
    fn test_from_parts_rejects_duplicates() {
        let keys = vec![Key::new("same-token"), Key::new("other"), Key::new("same-token")];
        assert!(Sources::from_parts(keys, vec!["ua".to_string()]).is_none());
    }

    #[test]
    fn test_from_parts_rejects_empty() {
        assert!(Sources::from_parts(vec![], vec!["ua".to_string()]).is_none());
        assert!(Sources::from_parts(vec![Key::new("a")], vec![]).is_none());
    }
}

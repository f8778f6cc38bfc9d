//! Persisted ETag store.
//!
//! Maps a package name to the ETag the registry returned with its manifest,
//! stored as `{"<name>": {"etag": "<value>"}}` in `<cache>/etag/etag.json`.

use super::error::PkgError;
use rootpm_util::fs::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One stored entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagEntry {
    #[serde(default)]
    pub etag: String,
}

/// Name -> ETag map backed by a JSON file.
#[derive(Debug, Clone, Default)]
pub struct EtagStore {
    path: PathBuf,
    entries: BTreeMap<String, EtagEntry>,
    dirty: bool,
}

impl EtagStore {
    /// Load the store from `path`.
    ///
    /// A missing file yields an empty store. An unreadable or corrupt file is
    /// also treated as empty: ETags are only an optimization.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let entries = match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt etag store");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read etag store");
                BTreeMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        }
    }

    /// Get the remembered ETag for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .map(|e| e.etag.as_str())
            .filter(|e| !e.is_empty())
    }

    /// Remember `etag` for `name`.
    pub fn set(&mut self, name: &str, etag: &str) {
        if self.get(name) == Some(etag) {
            return;
        }
        self.entries.insert(
            name.to_string(),
            EtagEntry {
                etag: etag.to_string(),
            },
        );
        self.dirty = true;
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the store back to disk if anything changed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self) -> Result<(), PkgError> {
        if !self.dirty {
            return Ok(());
        }

        let json = serde_json::to_vec_pretty(&self.entries)?;
        atomic_write(&self.path, &json).map_err(|e| {
            PkgError::cache_error(format!(
                "Failed to write etag store {}: {e}",
                self.path.display()
            ))
        })?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = EtagStore::load(&dir.path().join("etag").join("etag.json"));
        assert!(store.is_empty());
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn test_set_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etag").join("etag.json");

        let mut store = EtagStore::load(&path);
        store.set("is-odd", "W/\"abc\"");
        store.set("@types/node", "\"def\"");
        store.save().unwrap();

        let reloaded = EtagStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("is-odd"), Some("W/\"abc\""));
        assert_eq!(reloaded.get("@types/node"), Some("\"def\""));
    }

    #[test]
    fn test_file_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etag.json");

        let mut store = EtagStore::load(&path);
        store.set("a", "x");
        store.save().unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["a"]["etag"], "x");
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etag.json");
        fs::write(&path, "not json").unwrap();

        let store = EtagStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_without_changes_does_not_create_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etag.json");

        let mut store = EtagStore::load(&path);
        store.save().unwrap();
        assert!(!path.exists());
    }
}

//! Package cache layout.
//!
//! Everything lives under one explicit root:
//!
//! ```text
//! <root>/manifests/<encoded-name>.json
//! <root>/etag/etag.json
//! <root>/packages/<name>@<version>/
//! ```

use super::error::PkgError;
use rootpm_util::fs::dir_exists;
use std::fs;
use std::path::{Path, PathBuf};

/// Package cache manager.
#[derive(Debug, Clone)]
pub struct PackageCache {
    /// Root directory for the package cache.
    root: PathBuf,
}

impl PackageCache {
    /// Create a cache rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one manifest file per package name.
    #[must_use]
    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    /// Directory holding extracted packages.
    #[must_use]
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Path of the persisted ETag store.
    #[must_use]
    pub fn etag_path(&self) -> PathBuf {
        self.root.join("etag").join("etag.json")
    }

    /// Get the path for a cached manifest.
    ///
    /// Scoped package names are URL-encoded so every manifest is a single file.
    #[must_use]
    pub fn manifest_path(&self, name: &str) -> PathBuf {
        let encoded = Self::encode_name(name);
        self.manifests_dir().join(format!("{encoded}.json"))
    }

    /// Get the directory of an extracted package version.
    #[must_use]
    pub fn package_dir(&self, name: &str, version: &str) -> PathBuf {
        self.packages_dir().join(format!("{name}@{version}"))
    }

    /// Check if a package version is already extracted.
    #[must_use]
    pub fn is_cached(&self, name: &str, version: &str) -> bool {
        dir_exists(&self.package_dir(name, version))
    }

    /// Check if a manifest file is present on disk.
    #[must_use]
    pub fn has_manifest(&self, name: &str) -> bool {
        self.manifest_path(name).is_file()
    }

    /// Create the cache directories.
    ///
    /// # Errors
    /// Returns an error if the directories cannot be created.
    pub fn ensure_dirs(&self) -> Result<(), PkgError> {
        for dir in [
            self.manifests_dir(),
            self.packages_dir(),
            self.root.join("etag"),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                PkgError::cache_error(format!(
                    "Failed to create cache directory {}: {e}",
                    dir.display()
                ))
            })?;
        }
        Ok(())
    }

    /// Encode a package name for use as a file name.
    #[must_use]
    pub fn encode_name(name: &str) -> String {
        name.replace('/', "%2F")
    }
}

//! Lockfile types.
//!
//! The lockfile records the resolved version of every package in the graph,
//! keyed by a path key that encodes where the package sits:
//!
//! - `root-deps/<name>`: the flat slot, one per name
//! - `root-deps/<parent>/root-deps/<name>`: a conflicting version nested
//!   under the parent that asked for it during a fetch run
//! - `<owner-key>/root-deps/<name>`: a version relocated under an existing
//!   owner when a later `add` took over the flat slot
//!
//! ## File Format
//!
//! The lockfile is a JSON file named `rootpm-lock.json`:
//!
//! ```json
//! {
//!   "dependencies": { "is-even": "1.0.0" },
//!   "packages": {
//!     "root-deps/is-even": {
//!       "name": "is-even",
//!       "version": "1.0.0",
//!       "resolved": "https://registry.npmjs.org/is-even/-/is-even-1.0.0.tgz",
//!       "etag": "\"abc\"",
//!       "dependencies": { "is-odd": "^0.1.2" }
//!     }
//!   }
//! }
//! ```

use rootpm_util::fs::atomic_write;
use rootpm_util::hash::blake3_bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Lockfile filename.
pub const LOCKFILE_NAME: &str = "rootpm-lock.json";

/// Path segment separating owners from dependents in a path key.
pub const ROOT_DEPS: &str = "root-deps";

/// Lockfile error codes.
pub mod codes {
    /// Lockfile not found at the expected path.
    pub const PKG_LOCK_NOT_FOUND: &str = "PKG_LOCK_NOT_FOUND";
    /// Lockfile has invalid JSON.
    pub const PKG_LOCK_INVALID_JSON: &str = "PKG_LOCK_INVALID_JSON";
    /// Lockfile write failed.
    pub const PKG_LOCK_WRITE_FAILED: &str = "PKG_LOCK_WRITE_FAILED";
    /// Lockfile contents contradict each other.
    pub const PKG_LOCK_INCONSISTENT: &str = "PKG_LOCK_INCONSISTENT";
    /// Two versions of one package compete for the same path key.
    pub const PKG_LOCK_CONFLICT: &str = "PKG_LOCK_CONFLICT";
}

/// Flat path key for `name`.
#[must_use]
pub fn flat_key(name: &str) -> String {
    format!("{ROOT_DEPS}/{name}")
}

/// Path key for `name` nested under the flat slot of `parent`.
#[must_use]
pub fn nested_key(parent: &str, name: &str) -> String {
    format!("{ROOT_DEPS}/{parent}/{ROOT_DEPS}/{name}")
}

/// Path key for `name` relocated under an existing owner key.
#[must_use]
pub fn relocated_key(owner_key: &str, name: &str) -> String {
    format!("{owner_key}/{ROOT_DEPS}/{name}")
}

/// Package name a path key points at (its last segment).
#[must_use]
pub fn name_from_key(key: &str) -> &str {
    let sep = format!("/{ROOT_DEPS}/");
    match key.rfind(&sep) {
        Some(idx) => &key[idx + sep.len()..],
        None => key
            .strip_prefix(ROOT_DEPS)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(key),
    }
}

/// One placed package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageItem {
    pub name: String,
    pub version: String,
    /// Tarball URL the package was fetched from.
    #[serde(default)]
    pub resolved: String,
    /// ETag of the manifest this version was resolved from.
    #[serde(default)]
    pub etag: String,
    /// Shasum published in the manifest.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub integrity: String,
    /// Raw constraints of this package's own dependencies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
}

/// The complete lockfile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLock {
    /// Directly declared name -> resolved version (prod and dev).
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// The subset of `dependencies` declared as devDependencies.
    #[serde(
        rename = "devDependencies",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
    /// Path key -> placed package.
    #[serde(default)]
    pub packages: BTreeMap<String, PackageItem>,
}

impl PackageLock {
    /// Create an empty lockfile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The package in the flat slot for `name`.
    #[must_use]
    pub fn flat(&self, name: &str) -> Option<&PackageItem> {
        self.packages.get(&flat_key(name))
    }

    /// Whether `name` is a direct dependency.
    #[must_use]
    pub fn is_direct(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    /// Read a lockfile from a path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_from(path: &Path) -> Result<Self, LockfileError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LockfileError::new(
                    codes::PKG_LOCK_NOT_FOUND,
                    format!("Lockfile not found: {}", path.display()),
                )
            } else {
                LockfileError::new(
                    codes::PKG_LOCK_INVALID_JSON,
                    format!("Failed to read lockfile: {e}"),
                )
            }
        })?;

        Self::from_json(&content)
    }

    /// Write the lockfile to a path atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<(), LockfileError> {
        let content = self.to_json()?;

        atomic_write(path, content.as_bytes()).map_err(|e| {
            LockfileError::new(
                codes::PKG_LOCK_WRITE_FAILED,
                format!("Failed to write lockfile: {e}"),
            )
        })
    }

    /// Serialize to a pretty JSON string with a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, LockfileError> {
        let mut json = serde_json::to_string_pretty(self).map_err(|e| {
            LockfileError::new(
                codes::PKG_LOCK_WRITE_FAILED,
                format!("Failed to serialize lockfile: {e}"),
            )
        })?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(json: &str) -> Result<Self, LockfileError> {
        serde_json::from_str(json).map_err(|e| {
            LockfileError::new(
                codes::PKG_LOCK_INVALID_JSON,
                format!("Invalid lockfile JSON: {e}"),
            )
        })
    }

    /// Deterministic BLAKE3 hash of the serialized lockfile.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn content_hash(&self) -> Result<String, LockfileError> {
        Ok(blake3_bytes(self.to_json()?.as_bytes()))
    }
}

/// Lockfile error.
#[derive(Debug)]
pub struct LockfileError {
    code: &'static str,
    message: String,
}

impl LockfileError {
    /// Create a new error.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LockfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for LockfileError {}

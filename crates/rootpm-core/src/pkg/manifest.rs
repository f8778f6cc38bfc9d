//! Registry manifest model.
//!
//! One manifest per package name, as served by the registry at
//! `<registry>/<name>`. Only the fields the resolver and orchestrator need are
//! modeled; everything else in the document is ignored.

use super::error::PkgError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Registry metadata for one package name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: DistTags,
    /// Exact version string -> version record.
    #[serde(default)]
    pub versions: BTreeMap<String, VersionRecord>,
}

/// Named tags pointing at published versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistTags {
    #[serde(default)]
    pub latest: String,
}

/// One published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "string_map")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dist: Dist,
}

/// Archive location and checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub tarball: String,
    #[serde(default)]
    pub shasum: String,
}

impl Manifest {
    /// Parse a manifest document.
    ///
    /// # Errors
    /// Returns `PKG_MANIFEST_INVALID` if the bytes are not a manifest object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PkgError> {
        serde_json::from_slice(bytes)
            .map_err(|e| PkgError::manifest_invalid(format!("Invalid manifest JSON: {e}")))
    }

    /// Read and parse a manifest file from the cache.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_from(path: &Path) -> Result<Self, PkgError> {
        let bytes = fs::read(path).map_err(|e| {
            PkgError::cache_error(format!("Failed to read manifest {}: {e}", path.display()))
        })?;
        Self::from_slice(&bytes).map_err(|e| {
            PkgError::manifest_invalid(format!("{} ({})", e.message(), path.display()))
        })
    }

    /// The `dist-tags.latest` version, if the registry published one.
    #[must_use]
    pub fn latest(&self) -> Option<&str> {
        let latest = self.dist_tags.latest.trim();
        (!latest.is_empty()).then_some(latest)
    }

    /// Look up a version record by its exact version string.
    #[must_use]
    pub fn get(&self, version: &str) -> Option<&VersionRecord> {
        self.versions.get(version)
    }
}

/// Accept `null` and skip non-string values in dependency maps.
///
/// Registries occasionally publish `"dependencies": null` or malformed entries;
/// neither should make the whole manifest unreadable.
pub(crate) fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Object(obj)) = value else {
        return Ok(BTreeMap::new());
    };

    Ok(obj
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest() {
        let json = br#"{
            "name": "is-odd",
            "dist-tags": { "latest": "3.0.1" },
            "versions": {
                "3.0.1": {
                    "version": "3.0.1",
                    "dependencies": { "is-number": "^6.0.0" },
                    "dist": {
                        "tarball": "https://registry.npmjs.org/is-odd/-/is-odd-3.0.1.tgz",
                        "shasum": "65101baf3727d728b66fa62f50cda7f2d3989601"
                    }
                }
            }
        }"#;

        let manifest = Manifest::from_slice(json).unwrap();
        assert_eq!(manifest.name, "is-odd");
        assert_eq!(manifest.latest(), Some("3.0.1"));

        let record = manifest.get("3.0.1").unwrap();
        assert_eq!(record.dependencies.get("is-number").unwrap(), "^6.0.0");
        assert!(record.dist.tarball.ends_with("is-odd-3.0.1.tgz"));
        assert_eq!(record.dist.shasum.len(), 40);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = br#"{
            "_id": "x",
            "readme": "...",
            "time": { "created": "2020-01-01" },
            "dist-tags": { "latest": "1.0.0", "next": "2.0.0-rc.1" },
            "versions": { "1.0.0": { "version": "1.0.0", "scripts": { "test": "x" } } }
        }"#;

        let manifest = Manifest::from_slice(json).unwrap();
        assert_eq!(manifest.latest(), Some("1.0.0"));
        assert!(manifest.get("1.0.0").unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_null_and_malformed_dependencies() {
        let json = br#"{
            "dist-tags": { "latest": "1.0.0" },
            "versions": {
                "1.0.0": { "version": "1.0.0", "dependencies": null },
                "1.1.0": { "version": "1.1.0", "dependencies": { "a": "^1.0.0", "b": 3 } }
            }
        }"#;

        let manifest = Manifest::from_slice(json).unwrap();
        assert!(manifest.get("1.0.0").unwrap().dependencies.is_empty());

        let deps = &manifest.get("1.1.0").unwrap().dependencies;
        assert_eq!(deps.len(), 1);
        assert_eq!(deps.get("a").unwrap(), "^1.0.0");
    }

    #[test]
    fn test_missing_latest() {
        let manifest = Manifest::from_slice(br#"{"versions": {}}"#).unwrap();
        assert_eq!(manifest.latest(), None);
    }

    #[test]
    fn test_invalid_json() {
        let err = Manifest::from_slice(b"<html>rate limited</html>").unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_MANIFEST_INVALID);
    }

    #[test]
    fn test_read_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::read_from(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_CACHE_ERROR);
    }
}

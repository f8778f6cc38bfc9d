//! npm registry client.

use super::error::PkgError;
use super::manifest::Manifest;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use rootpm_util::fs::atomic_write;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Result of a conditional manifest fetch.
#[derive(Debug, Clone)]
pub struct ManifestFetch {
    /// ETag returned by the registry (or the one we sent, on 304).
    pub etag: Option<String>,
    /// `false` when the registry answered `304 Not Modified`.
    pub modified: bool,
    /// The freshly downloaded manifest; `None` on 304.
    pub manifest: Option<Manifest>,
}

/// Registry client for fetching package metadata.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        // Url::join drops the last path segment unless the base ends in '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("rootpm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { base_url, http })
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the HTTP client (for reuse in tarball downloads).
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// URL of the manifest document for `name`.
    ///
    /// # Errors
    /// Returns an error if the name cannot be joined onto the base URL.
    pub fn manifest_url(&self, name: &str) -> Result<Url, PkgError> {
        // URL-encode the name for scoped packages
        let encoded_name = if name.starts_with('@') {
            name.replace('/', "%2F")
        } else {
            name.to_string()
        };

        self.base_url
            .join(&encoded_name)
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))
    }

    /// Conventional tarball URL, used when a version record has no `dist.tarball`.
    #[must_use]
    pub fn tarball_url_fallback(&self, name: &str, version: &str) -> String {
        let basename = name.rsplit('/').next().unwrap_or(name);
        format!("{}{name}/-/{basename}-{version}.tgz", self.base_url)
    }

    /// Fetch the manifest for `name`, conditionally if an ETag is known.
    ///
    /// `known_etag` is only sent when `dest` already holds a manifest, since a
    /// `304` is answered by reusing that file. A `200` response is parsed and
    /// then written to `dest` atomically.
    ///
    /// # Errors
    /// Returns `PKG_NOT_FOUND` on 404, `PKG_REGISTRY_ERROR` on other failures
    /// and `PKG_MANIFEST_INVALID` if the body is not a manifest.
    pub async fn fetch_manifest(
        &self,
        name: &str,
        known_etag: Option<&str>,
        dest: &Path,
    ) -> Result<ManifestFetch, PkgError> {
        let url = self.manifest_url(name)?;
        let known_etag = known_etag.filter(|_| dest.is_file());

        let mut request = self.http.get(url.as_str());
        if let Some(etag) = known_etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!(name, "manifest not modified");
            return Ok(ManifestFetch {
                etag: known_etag.map(String::from),
                modified: false,
                manifest: None,
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(PkgError::not_found(name));
        }

        if !status.is_success() {
            return Err(PkgError::registry(format!(
                "Registry returned status {status} for '{name}'"
            )));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response.bytes().await?;
        let manifest = Manifest::from_slice(&body).map_err(|e| {
            PkgError::manifest_invalid(format!("Manifest for '{name}': {}", e.message()))
        })?;

        atomic_write(dest, &body).map_err(|e| {
            PkgError::cache_error(format!(
                "Failed to write manifest {}: {e}",
                dest.display()
            ))
        })?;

        tracing::debug!(name, bytes = body.len(), etag = ?etag, "manifest fetched");

        Ok(ManifestFetch {
            etag,
            modified: true,
            manifest: Some(manifest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = RegistryClient::new(DEFAULT_REGISTRY);
        assert!(client.is_ok());
    }

    #[test]
    fn test_client_invalid_url() {
        let client = RegistryClient::new("not-a-url");
        assert!(client.is_err());
    }

    #[test]
    fn test_manifest_url() {
        let client = RegistryClient::new(DEFAULT_REGISTRY).unwrap();
        assert_eq!(
            client.manifest_url("is-odd").unwrap().as_str(),
            "https://registry.npmjs.org/is-odd"
        );
        assert_eq!(
            client.manifest_url("@types/node").unwrap().as_str(),
            "https://registry.npmjs.org/@types%2Fnode"
        );
    }

    #[test]
    fn test_base_without_trailing_slash() {
        let client = RegistryClient::new("http://localhost:4873/npm").unwrap();
        assert_eq!(
            client.manifest_url("a").unwrap().as_str(),
            "http://localhost:4873/npm/a"
        );
    }

    #[test]
    fn test_tarball_url_fallback() {
        let client = RegistryClient::new(DEFAULT_REGISTRY).unwrap();
        assert_eq!(
            client.tarball_url_fallback("is-odd", "3.0.1"),
            "https://registry.npmjs.org/is-odd/-/is-odd-3.0.1.tgz"
        );
        assert_eq!(
            client.tarball_url_fallback("@types/node", "20.1.0"),
            "https://registry.npmjs.org/@types/node/-/node-20.1.0.tgz"
        );
    }
}

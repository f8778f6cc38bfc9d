//! Package manager error types.

use super::lockfile::LockfileError;
use std::fmt;
use std::io;

/// Package manager error codes.
pub mod codes {
    pub const PKG_NOT_FOUND: &str = "PKG_NOT_FOUND";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_MANIFEST_INVALID: &str = "PKG_MANIFEST_INVALID";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_INTEGRITY_MISMATCH: &str = "PKG_INTEGRITY_MISMATCH";
    pub const PKG_CACHE_ERROR: &str = "PKG_CACHE_ERROR";
    pub const PKG_ARGS_INVALID: &str = "PKG_ARGS_INVALID";
    pub const PKG_PACKAGE_JSON_NOT_FOUND: &str = "PKG_PACKAGE_JSON_NOT_FOUND";
    pub const PKG_PACKAGE_JSON_INVALID: &str = "PKG_PACKAGE_JSON_INVALID";
    pub const PKG_DEP_RANGE_INVALID: &str = "PKG_DEP_RANGE_INVALID";
    pub const PKG_TASK_FAILED: &str = "PKG_TASK_FAILED";
}

/// Package manager error.
#[derive(Debug)]
pub struct PkgError {
    code: &'static str,
    message: String,
}

impl PkgError {
    /// Create a new error with the given code and message.
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

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::PKG_NOT_FOUND, format!("Package not found: {name}"))
    }

    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, msg)
    }

    /// Create a manifest parse error.
    pub fn manifest_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_MANIFEST_INVALID, msg)
    }

    /// Create a download failed error.
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_DOWNLOAD_FAILED, msg)
    }

    /// Create an extraction failed error.
    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_EXTRACT_FAILED, msg)
    }

    /// Create an integrity mismatch error.
    #[must_use]
    pub fn integrity_mismatch(name: &str, version: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            codes::PKG_INTEGRITY_MISMATCH,
            format!("Shasum mismatch for {name}@{version}: expected {expected}, got {actual}"),
        )
    }

    /// Create a cache error.
    pub fn cache_error(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_CACHE_ERROR, msg)
    }

    /// Create an args invalid error.
    pub fn args_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_ARGS_INVALID, msg)
    }

    /// Create a package.json not found error.
    #[must_use]
    pub fn package_json_not_found(path: &std::path::Path) -> Self {
        Self::new(
            codes::PKG_PACKAGE_JSON_NOT_FOUND,
            format!("package.json not found: {}", path.display()),
        )
    }

    /// Create a package.json invalid error.
    pub fn package_json_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_PACKAGE_JSON_INVALID, msg)
    }

    /// Create a dependency range invalid error.
    #[must_use]
    pub fn dep_range_invalid(name: &str, actual_type: &str) -> Self {
        Self::new(
            codes::PKG_DEP_RANGE_INVALID,
            format!("Invalid range for '{name}': expected string, got {actual_type}"),
        )
    }

    /// Create an error for a worker task that panicked or was cancelled.
    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_TASK_FAILED, msg)
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PKG_CACHE_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::PKG_REGISTRY_ERROR, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::PKG_REGISTRY_ERROR, format!("Connection failed: {e}"))
        } else {
            Self::new(codes::PKG_REGISTRY_ERROR, e.to_string())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::PKG_MANIFEST_INVALID, format!("Invalid JSON: {e}"))
    }
}

impl From<LockfileError> for PkgError {
    fn from(e: LockfileError) -> Self {
        Self::new(e.code(), e.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::lockfile::codes as lock_codes;

    #[test]
    fn test_error_code_format() {
        let err = PkgError::registry("boom");
        assert_eq!(err.code(), codes::PKG_REGISTRY_ERROR);
        assert!(err.to_string().contains(codes::PKG_REGISTRY_ERROR));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::PKG_NOT_FOUND,
            codes::PKG_REGISTRY_ERROR,
            codes::PKG_MANIFEST_INVALID,
            codes::PKG_DOWNLOAD_FAILED,
            codes::PKG_EXTRACT_FAILED,
            codes::PKG_INTEGRITY_MISMATCH,
            codes::PKG_CACHE_ERROR,
            codes::PKG_ARGS_INVALID,
            codes::PKG_PACKAGE_JSON_NOT_FOUND,
            codes::PKG_PACKAGE_JSON_INVALID,
            codes::PKG_DEP_RANGE_INVALID,
            codes::PKG_TASK_FAILED,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_lockfile_error_keeps_code() {
        let err: PkgError =
            LockfileError::new(lock_codes::PKG_LOCK_INCONSISTENT, "missing entry").into();
        assert_eq!(err.code(), lock_codes::PKG_LOCK_INCONSISTENT);
        assert_eq!(err.message(), "missing entry");
    }

    #[test]
    fn test_integrity_mismatch_message() {
        let err = PkgError::integrity_mismatch("is-odd", "3.0.1", "aaa", "bbb");
        assert_eq!(err.code(), codes::PKG_INTEGRITY_MISMATCH);
        assert!(err.message().contains("is-odd@3.0.1"));
    }
}

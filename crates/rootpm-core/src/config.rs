use crate::paths::cache_dir;
use crate::pkg::registry::DEFAULT_REGISTRY;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable to override the registry URL.
pub const REGISTRY_ENV: &str = "ROOTPM_REGISTRY";

/// Environment variable to override the cache root.
pub const CACHE_DIR_ENV: &str = "ROOTPM_CACHE_DIR";

/// Runtime configuration for rootpm.
///
/// The cache root is carried here and handed to every component explicitly;
/// nothing in the engine reaches for a process-wide cache location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Root of the manifest, ETag and package caches.
    pub cache_root: PathBuf,

    /// Registry base URL.
    pub registry: String,

    /// Skip devDependencies and prune dev-only packages from the lockfile.
    pub production: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            cache_root: cache_dir(),
            registry: DEFAULT_REGISTRY.to_string(),
            production: false,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Apply `ROOTPM_REGISTRY` / `ROOTPM_CACHE_DIR` overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(registry) = std::env::var(REGISTRY_ENV) {
            if !registry.trim().is_empty() {
                self.registry = registry;
            }
        }
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV) {
            if !dir.is_empty() {
                self.cache_root = PathBuf::from(dir);
            }
        }
        self
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set the cache root.
    #[must_use]
    pub fn with_cache_root(mut self, cache_root: PathBuf) -> Self {
        self.cache_root = cache_root;
        self
    }

    /// Set the registry URL.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Set production mode.
    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }
}

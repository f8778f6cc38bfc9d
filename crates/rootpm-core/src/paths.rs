use crate::pkg::lockfile::LOCKFILE_NAME;
use crate::version::SCHEMA_VERSION;
use std::path::{Path, PathBuf};

/// Find the project root by walking up from `cwd` looking for `package.json`
/// or an existing lockfile.
///
/// Returns the first directory containing either marker, or `None` if neither is found.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    let mut current = cwd.to_path_buf();

    loop {
        if current.join("package.json").exists() || current.join(LOCKFILE_NAME).exists() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Get the default cache directory for rootpm.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_CACHE_HOME/rootpm/v{N}` or `~/.cache/rootpm/v{N}`
/// - macOS: `~/Library/Caches/rootpm/v{N}`
/// - Windows: `%LOCALAPPDATA%\rootpm\v{N}`
#[must_use]
pub fn cache_dir() -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".rootpm-cache"),
                |p| p.join(".cache").join("rootpm"),
            )
        },
        |p| p.join("rootpm"),
    );

    base.join(format!("v{SCHEMA_VERSION}"))
}

//! Project-level operations: install, add, remove.
//!
//! Each operation reads the project's `package.json` and lockfile, does all of
//! its fallible work in memory, and only then writes. The lockfile is written
//! once at the end, and only if its serialized content changed.

use super::cache::PackageCache;
use super::deps::{add_dependency, read_declared_deps, remove_dependency};
use super::error::PkgError;
use super::fetch::{FetchOptions, FetchStats, Fetcher, QueueItem};
use super::lockfile::{PackageLock, LOCKFILE_NAME};
use super::reconcile::{
    dependents_to_remove, diff, merge_on_add, prune_dev_only, prune_unreachable, remove_from_lock,
};
use super::registry::RegistryClient;
use crate::config::Config;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Options for project operations.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Skip devDependencies and prune dev-only packages from the lock.
    pub production: bool,
    /// Orchestrator tuning.
    pub fetch: FetchOptions,
}

/// Result of a project operation.
#[derive(Debug, Clone)]
pub struct ResolveResult {
    /// The lock as it now stands.
    pub lock: PackageLock,
    /// Counters from the fetch run, if one happened.
    pub stats: FetchStats,
    /// Direct dependencies that were (re)installed.
    pub installed: Vec<String>,
    /// Path keys dropped from the lock.
    pub removed: Vec<String>,
    /// Whether the lockfile on disk was rewritten.
    pub lockfile_written: bool,
}

/// Build a fetcher from runtime configuration.
///
/// # Errors
/// Returns an error if the registry URL is invalid.
pub fn fetcher_from_config(config: &Config, options: FetchOptions) -> Result<Fetcher, PkgError> {
    let registry = RegistryClient::new(&config.registry)?;
    let cache = PackageCache::new(config.cache_root.clone());
    Ok(Fetcher::new(registry, cache, options))
}

/// The lockfile path for a project.
#[must_use]
pub fn lockfile_path(project: &Path) -> PathBuf {
    project.join(LOCKFILE_NAME)
}

/// An existing lock together with the hash it was read with.
struct LoadedLock {
    lock: PackageLock,
    hash: Option<String>,
}

fn load_lock(project: &Path) -> Result<LoadedLock, PkgError> {
    let path = lockfile_path(project);
    if !path.exists() {
        return Ok(LoadedLock {
            lock: PackageLock::new(),
            hash: None,
        });
    }

    let lock = PackageLock::read_from(&path)?;
    let hash = Some(lock.content_hash()?);
    Ok(LoadedLock { lock, hash })
}

/// Write `lock` unless its content hash equals `previous_hash`.
///
/// # Errors
/// Returns an error if the lockfile cannot be serialized or written.
pub fn write_lockfile_if_changed(
    project: &Path,
    lock: &PackageLock,
    previous_hash: Option<&str>,
) -> Result<bool, PkgError> {
    let hash = lock.content_hash()?;
    if previous_hash == Some(hash.as_str()) {
        info!("lockfile up to date");
        return Ok(false);
    }

    let path = lockfile_path(project);
    lock.write_to(&path)?;
    info!(path = %path.display(), packages = lock.packages.len(), "lockfile written");
    Ok(true)
}

/// Bring the lockfile in line with `package.json`.
///
/// Without a lockfile every declared dependency is fetched. With one, only the
/// difference is applied: new or changed constraints are fetched and merged,
/// undeclared packages are removed along with whatever only they needed.
///
/// # Errors
/// Returns the first fetch, parse, reconcile or write error. The lockfile is
/// left untouched on error.
pub async fn install(
    project: &Path,
    fetcher: &Fetcher,
    opts: &ResolveOptions,
) -> Result<ResolveResult, PkgError> {
    let declared = read_declared_deps(&project.join("package.json"))?;
    for err in &declared.errors {
        warn!(name = %err.name, code = err.code, "{}", err.message);
    }

    let LoadedLock { mut lock, hash } = load_lock(project)?;
    let mut stats = FetchStats::default();
    let mut installed = Vec::new();
    let mut removed = Vec::new();

    if hash.is_none() {
        let mut roots: Vec<QueueItem> = declared
            .dependencies
            .iter()
            .map(|(n, c)| QueueItem::root(n.clone(), c.clone(), false))
            .collect();
        if !opts.production {
            roots.extend(
                declared
                    .dev_dependencies
                    .iter()
                    .map(|(n, c)| QueueItem::root(n.clone(), c.clone(), true)),
            );
        }

        installed = roots.iter().map(|r| r.dependency.name.clone()).collect();
        let outcome = fetcher.fetch(roots).await?;
        lock = outcome.lock;
        stats = outcome.stats;
    } else {
        let changes = diff(
            &declared.dependencies,
            &declared.dev_dependencies,
            &lock.dependencies,
        );

        let to_install: Vec<QueueItem> = changes
            .to_install
            .into_iter()
            .filter(|item| !(opts.production && item.is_dev))
            .collect();

        if !to_install.is_empty() {
            installed = to_install
                .iter()
                .map(|r| r.dependency.name.clone())
                .collect();
            let outcome = fetcher.fetch(to_install).await?;
            merge_on_add(&mut lock, outcome.lock)?;
            stats = outcome.stats;
            removed.extend(prune_unreachable(&mut lock)?);
        }

        for name in &changes.to_remove {
            let keys = dependents_to_remove(&lock, name)?;
            remove_from_lock(&mut lock, name, &keys);
            removed.extend(keys);
        }
    }

    sync_dev_markers(&mut lock, &declared.dev_dependencies);

    if opts.production {
        removed.extend(prune_dev_only(&mut lock)?);
    }

    let lockfile_written = write_lockfile_if_changed(project, &lock, hash.as_deref())?;

    info!(
        installed = installed.len(),
        removed = removed.len(),
        "install complete"
    );

    Ok(ResolveResult {
        lock,
        stats,
        installed,
        removed,
        lockfile_written,
    })
}

/// Add one dependency and record it in `package.json`.
///
/// An empty constraint resolves to the latest version and is recorded as
/// `^<version>`.
///
/// # Errors
/// Returns `PKG_NOT_FOUND` if no version satisfies the constraint, or the
/// first fetch, reconcile or write error.
pub async fn add(
    project: &Path,
    fetcher: &Fetcher,
    name: &str,
    constraint: &str,
    dev: bool,
) -> Result<ResolveResult, PkgError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PkgError::args_invalid("Package name must not be empty"));
    }

    let package_json = project.join("package.json");
    if !package_json.exists() {
        return Err(PkgError::package_json_not_found(&package_json));
    }

    let LoadedLock { mut lock, hash } = load_lock(project)?;

    let outcome = fetcher
        .fetch(vec![QueueItem::root(name, constraint, dev)])
        .await?;

    let Some(version) = outcome.lock.dependencies.get(name).cloned() else {
        return Err(PkgError::not_found(&format!("{name}@{constraint}")));
    };

    let stats = outcome.stats;
    merge_on_add(&mut lock, outcome.lock)?;
    if !dev {
        lock.dev_dependencies.remove(name);
    }
    let removed = prune_unreachable(&mut lock)?;

    let recorded = if constraint.trim().is_empty() {
        format!("^{version}")
    } else {
        constraint.trim().to_string()
    };
    add_dependency(&package_json, name, &recorded, dev)?;

    let lockfile_written = write_lockfile_if_changed(project, &lock, hash.as_deref())?;
    info!(name, version = %version, dev, "added dependency");

    Ok(ResolveResult {
        lock,
        stats,
        installed: vec![name.to_string()],
        removed,
        lockfile_written,
    })
}

/// Remove one direct dependency and everything only it needed.
///
/// # Errors
/// Returns `PKG_ARGS_INVALID` if `name` is neither declared nor locked, or a
/// reconcile or write error.
pub fn remove(project: &Path, name: &str) -> Result<ResolveResult, PkgError> {
    let package_json = project.join("package.json");
    let declared = read_declared_deps(&package_json)?;
    let LoadedLock { mut lock, hash } = load_lock(project)?;

    let is_declared =
        declared.dependencies.contains_key(name) || declared.dev_dependencies.contains_key(name);
    if !is_declared && !lock.is_direct(name) {
        return Err(PkgError::args_invalid(format!(
            "'{name}' is not a dependency of this project"
        )));
    }

    let removed = dependents_to_remove(&lock, name)?;
    remove_from_lock(&mut lock, name, &removed);

    remove_dependency(&package_json, name)?;
    // A project that was never installed keeps having no lockfile.
    let lockfile_written = if hash.is_some() {
        write_lockfile_if_changed(project, &lock, hash.as_deref())?
    } else {
        false
    };
    info!(name, removed = removed.len(), "removed dependency");

    Ok(ResolveResult {
        lock,
        stats: FetchStats::default(),
        installed: Vec::new(),
        removed,
        lockfile_written,
    })
}

/// Keep `devDependencies` in the lock equal to the declared dev names it holds.
fn sync_dev_markers(lock: &mut PackageLock, declared_dev: &BTreeMap<String, String>) {
    lock.dev_dependencies = lock
        .dependencies
        .iter()
        .filter(|(name, _)| declared_dev.contains_key(*name))
        .map(|(name, version)| (name.clone(), version.clone()))
        .collect();
}

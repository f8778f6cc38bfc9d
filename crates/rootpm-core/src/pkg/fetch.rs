//! Concurrent fetch orchestration.
//!
//! Expands a set of root dependencies into a complete [`PackageLock`]:
//! every reachable `{name, version}` is resolved, downloaded into the package
//! cache and placed at a path key, at most once per pair.
//!
//! One driving loop owns all graph state (the lock being built, the
//! first-seen version of each name, the set of pairs already in flight).
//! Workers run on a [`JoinSet`] and report back with a [`Message`]; they never
//! touch graph state. The run ends when nothing is pending and the `JoinSet`
//! is empty, so spawned-but-unfinished work is always accounted for.
//!
//! Each item goes through two worker phases:
//!
//! 1. *resolve*: under the per-name lock, load the manifest (in-memory slot,
//!    then the on-disk cache, then a conditional registry fetch) and pick a
//!    version.
//! 2. *materialize*: download and extract the tarball unless
//!    `packages/<name>@<version>` already exists, then read the package's own
//!    dependencies.
//!
//! Root items are resolved before any transitive item is admitted, so every
//! direct dependency owns its flat slot.

use super::cache::PackageCache;
use super::deps::read_package_dependencies;
use super::error::PkgError;
use super::etag::EtagStore;
use super::lockfile::{flat_key, nested_key, PackageItem, PackageLock, ROOT_DEPS};
use super::manifest::Manifest;
use super::registry::RegistryClient;
use super::tarball::{download_tarball, extract_tgz_atomic, verify_shasum, MAX_TARBALL_SIZE};
use super::version::resolve_version;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Parent name carried by items seeded from the project's declared dependencies.
pub const ROOT_PARENT: &str = "package root";

/// Default bound on concurrent network requests.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 32;

/// A declared dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub name: String,
    pub constraint: String,
}

impl Dependency {
    #[must_use]
    pub fn new(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: constraint.into(),
        }
    }
}

/// A unit of work: one dependency requested by one parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub dependency: Dependency,
    /// Name of the requesting package, or [`ROOT_PARENT`].
    pub parent: String,
    /// Resolved version of the requesting package; empty for roots.
    pub parent_version: String,
    /// Whether this item descends from a devDependency.
    pub is_dev: bool,
}

impl QueueItem {
    /// An item seeded from the project's declared dependencies.
    #[must_use]
    pub fn root(name: impl Into<String>, constraint: impl Into<String>, is_dev: bool) -> Self {
        Self {
            dependency: Dependency::new(name, constraint),
            parent: ROOT_PARENT.to_string(),
            parent_version: String::new(),
            is_dev,
        }
    }

    /// Whether the item was seeded from the project.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent == ROOT_PARENT
    }

    fn child(parent: &ItemMeta, name: String, constraint: String) -> Self {
        Self {
            dependency: Dependency { name, constraint },
            parent: parent.name.clone(),
            parent_version: parent.version.clone(),
            is_dev: parent.is_dev,
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Bound on simultaneous manifest and tarball requests.
    pub max_concurrent_fetches: usize,
    /// Conditionally re-fetch each manifest once per run even if it is on disk.
    pub revalidate_manifests: bool,
    /// Check downloaded tarballs against the manifest shasum.
    pub verify_integrity: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            revalidate_manifests: false,
            verify_integrity: true,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Manifests downloaded with a `200`.
    pub manifests_fetched: usize,
    /// Conditional requests answered with `304`.
    pub manifests_not_modified: usize,
    /// Tarballs downloaded and extracted.
    pub tarballs_downloaded: usize,
    /// Packages already present in the package cache.
    pub cache_hits: usize,
    /// Constraints that resolved to nothing.
    pub unresolved: usize,
    /// Resolved packages dropped because every candidate path key was taken.
    pub unplaced: usize,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub lock: PackageLock,
    pub stats: FetchStats,
}

/// The fetch orchestrator.
#[derive(Debug, Clone)]
pub struct Fetcher {
    registry: RegistryClient,
    cache: PackageCache,
    options: FetchOptions,
}

impl Fetcher {
    #[must_use]
    pub fn new(registry: RegistryClient, cache: PackageCache, options: FetchOptions) -> Self {
        Self {
            registry,
            cache,
            options,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    #[must_use]
    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Resolve, download and place everything reachable from `items`.
    ///
    /// # Errors
    /// Returns the first fetch, parse or extract error. Work already in flight
    /// is drained before returning; nothing new is started after the failure.
    pub async fn fetch(&self, items: Vec<QueueItem>) -> Result<FetchOutcome, PkgError> {
        self.cache.ensure_dirs()?;

        let run = Arc::new(Run::new(self));
        let mut driver = Driver::new(items);
        let mut tasks: JoinSet<Result<Message, PkgError>> = JoinSet::new();
        let mut first_error: Option<PkgError> = None;

        info!(roots = driver.pending.len(), "resolving dependencies");

        loop {
            if first_error.is_none() {
                while let Some(task) = driver.pending.pop_front() {
                    let run = Arc::clone(&run);
                    match task {
                        Task::Resolve(item) => tasks.spawn(run.resolve(item)),
                        Task::Materialize(meta) => tasks.spawn(run.materialize(meta)),
                    };
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            let result = joined.unwrap_or_else(|e| {
                Err(PkgError::task_failed(format!("Fetch task failed: {e}")))
            });

            match result {
                Ok(message) if first_error.is_none() => driver.handle(message),
                Ok(_) => {}
                Err(e) => {
                    if first_error.is_none() {
                        warn!(error = %e, "aborting fetch run");
                        run.abort.store(true, Ordering::SeqCst);
                        first_error = Some(e);
                    } else {
                        debug!(error = %e, "error after abort");
                    }
                }
            }
        }

        if let Err(e) = run.save_etags() {
            warn!(error = %e, "failed to persist etag store");
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let stats = run.stats(driver.unresolved, driver.unplaced);
        info!(
            packages = driver.lock.packages.len(),
            manifests_fetched = stats.manifests_fetched,
            manifests_not_modified = stats.manifests_not_modified,
            tarballs_downloaded = stats.tarballs_downloaded,
            cache_hits = stats.cache_hits,
            unresolved = stats.unresolved,
            unplaced = stats.unplaced,
            "dependencies resolved"
        );

        Ok(FetchOutcome {
            lock: driver.lock,
            stats,
        })
    }
}

/// What a worker reports back to the driver.
#[derive(Debug)]
enum Message {
    Resolved {
        item: QueueItem,
        resolution: Option<Resolution>,
    },
    Materialized {
        id: String,
        dependencies: BTreeMap<String, String>,
    },
}

/// A picked version plus what the lock needs to know about it.
#[derive(Debug, Clone)]
struct Resolution {
    version: String,
    resolved: String,
    etag: String,
    integrity: String,
}

#[derive(Debug)]
enum Task {
    Resolve(QueueItem),
    Materialize(ItemMeta),
}

/// Everything about a `{name, version}` except its dependencies.
#[derive(Debug, Clone)]
struct ItemMeta {
    name: String,
    version: String,
    resolved: String,
    etag: String,
    integrity: String,
    is_dev: bool,
}

impl ItemMeta {
    fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Placement state of one `{name, version}`.
#[derive(Debug)]
enum Placement {
    /// Being materialized; these keys receive the item once it is done.
    Pending { meta: ItemMeta, keys: Vec<String> },
    Done(PackageItem),
}

#[derive(Debug)]
struct FirstSeen {
    version: String,
    parent: String,
}

/// Graph state, owned by the driving loop.
struct Driver {
    lock: PackageLock,
    first_seen: HashMap<String, FirstSeen>,
    placements: HashMap<String, Placement>,
    key_owner: HashMap<String, String>,
    pending: VecDeque<Task>,
    deferred: Vec<QueueItem>,
    roots_outstanding: usize,
    unresolved: usize,
    unplaced: usize,
}

impl Driver {
    fn new(items: Vec<QueueItem>) -> Self {
        let roots_outstanding = items.iter().filter(|i| i.is_root()).count();
        Self {
            lock: PackageLock::new(),
            first_seen: HashMap::new(),
            placements: HashMap::new(),
            key_owner: HashMap::new(),
            pending: items.into_iter().map(Task::Resolve).collect(),
            deferred: Vec::new(),
            roots_outstanding,
            unresolved: 0,
            unplaced: 0,
        }
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Resolved { item, resolution } => self.on_resolved(item, resolution),
            Message::Materialized { id, dependencies } => self.on_materialized(&id, dependencies),
        }
    }

    fn enqueue(&mut self, item: QueueItem) {
        if self.roots_outstanding > 0 {
            self.deferred.push(item);
        } else {
            self.pending.push_back(Task::Resolve(item));
        }
    }

    fn on_resolved(&mut self, item: QueueItem, resolution: Option<Resolution>) {
        if item.is_root() {
            self.roots_outstanding = self.roots_outstanding.saturating_sub(1);
            if self.roots_outstanding == 0 {
                let deferred = std::mem::take(&mut self.deferred);
                self.pending.extend(deferred.into_iter().map(Task::Resolve));
            }
        }

        let name = item.dependency.name.as_str();
        let Some(resolution) = resolution else {
            warn!(
                name,
                constraint = %item.dependency.constraint,
                parent = %item.parent,
                "no version satisfies constraint; skipping"
            );
            self.unresolved += 1;
            return;
        };

        if item.is_root() {
            self.lock
                .dependencies
                .insert(name.to_string(), resolution.version.clone());
            if item.is_dev {
                self.lock
                    .dev_dependencies
                    .insert(name.to_string(), resolution.version.clone());
            }
        }

        let key = match self.first_seen.get(name) {
            None => {
                self.first_seen.insert(
                    name.to_string(),
                    FirstSeen {
                        version: resolution.version.clone(),
                        parent: item.parent.clone(),
                    },
                );
                flat_key(name)
            }
            Some(seen) if seen.version == resolution.version => return,
            Some(seen) => {
                debug!(
                    name,
                    version = %resolution.version,
                    flat_version = %seen.version,
                    flat_parent = %seen.parent,
                    parent = %item.parent,
                    "version conflict; nesting under parent"
                );
                nested_key(&item.parent, name)
            }
        };

        let meta = ItemMeta {
            name: name.to_string(),
            version: resolution.version,
            resolved: resolution.resolved,
            etag: resolution.etag,
            integrity: resolution.integrity,
            is_dev: item.is_dev,
        };
        let id = meta.id();

        let key = match self.key_owner.get(&key) {
            None => key,
            Some(owner) if *owner == id => return,
            Some(_) => {
                // Two versions of the parent want different versions of `name`.
                let fallback = format!(
                    "{ROOT_DEPS}/{}@{}/{ROOT_DEPS}/{name}",
                    item.parent, item.parent_version
                );
                if self.key_owner.contains_key(&fallback) {
                    warn!(name, id = %id, key = %fallback, "path key already taken; skipping");
                    self.unplaced += 1;
                    return;
                }
                fallback
            }
        };
        self.key_owner.insert(key.clone(), id.clone());

        match self.placements.entry(id) {
            Entry::Vacant(slot) => {
                self.pending.push_back(Task::Materialize(meta.clone()));
                slot.insert(Placement::Pending {
                    meta,
                    keys: vec![key],
                });
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                Placement::Pending { keys, .. } => keys.push(key),
                Placement::Done(package) => {
                    self.lock.packages.insert(key, package.clone());
                }
            },
        }
    }

    fn on_materialized(&mut self, id: &str, dependencies: BTreeMap<String, String>) {
        let Some(Placement::Pending { meta, keys }) = self.placements.remove(id) else {
            warn!(id, "materialized a package that was never scheduled");
            return;
        };

        let package = PackageItem {
            name: meta.name.clone(),
            version: meta.version.clone(),
            resolved: meta.resolved.clone(),
            etag: meta.etag.clone(),
            integrity: meta.integrity.clone(),
            dependencies,
        };

        for key in keys {
            self.lock.packages.insert(key, package.clone());
        }

        for (name, constraint) in &package.dependencies {
            self.enqueue(QueueItem::child(&meta, name.clone(), constraint.clone()));
        }

        self.placements
            .insert(id.to_string(), Placement::Done(package));
    }
}

/// Per-name lock contents: the manifest parsed during this run.
#[derive(Debug, Default)]
struct NameSlot {
    manifest: Option<Arc<Manifest>>,
}

/// State shared by the workers of one run.
struct Run {
    registry: RegistryClient,
    cache: PackageCache,
    options: FetchOptions,
    slots: StdMutex<HashMap<String, Arc<Mutex<NameSlot>>>>,
    etags: StdMutex<EtagStore>,
    network: Semaphore,
    abort: AtomicBool,
    manifests_fetched: AtomicUsize,
    manifests_not_modified: AtomicUsize,
    tarballs_downloaded: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl Run {
    fn new(fetcher: &Fetcher) -> Self {
        Self {
            registry: fetcher.registry.clone(),
            cache: fetcher.cache.clone(),
            options: fetcher.options.clone(),
            slots: StdMutex::new(HashMap::new()),
            etags: StdMutex::new(EtagStore::load(&fetcher.cache.etag_path())),
            network: Semaphore::new(fetcher.options.max_concurrent_fetches.max(1)),
            abort: AtomicBool::new(false),
            manifests_fetched: AtomicUsize::new(0),
            manifests_not_modified: AtomicUsize::new(0),
            tarballs_downloaded: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        }
    }

    fn stats(&self, unresolved: usize, unplaced: usize) -> FetchStats {
        FetchStats {
            manifests_fetched: self.manifests_fetched.load(Ordering::Relaxed),
            manifests_not_modified: self.manifests_not_modified.load(Ordering::Relaxed),
            tarballs_downloaded: self.tarballs_downloaded.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            unresolved,
            unplaced,
        }
    }

    fn check_abort(&self) -> Result<(), PkgError> {
        if self.abort.load(Ordering::SeqCst) {
            Err(PkgError::task_failed("Fetch run aborted"))
        } else {
            Ok(())
        }
    }

    /// Look up or create the lock for `name`. The registry mutex is only held
    /// for the lookup, never while the per-name lock is held.
    fn slot(&self, name: &str) -> Arc<Mutex<NameSlot>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    fn etag(&self, name: &str) -> Option<String> {
        let etags = self.etags.lock().unwrap_or_else(PoisonError::into_inner);
        etags.get(name).map(String::from)
    }

    fn remember_etag(&self, name: &str, etag: &str) {
        let mut etags = self.etags.lock().unwrap_or_else(PoisonError::into_inner);
        etags.set(name, etag);
    }

    fn save_etags(&self) -> Result<(), PkgError> {
        let mut etags = self.etags.lock().unwrap_or_else(PoisonError::into_inner);
        etags.save()
    }

    async fn resolve(self: Arc<Self>, item: QueueItem) -> Result<Message, PkgError> {
        self.check_abort()?;

        let name = item.dependency.name.clone();
        let manifest = {
            let slot = self.slot(&name);
            let mut guard = slot.lock().await;
            match &guard.manifest {
                Some(manifest) => Arc::clone(manifest),
                None => {
                    let manifest = Arc::new(self.load_manifest(&name).await?);
                    guard.manifest = Some(Arc::clone(&manifest));
                    manifest
                }
            }
        };

        let resolution =
            resolve_version(&item.dependency.constraint, &manifest).map(|version| {
                let record = manifest.get(&version);
                let resolved = record
                    .map(|r| r.dist.tarball.clone())
                    .filter(|url| !url.is_empty())
                    .unwrap_or_else(|| self.registry.tarball_url_fallback(&name, &version));
                let integrity = record.map(|r| r.dist.shasum.clone()).unwrap_or_default();

                Resolution {
                    version,
                    resolved,
                    etag: self.etag(&name).unwrap_or_default(),
                    integrity,
                }
            });

        if let Some(r) = &resolution {
            debug!(
                name = %name,
                constraint = %item.dependency.constraint,
                version = %r.version,
                "resolved"
            );
        }

        Ok(Message::Resolved { item, resolution })
    }

    /// Load a manifest: on-disk cache first, then a conditional fetch.
    async fn load_manifest(&self, name: &str) -> Result<Manifest, PkgError> {
        let path = self.cache.manifest_path(name);
        let on_disk = self.cache.has_manifest(name);

        if on_disk && !self.options.revalidate_manifests {
            match Manifest::read_from(&path) {
                Ok(manifest) => return Ok(manifest),
                Err(e) => warn!(name, error = %e, "cached manifest unreadable; refetching"),
            }
        }

        self.check_abort()?;
        let known_etag = if on_disk { self.etag(name) } else { None };

        let fetched = {
            let _permit = self
                .network
                .acquire()
                .await
                .map_err(|e| PkgError::task_failed(format!("Network semaphore closed: {e}")))?;
            self.registry
                .fetch_manifest(name, known_etag.as_deref(), &path)
                .await?
        };

        if let Some(etag) = &fetched.etag {
            self.remember_etag(name, etag);
        }

        match fetched.manifest {
            Some(manifest) => {
                self.manifests_fetched.fetch_add(1, Ordering::Relaxed);
                Ok(manifest)
            }
            None => {
                self.manifests_not_modified.fetch_add(1, Ordering::Relaxed);
                Manifest::read_from(&path)
            }
        }
    }

    async fn materialize(self: Arc<Self>, meta: ItemMeta) -> Result<Message, PkgError> {
        self.check_abort()?;

        let dir = self.cache.package_dir(&meta.name, &meta.version);

        if self.cache.is_cached(&meta.name, &meta.version) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(name = %meta.name, version = %meta.version, "package cache hit");
        } else {
            let bytes = {
                let _permit = self.network.acquire().await.map_err(|e| {
                    PkgError::task_failed(format!("Network semaphore closed: {e}"))
                })?;
                self.check_abort()?;
                download_tarball(self.registry.http(), &meta.resolved, MAX_TARBALL_SIZE).await?
            };

            if self.options.verify_integrity {
                verify_shasum(&bytes, &meta.integrity, &meta.name, &meta.version)?;
            }

            let dest = dir.clone();
            tokio::task::spawn_blocking(move || extract_tgz_atomic(&bytes, &dest))
                .await
                .map_err(|e| PkgError::task_failed(format!("Extract task failed: {e}")))??;

            self.tarballs_downloaded.fetch_add(1, Ordering::Relaxed);
            debug!(name = %meta.name, version = %meta.version, "package extracted");
        }

        let dependencies = read_package_dependencies(&dir)?;

        Ok(Message::Materialized {
            id: meta.id(),
            dependencies,
        })
    }
}

//! Package manager functionality.
//!
//! Provides utilities for:
//! - Parsing registry manifests and resolving version constraints
//! - Fetching manifests with ETag revalidation
//! - Downloading, verifying and extracting tarballs into the package cache
//! - Reading and editing dependencies in package.json
//! - Concurrent fetch orchestration with conflict placement
//! - Deterministic lockfile reading, writing and reconciliation

pub mod cache;
pub mod deps;
pub mod error;
pub mod etag;
pub mod fetch;
pub mod lockfile;
pub mod manifest;
pub mod reconcile;
pub mod registry;
pub mod resolve;
pub mod tarball;
pub mod version;

pub use cache::PackageCache;
pub use deps::{
    add_dependency, read_declared_deps, read_package_dependencies, remove_dependency,
    DeclaredDeps, PkgDepError,
};
pub use error::{codes as pkg_codes, PkgError};
pub use etag::{EtagEntry, EtagStore};
pub use fetch::{
    Dependency, FetchOptions, FetchOutcome, FetchStats, Fetcher, QueueItem,
    DEFAULT_MAX_CONCURRENT_FETCHES, ROOT_PARENT,
};
pub use lockfile::{
    codes as lockfile_codes, flat_key, nested_key, LockfileError, PackageItem, PackageLock,
    LOCKFILE_NAME, ROOT_DEPS,
};
pub use manifest::{Dist, DistTags, Manifest, VersionRecord};
pub use reconcile::{
    dependents_to_remove, diff, merge_on_add, prune_dev_only, prune_unreachable, remove_from_lock,
    LockDiff,
};
pub use registry::{ManifestFetch, RegistryClient, DEFAULT_REGISTRY};
pub use resolve::{
    add, fetcher_from_config, install, lockfile_path, remove, write_lockfile_if_changed,
    ResolveOptions, ResolveResult,
};
pub use tarball::{download_tarball, extract_tgz_atomic, verify_shasum, MAX_TARBALL_SIZE};
pub use version::{resolve_version, version_satisfies};

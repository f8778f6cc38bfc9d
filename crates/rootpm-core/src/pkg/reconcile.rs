//! Lockfile reconciliation.
//!
//! Compares declared dependencies against a lock, works out what a removal
//! leaves unreachable, and merges the output of a fetch run into an existing
//! lock without overwriting packages other owners still rely on.
//!
//! Walks over the lock follow path keys. A dependency `c` of the package at
//! `owner` is looked up, in order, at `<owner>/root-deps/c`, at
//! `root-deps/<owner-name>/root-deps/c`, then at the flat `root-deps/c`.

use super::fetch::QueueItem;
use super::lockfile::{
    codes, flat_key, name_from_key, nested_key, relocated_key, LockfileError, PackageItem,
    PackageLock,
};
use super::version::version_satisfies;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::debug;

/// Outcome of [`diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockDiff {
    /// Declared roots that are missing from the lock or locked at a version
    /// the constraint no longer accepts. Sorted by name.
    pub to_install: Vec<QueueItem>,
    /// Locked top-level names no longer declared anywhere. Sorted.
    pub to_remove: Vec<String>,
}

impl LockDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty()
    }
}

/// Compare declared dependencies against the lock's top-level map.
#[must_use]
pub fn diff(
    declared: &BTreeMap<String, String>,
    declared_dev: &BTreeMap<String, String>,
    locked: &BTreeMap<String, String>,
) -> LockDiff {
    let mut to_install: Vec<QueueItem> = declared
        .iter()
        .map(|(n, c)| (n, c, false))
        .chain(
            declared_dev
                .iter()
                .filter(|(n, _)| !declared.contains_key(*n))
                .map(|(n, c)| (n, c, true)),
        )
        .filter(|(name, constraint, _)| match locked.get(*name) {
            None => true,
            Some(version) => *version != **constraint && !version_satisfies(constraint, version),
        })
        .map(|(name, constraint, is_dev)| QueueItem::root(name.clone(), constraint.clone(), is_dev))
        .collect();
    to_install.sort_by(|a, b| a.dependency.name.cmp(&b.dependency.name));

    let to_remove = locked
        .keys()
        .filter(|name| !declared.contains_key(*name) && !declared_dev.contains_key(*name))
        .cloned()
        .collect();

    LockDiff {
        to_install,
        to_remove,
    }
}

/// Path keys that become unreachable once the direct dependency `target` is
/// removed, in visit order.
///
/// Packages still reachable from any other direct dependency are kept.
///
/// # Errors
/// Returns `PKG_LOCK_INCONSISTENT` if a direct dependency has no flat entry.
pub fn dependents_to_remove(
    lock: &PackageLock,
    target: &str,
) -> Result<Vec<String>, LockfileError> {
    if !lock.dependencies.contains_key(target) {
        return Ok(Vec::new());
    }

    let others: Vec<&str> = lock
        .dependencies
        .keys()
        .map(String::as_str)
        .filter(|name| *name != target)
        .collect();

    let keep: HashSet<String> = walk(lock, &others, &HashSet::new())?.into_iter().collect();
    walk(lock, &[target], &keep)
}

/// Drop `target` from the top-level maps and delete `removed` path keys
/// (plus anything nested beneath them).
pub fn remove_from_lock(lock: &mut PackageLock, target: &str, removed: &[String]) {
    lock.dependencies.remove(target);
    lock.dev_dependencies.remove(target);

    for key in removed {
        let prefix = format!("{key}/");
        lock.packages
            .retain(|k, _| k != key && !k.starts_with(&prefix));
    }
}

/// Remove every package reachable only from dev dependencies.
///
/// Returns the removed path keys.
///
/// # Errors
/// Returns `PKG_LOCK_INCONSISTENT` if a direct dependency has no flat entry.
pub fn prune_dev_only(lock: &mut PackageLock) -> Result<Vec<String>, LockfileError> {
    let prod: Vec<&str> = lock
        .dependencies
        .keys()
        .map(String::as_str)
        .filter(|name| !lock.dev_dependencies.contains_key(*name))
        .collect();
    let dev: Vec<String> = lock.dev_dependencies.keys().cloned().collect();
    let dev_refs: Vec<&str> = dev.iter().map(String::as_str).collect();

    let keep: HashSet<String> = walk(lock, &prod, &HashSet::new())?.into_iter().collect();
    let removed = walk(lock, &dev_refs, &keep)?;

    for name in &dev {
        remove_from_lock(lock, name, &[]);
    }
    for key in &removed {
        let prefix = format!("{key}/");
        lock.packages
            .retain(|k, _| k != key && !k.starts_with(&prefix));
    }

    debug!(removed = removed.len(), "pruned dev-only packages");
    Ok(removed)
}

/// Remove every package no direct dependency can reach.
///
/// Returns the removed path keys.
///
/// # Errors
/// Returns `PKG_LOCK_INCONSISTENT` if a direct dependency has no flat entry.
pub fn prune_unreachable(lock: &mut PackageLock) -> Result<Vec<String>, LockfileError> {
    let roots: Vec<&str> = lock.dependencies.keys().map(String::as_str).collect();
    let reachable: HashSet<String> = walk(lock, &roots, &HashSet::new())?.into_iter().collect();

    let removed: Vec<String> = lock
        .packages
        .keys()
        .filter(|key| !reachable.contains(*key))
        .cloned()
        .collect();
    for key in &removed {
        lock.packages.remove(key);
    }

    if !removed.is_empty() {
        debug!(removed = removed.len(), "pruned unreachable packages");
    }
    Ok(removed)
}

/// Merge the output of a fetch run into an existing lock.
///
/// When a fresh entry takes a key that currently holds a different version,
/// the old entry (with everything nested under it) is first copied under
/// every owner that resolves that name to the key, so those owners keep the
/// version they were locked against. Owners that are themselves being
/// replaced are skipped.
///
/// A direct dependency of `existing` that the fresh run did not request keeps
/// its flat slot. A fresh transitive copy of the same name at another version
/// is moved under each fresh package that needs it instead.
///
/// # Errors
/// Returns `PKG_LOCK_CONFLICT` if a relocation target already holds a
/// different version, or if a fresh copy of a direct dependency has no fresh
/// owner to move under.
pub fn merge_on_add(
    existing: &mut PackageLock,
    mut fresh: PackageLock,
) -> Result<(), LockfileError> {
    pin_direct_dependencies(existing, &mut fresh)?;
    let (relocations, vacated) = plan_relocations(existing, &fresh)?;

    for key in vacated {
        existing.packages.remove(&key);
    }
    for (key, item) in relocations {
        existing.packages.insert(key, item);
    }
    existing.packages.extend(fresh.packages);
    existing.dependencies.extend(fresh.dependencies);
    existing.dev_dependencies.extend(fresh.dev_dependencies);

    Ok(())
}

type Relocation = (String, PackageItem);

/// Move fresh entries that would take the flat slot of one of `existing`'s
/// direct dependencies beneath the fresh packages that resolve to them.
fn pin_direct_dependencies(
    existing: &PackageLock,
    fresh: &mut PackageLock,
) -> Result<(), LockfileError> {
    let displaced: Vec<String> = existing
        .dependencies
        .keys()
        .filter(|name| !fresh.dependencies.contains_key(*name))
        .map(String::as_str)
        .map(flat_key)
        .filter(|key| match (existing.packages.get(key), fresh.packages.get(key)) {
            (Some(old), Some(new)) => old.version != new.version,
            _ => false,
        })
        .collect();

    for key in displaced {
        let name = name_from_key(&key).to_string();
        let view: &PackageLock = fresh;
        let owners: Vec<String> = view
            .packages
            .iter()
            .filter(|(owner_key, owner)| {
                **owner_key != key
                    && !is_beneath(owner_key, &key)
                    && owner.dependencies.contains_key(&name)
                    && locate(view, owner_key, &owner.name, &name).as_deref() == Some(key.as_str())
            })
            .map(|(owner_key, _)| owner_key.clone())
            .collect();

        if owners.is_empty() {
            let (old, new) = (&existing.packages[&key], &fresh.packages[&key]);
            return Err(LockfileError::new(
                codes::PKG_LOCK_CONFLICT,
                format!(
                    "{name}@{} would replace direct dependency {name}@{} at '{key}'",
                    new.version, old.version
                ),
            ));
        }

        let moved = subtree(fresh, &key);
        for (sub_key, _) in &moved {
            fresh.packages.remove(sub_key);
        }
        for owner_key in &owners {
            let target = relocated_key(owner_key, &name);
            for (sub_key, item) in &moved {
                let dest = format!("{target}{}", &sub_key[key.len()..]);
                debug!(from = %sub_key, to = %dest, "keeping direct dependency flat");
                fresh.packages.insert(dest, item.clone());
            }
        }
    }

    Ok(())
}

/// Work out the copies and deletions a merge needs, without touching the lock.
fn plan_relocations(
    existing: &PackageLock,
    fresh: &PackageLock,
) -> Result<(Vec<Relocation>, Vec<String>), LockfileError> {
    let replaced: HashSet<&String> = fresh
        .packages
        .iter()
        .filter(|(key, item)| {
            existing
                .packages
                .get(*key)
                .is_some_and(|old| old.version != item.version)
        })
        .map(|(key, _)| key)
        .collect();

    let mut relocations = Vec::new();
    let mut vacated = Vec::new();

    for key in &replaced {
        let Some(old) = existing.packages.get(*key) else {
            continue;
        };
        let name = old.name.as_str();

        let owners = existing.packages.iter().filter(|(owner_key, owner)| {
            owner_key != key
                && !replaced.contains(owner_key)
                && !is_beneath(owner_key, key)
                && owner.dependencies.contains_key(name)
                && locate(existing, owner_key, &owner.name, name).as_deref() == Some(key.as_str())
        });

        let moved = subtree(existing, key);
        for (owner_key, _) in owners {
            let target = relocated_key(owner_key, name);
            for (sub_key, item) in &moved {
                let dest = format!("{target}{}", &sub_key[key.len()..]);
                if let Some(occupant) = existing.packages.get(&dest) {
                    if occupant.version != item.version {
                        return Err(LockfileError::new(
                            codes::PKG_LOCK_CONFLICT,
                            format!(
                                "Cannot relocate {}@{} to '{dest}': already holds {}",
                                item.name, item.version, occupant.version
                            ),
                        ));
                    }
                    continue;
                }
                debug!(from = %sub_key, to = %dest, "relocating package");
                relocations.push((dest, item.clone()));
            }
        }

        vacated.extend(
            moved
                .into_iter()
                .map(|(k, _)| k)
                .filter(|k| k != *key && !fresh.packages.contains_key(k)),
        );
    }

    Ok((relocations, vacated))
}

/// Where the package at `owner_key` finds its dependency `name`.
fn locate(lock: &PackageLock, owner_key: &str, owner_name: &str, name: &str) -> Option<String> {
    [
        relocated_key(owner_key, name),
        nested_key(owner_name, name),
        flat_key(name),
    ]
    .into_iter()
    .find(|key| lock.packages.contains_key(key))
}

fn is_beneath(key: &str, ancestor: &str) -> bool {
    key.len() > ancestor.len() && key.starts_with(ancestor) && key[ancestor.len()..].starts_with('/')
}

/// `key` and every entry nested beneath it.
fn subtree(lock: &PackageLock, key: &str) -> Vec<(String, PackageItem)> {
    lock.packages
        .range(key.to_string()..)
        .take_while(|(k, _)| k.starts_with(key))
        .filter(|(k, _)| *k == key || is_beneath(k, key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Breadth-first walk from the flat entries of `roots`, never entering `stop`.
fn walk(
    lock: &PackageLock,
    roots: &[&str],
    stop: &HashSet<String>,
) -> Result<Vec<String>, LockfileError> {
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut order = Vec::new();

    for root in roots {
        let key = flat_key(root);
        if !lock.packages.contains_key(&key) {
            return Err(LockfileError::new(
                codes::PKG_LOCK_INCONSISTENT,
                format!("Direct dependency '{root}' has no entry at '{key}'"),
            ));
        }
        if !stop.contains(&key) && seen.insert(key.clone()) {
            queue.push_back(key);
        }
    }

    while let Some(key) = queue.pop_front() {
        let Some(item) = lock.packages.get(&key) else {
            continue;
        };
        order.push(key.clone());

        let owner_name = name_from_key(&key);
        for dep in item.dependencies.keys() {
            let Some(child) = locate(lock, &key, owner_name, dep) else {
                debug!(owner = %key, dep = %dep, "dependency not present in lock");
                continue;
            };
            if !stop.contains(&child) && seen.insert(child.clone()) {
                queue.push_back(child);
            }
        }
    }

    Ok(order)
}

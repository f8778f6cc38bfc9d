//! Version constraint resolution.
//!
//! Resolves a constraint string against a manifest's published versions. The
//! grammar is the subset of npm ranges seen in practice, checked in a fixed
//! precedence order (first match wins):
//!
//! 1. empty -> `dist-tags.latest`
//! 2. `a || b` -> highest result of the alternatives
//! 3. `^1.2.3` -> highest `>= 1.2.3` with the same major
//! 4. `~1.2.3` -> highest `>= 1.2.3` with the same major and minor
//! 5. `>=1.0.0 <2.0.0` -> highest inside both bounds
//! 6. a lone comparison or hyphen range -> unsupported, no result
//! 7. `*` / `latest` -> `dist-tags.latest`
//! 8. `1.x`, `1.2.X` -> highest matching the fixed leading segments
//! 9. anything else -> that exact version if published, else `dist-tags.latest`
//!
//! An unsatisfiable constraint yields `None`; callers treat that as a warning,
//! not an error.

use super::manifest::Manifest;
use semver::Version;
use std::cmp::Ordering;

/// A bound of a compound range.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

/// A classified constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Constraint<'a> {
    Latest,
    Or(Vec<&'a str>),
    Caret(Version),
    Tilde(Version),
    Range { lower: Bound, upper: Bound },
    Unsupported,
    Wildcard { major: Option<u64>, minor: Option<u64> },
    Exact(&'a str),
}

impl<'a> Constraint<'a> {
    fn parse(raw: &'a str) -> Self {
        let s = raw.trim();

        if s.is_empty() {
            return Self::Latest;
        }

        if s.contains("||") {
            return Self::Or(s.split("||").map(str::trim).collect());
        }

        if let Some(base) = s.strip_prefix('^') {
            return parse_partial(base).map_or(Self::Unsupported, Self::Caret);
        }

        if let Some(base) = s.strip_prefix('~') {
            return parse_partial(base).map_or(Self::Unsupported, Self::Tilde);
        }

        if s.contains('>') && s.contains('<') {
            return parse_bounds(s)
                .map_or(Self::Unsupported, |(lower, upper)| Self::Range { lower, upper });
        }

        if s.starts_with(['>', '<']) || s.contains(" - ") {
            return Self::Unsupported;
        }

        if s == "*" || s == "latest" {
            return Self::Latest;
        }

        if s.contains(['x', 'X']) {
            return parse_wildcard(s);
        }

        Self::Exact(s)
    }

    fn matches(&self, candidate: &Version) -> bool {
        match self {
            Self::Caret(base) => candidate >= base && candidate.major == base.major,
            Self::Tilde(base) => {
                candidate >= base && candidate.major == base.major && candidate.minor == base.minor
            }
            Self::Range { lower, upper } => {
                let above = if lower.inclusive {
                    candidate >= &lower.version
                } else {
                    candidate > &lower.version
                };
                let below = if upper.inclusive {
                    candidate <= &upper.version
                } else {
                    candidate < &upper.version
                };
                above && below
            }
            Self::Wildcard { major, minor } => {
                major.map_or(true, |m| candidate.major == m)
                    && minor.map_or(true, |m| candidate.minor == m)
            }
            Self::Latest | Self::Or(_) | Self::Unsupported | Self::Exact(_) => false,
        }
    }
}

/// Resolve `constraint` against `manifest`.
///
/// Returns the chosen version string, or `None` when nothing satisfies it.
#[must_use]
pub fn resolve_version(constraint: &str, manifest: &Manifest) -> Option<String> {
    let latest = || manifest.latest().map(String::from);

    match Constraint::parse(constraint) {
        Constraint::Latest => latest(),
        Constraint::Or(alternatives) => alternatives
            .into_iter()
            .filter_map(|alt| resolve_version(alt, manifest))
            .max_by(|a, b| compare_versions(a, b)),
        Constraint::Unsupported => None,
        Constraint::Exact(version) => {
            if manifest.versions.contains_key(version) {
                Some(version.to_string())
            } else {
                latest()
            }
        }
        range => highest_matching(manifest, |v| range.matches(v)),
    }
}

/// Whether a concrete `version` satisfies `constraint` under the same rules.
///
/// `latest`-style constraints accept any version, unsupported ones accept none
/// and exact constraints require string equality.
#[must_use]
pub fn version_satisfies(constraint: &str, version: &str) -> bool {
    match Constraint::parse(constraint) {
        Constraint::Latest => true,
        Constraint::Or(alternatives) => alternatives
            .into_iter()
            .any(|alt| version_satisfies(alt, version)),
        Constraint::Unsupported => false,
        Constraint::Exact(exact) => exact == version.trim(),
        range => Version::parse(version.trim()).is_ok_and(|v| range.matches(&v)),
    }
}

/// Highest published version accepted by `pred`. Unparseable keys are skipped.
fn highest_matching(manifest: &Manifest, pred: impl Fn(&Version) -> bool) -> Option<String> {
    manifest
        .versions
        .keys()
        .filter_map(|key| Version::parse(key).ok().map(|v| (key, v)))
        .filter(|(_, v)| pred(v))
        .max_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(key, _)| key.clone())
}

/// Semver ordering; strings that are not semver sort below those that are.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Parse a possibly partial version, padding `1` and `1.2` with zeros.
fn parse_partial(s: &str) -> Option<Version> {
    let s = s.trim();
    if let Ok(v) = Version::parse(s) {
        return Some(v);
    }

    let parts: Vec<&str> = s.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return None;
    }
    let major = parts[0].parse().ok()?;
    let minor = match parts.get(1) {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    Some(Version::new(major, minor, 0))
}

/// Parse `>=a <b` style bounds. Operators may be attached to their version or
/// stand alone as a separate token.
fn parse_bounds(s: &str) -> Option<(Bound, Bound)> {
    let mut lower = None;
    let mut upper = None;
    let mut tokens = s.split_whitespace();

    while let Some(token) = tokens.next() {
        let (op, rest) = split_operator(token)?;
        let raw = if rest.is_empty() { tokens.next()? } else { rest };
        let version = parse_partial(raw)?;

        match op {
            ">=" => lower = Some(Bound { version, inclusive: true }),
            ">" => lower = Some(Bound { version, inclusive: false }),
            "<=" => upper = Some(Bound { version, inclusive: true }),
            "<" => upper = Some(Bound { version, inclusive: false }),
            _ => return None,
        }
    }

    Some((lower?, upper?))
}

fn split_operator(token: &str) -> Option<(&str, &str)> {
    [">=", "<=", ">", "<"]
        .into_iter()
        .find_map(|op| token.strip_prefix(op).map(|rest| (op, rest)))
}

/// Segments left of the first wildcard are pinned; only major and minor count.
/// A bare wildcard means latest.
fn parse_wildcard(s: &str) -> Constraint<'_> {
    let is_wild = |seg: &str| matches!(seg, "x" | "X" | "*");
    if is_wild(s) {
        return Constraint::Latest;
    }

    let mut pinned = Vec::with_capacity(2);
    for seg in s.split('.').take(2) {
        if is_wild(seg) {
            break;
        }
        match seg.parse::<u64>() {
            Ok(n) => pinned.push(n),
            Err(_) => return Constraint::Unsupported,
        }
    }

    Constraint::Wildcard {
        major: pinned.first().copied(),
        minor: pinned.get(1).copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::manifest::{DistTags, VersionRecord};

    fn make_manifest(versions: &[&str], latest: &str) -> Manifest {
        Manifest {
            name: "test-pkg".to_string(),
            dist_tags: DistTags {
                latest: latest.to_string(),
            },
            versions: versions
                .iter()
                .map(|v| {
                    (
                        (*v).to_string(),
                        VersionRecord {
                            version: (*v).to_string(),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        }
    }

    fn standard() -> Manifest {
        make_manifest(
            &[
                "0.9.0", "1.0.0", "1.1.0", "1.2.0", "1.2.5", "1.9.3", "2.0.0", "2.1.0", "3.0.0",
            ],
            "2.1.0",
        )
    }

    fn resolve(constraint: &str) -> Option<String> {
        resolve_version(constraint, &standard())
    }

    #[test]
    fn test_empty_is_latest() {
        assert_eq!(resolve("").as_deref(), Some("2.1.0"));
        assert_eq!(resolve("   ").as_deref(), Some("2.1.0"));
    }

    #[test]
    fn test_star_and_latest() {
        assert_eq!(resolve("*").as_deref(), Some("2.1.0"));
        assert_eq!(resolve("latest").as_deref(), Some("2.1.0"));
        assert_eq!(resolve("x").as_deref(), Some("2.1.0"));
    }

    #[test]
    fn test_caret() {
        assert_eq!(resolve("^1.2.0").as_deref(), Some("1.9.3"));
        assert_eq!(resolve("^2.0.0").as_deref(), Some("2.1.0"));
        assert_eq!(resolve("^1").as_deref(), Some("1.9.3"));
        assert_eq!(resolve("^4.0.0"), None);
    }

    #[test]
    fn test_caret_zero_major_is_major_only() {
        let manifest = make_manifest(&["0.1.0", "0.1.5", "0.2.0", "1.0.0"], "1.0.0");
        assert_eq!(
            resolve_version("^0.1.0", &manifest).as_deref(),
            Some("0.2.0")
        );
    }

    #[test]
    fn test_caret_never_crosses_major() {
        for constraint in ["^1.0.0", "^1.2.0", "^1.9.3"] {
            let v = Version::parse(&resolve(constraint).unwrap()).unwrap();
            assert_eq!(v.major, 1, "{constraint}");
        }
    }

    #[test]
    fn test_tilde() {
        assert_eq!(resolve("~1.2.0").as_deref(), Some("1.2.5"));
        assert_eq!(resolve("~1.2.3").as_deref(), Some("1.2.5"));
        assert_eq!(resolve("~1.3.0"), None);
        assert_eq!(resolve("~1.2").as_deref(), Some("1.2.5"));
    }

    #[test]
    fn test_or() {
        assert_eq!(resolve("^1.0.0 || ^2.0.0").as_deref(), Some("2.1.0"));
        assert_eq!(resolve("^1.0.0 || ^5.0.0").as_deref(), Some("1.9.3"));
        assert_eq!(resolve("^7.0.0 || ^5.0.0"), None);
    }

    #[test]
    fn test_or_is_max_of_alternatives() {
        let a = resolve("~1.2.0").unwrap();
        let b = resolve("^2.0.0").unwrap();
        let both = resolve("~1.2.0 || ^2.0.0").unwrap();
        assert_eq!(both, std::cmp::max_by(a, b, |x, y| compare_versions(x, y)));
    }

    #[test]
    fn test_compound_range() {
        assert_eq!(resolve(">=1.0.0 <2.0.0").as_deref(), Some("1.9.3"));
        assert_eq!(resolve(">=1.0.0 <=2.0.0").as_deref(), Some("2.0.0"));
        assert_eq!(resolve(">1.0.0 <1.2.0").as_deref(), Some("1.1.0"));
        assert_eq!(resolve(">= 1.0.0 < 2.0.0").as_deref(), Some("1.9.3"));
        assert_eq!(resolve(">=1.2 <2").as_deref(), Some("1.9.3"));
    }

    #[test]
    fn test_compound_range_exclusive_lower() {
        assert_eq!(resolve(">2.1.0 <3.0.0"), None);
        assert_eq!(resolve(">=2.1.0 <3.0.0").as_deref(), Some("2.1.0"));
    }

    #[test]
    fn test_unsupported_forms() {
        assert_eq!(resolve(">=1.0.0"), None);
        assert_eq!(resolve("<2.0.0"), None);
        assert_eq!(resolve(">1.0.0"), None);
        assert_eq!(resolve("<=2.0.0"), None);
        assert_eq!(resolve("1.0.0 - 2.0.0"), None);
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(resolve("1.x").as_deref(), Some("1.9.3"));
        assert_eq!(resolve("1.2.x").as_deref(), Some("1.2.5"));
        assert_eq!(resolve("1.X").as_deref(), Some("1.9.3"));
        assert_eq!(resolve("2.x.x").as_deref(), Some("2.1.0"));
        assert_eq!(resolve("5.x"), None);
    }

    #[test]
    fn test_leading_wildcard_takes_highest() {
        let manifest = make_manifest(&["1.0.0", "2.0.0"], "1.0.0");
        assert_eq!(resolve_version("x", &manifest).as_deref(), Some("1.0.0"));
        assert_eq!(resolve_version("x.x", &manifest).as_deref(), Some("2.0.0"));
        assert_eq!(resolve_version("x.x.x", &manifest).as_deref(), Some("2.0.0"));
        assert_eq!(resolve_version("X.1.x", &manifest).as_deref(), Some("2.0.0"));
        assert!(version_satisfies("x.x.x", "2.0.0"));
    }

    #[test]
    fn test_exact() {
        assert_eq!(resolve("1.2.0").as_deref(), Some("1.2.0"));
        assert_eq!(resolve("0.9.0").as_deref(), Some("0.9.0"));
    }

    #[test]
    fn test_exact_miss_falls_back_to_latest() {
        assert_eq!(resolve("1.2.4").as_deref(), Some("2.1.0"));
        assert_eq!(resolve("=1.2.0").as_deref(), Some("2.1.0"));
    }

    #[test]
    fn test_non_numeric_wildcard_is_unsatisfiable() {
        // "next" contains an x and has no numeric major to pin.
        assert_eq!(resolve("next"), None);
    }

    #[test]
    fn test_no_latest_tag() {
        let manifest = make_manifest(&["1.0.0"], "");
        assert_eq!(resolve_version("", &manifest), None);
        assert_eq!(resolve_version("9.9.9", &manifest), None);
        assert_eq!(resolve_version("1.0.0", &manifest).as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_unparseable_keys_ignored() {
        let manifest = make_manifest(&["1.0.0", "1.5.0", "not-a-version"], "1.5.0");
        assert_eq!(resolve_version("^1.0.0", &manifest).as_deref(), Some("1.5.0"));
    }

    #[test]
    fn test_prerelease_ordering() {
        let manifest = make_manifest(&["1.0.0", "1.1.0-beta.1", "1.1.0"], "1.1.0");
        assert_eq!(resolve_version("^1.0.0", &manifest).as_deref(), Some("1.1.0"));

        let manifest = make_manifest(&["1.0.0", "1.1.0-beta.1"], "1.0.0");
        assert_eq!(
            resolve_version("^1.0.0", &manifest).as_deref(),
            Some("1.1.0-beta.1")
        );
    }

    #[test]
    fn test_resolved_version_is_published() {
        let manifest = standard();
        for constraint in ["^1.0.0", "~2.0.0", ">=1.0.0 <3.0.0", "1.x", "^1.0.0 || ^3.0.0"] {
            let v = resolve_version(constraint, &manifest).unwrap();
            assert!(manifest.versions.contains_key(&v), "{constraint} -> {v}");
        }
    }

    #[test]
    fn test_satisfies() {
        assert!(version_satisfies("^1.0.0", "1.9.3"));
        assert!(!version_satisfies("^1.0.0", "2.0.0"));
        assert!(version_satisfies("~1.2.0", "1.2.9"));
        assert!(!version_satisfies("~1.2.0", "1.3.0"));
        assert!(version_satisfies(">=1.0.0 <2.0.0", "1.0.0"));
        assert!(!version_satisfies(">=1.0.0 <2.0.0", "2.0.0"));
        assert!(version_satisfies("1.x", "1.4.0"));
        assert!(version_satisfies("^1.0.0 || ^2.0.0", "2.3.0"));
        assert!(version_satisfies("", "0.0.1"));
        assert!(version_satisfies("latest", "9.0.0"));
        assert!(version_satisfies("3.0.1", "3.0.1"));
        assert!(!version_satisfies("3.0.1", "3.0.2"));
        assert!(!version_satisfies(">=1.0.0", "1.0.0"));
        assert!(!version_satisfies("^1.0.0", "garbage"));
    }
}

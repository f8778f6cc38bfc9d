//! Package.json dependency handling.
//!
//! Reads declared dependencies from a project's `package.json`, reads the
//! dependency map of an extracted package, and edits the declared sections in
//! place for `add` / `remove`. Edits go through `serde_json::Value` so fields
//! this crate does not model survive untouched, in their original order.

use super::error::{codes, PkgError};
use rootpm_util::fs::atomic_write;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const DEPENDENCIES: &str = "dependencies";
const DEV_DEPENDENCIES: &str = "devDependencies";

/// Dependencies declared by a project.
#[derive(Debug, Clone, Default)]
pub struct DeclaredDeps {
    /// `dependencies`: name -> constraint.
    pub dependencies: BTreeMap<String, String>,
    /// `devDependencies`: name -> constraint. Names also present in
    /// `dependencies` are dropped from here.
    pub dev_dependencies: BTreeMap<String, String>,
    /// Entries that could not be used.
    pub errors: Vec<PkgDepError>,
}

impl DeclaredDeps {
    /// Whether nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.dev_dependencies.is_empty()
    }
}

/// Error encountered while extracting a dependency.
#[derive(Debug, Clone)]
pub struct PkgDepError {
    /// Package name (or section name for section errors).
    pub name: String,
    /// Error code.
    pub code: &'static str,
    /// Error message.
    pub message: String,
}

impl PkgDepError {
    /// Create a new dependency error.
    #[must_use]
    pub fn new(name: impl Into<String>, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code,
            message: message.into(),
        }
    }

    /// Create an invalid range error.
    #[must_use]
    pub fn invalid_range(name: &str, actual_type: &str) -> Self {
        Self::new(
            name,
            codes::PKG_DEP_RANGE_INVALID,
            format!("expected string, got {actual_type}"),
        )
    }

    /// Create an invalid section error.
    #[must_use]
    pub fn invalid_section(section: &str, actual_type: &str) -> Self {
        Self::new(
            section,
            codes::PKG_PACKAGE_JSON_INVALID,
            format!("'{section}' must be an object, got {actual_type}"),
        )
    }
}

/// Read the declared `dependencies` and `devDependencies` of a project.
///
/// # Errors
/// Returns `PkgError` if the file is missing or is not a JSON object.
pub fn read_declared_deps(package_json_path: &Path) -> Result<DeclaredDeps, PkgError> {
    let root = read_object(package_json_path)?;
    let mut result = DeclaredDeps::default();

    extract_section(&root, DEPENDENCIES, &mut result.dependencies, &mut result.errors);
    extract_section(
        &root,
        DEV_DEPENDENCIES,
        &mut result.dev_dependencies,
        &mut result.errors,
    );

    result
        .dev_dependencies
        .retain(|name, _| !result.dependencies.contains_key(name));

    Ok(result)
}

/// Read the `dependencies` of an extracted package directory.
///
/// Malformed entries are skipped with a warning; a package with a broken
/// dependency map still installs.
///
/// # Errors
/// Returns `PkgError` if `<dir>/package.json` is missing or unparseable.
pub fn read_package_dependencies(package_dir: &Path) -> Result<BTreeMap<String, String>, PkgError> {
    let root = read_object(&package_dir.join("package.json"))?;
    let mut deps = BTreeMap::new();
    let mut errors = Vec::new();

    extract_section(&root, DEPENDENCIES, &mut deps, &mut errors);

    for err in errors {
        tracing::warn!(
            package = %package_dir.display(),
            name = %err.name,
            code = err.code,
            "{}",
            err.message
        );
    }

    Ok(deps)
}

/// Record `name: constraint` in `package.json`.
///
/// The entry goes into `devDependencies` when `dev` is set, otherwise into
/// `dependencies`; it is removed from the other section. Other fields and
/// their order are preserved.
///
/// # Errors
/// Returns `PkgError` if the file cannot be read, parsed, or written.
pub fn add_dependency(
    package_json_path: &Path,
    name: &str,
    constraint: &str,
    dev: bool,
) -> Result<(), PkgError> {
    let mut root = read_object(package_json_path)?;
    let (target, other) = if dev {
        (DEV_DEPENDENCIES, DEPENDENCIES)
    } else {
        (DEPENDENCIES, DEV_DEPENDENCIES)
    };

    if let Some(Value::Object(section)) = root.get_mut(other) {
        section.shift_remove(name);
    }

    match root
        .entry(target)
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(section) => {
            section.insert(name.to_string(), Value::String(constraint.to_string()));
        }
        other => {
            return Err(PkgError::package_json_invalid(format!(
                "'{target}' must be an object, got {}",
                json_type_name(other)
            )));
        }
    }

    write_object(package_json_path, root)
}

/// Drop `name` from both dependency sections of `package.json`.
///
/// Returns whether anything was removed; the file is only rewritten if so.
///
/// # Errors
/// Returns `PkgError` if the file cannot be read, parsed, or written.
pub fn remove_dependency(package_json_path: &Path, name: &str) -> Result<bool, PkgError> {
    let mut root = read_object(package_json_path)?;
    let mut removed = false;

    for section in [DEPENDENCIES, DEV_DEPENDENCIES] {
        if let Some(Value::Object(deps)) = root.get_mut(section) {
            removed |= deps.shift_remove(name).is_some();
        }
    }

    if removed {
        write_object(package_json_path, root)?;
    }
    Ok(removed)
}

fn read_object(path: &Path) -> Result<Map<String, Value>, PkgError> {
    if !path.exists() {
        return Err(PkgError::package_json_not_found(path));
    }

    let content = fs::read_to_string(path)
        .map_err(|e| PkgError::package_json_invalid(format!("Failed to read: {e}")))?;

    let value: Value = serde_json::from_str(&content).map_err(|e| {
        PkgError::package_json_invalid(format!("Invalid JSON in {}: {e}", path.display()))
    })?;

    match value {
        Value::Object(obj) => Ok(obj),
        _ => Err(PkgError::package_json_invalid(
            "package.json must be a JSON object",
        )),
    }
}

fn write_object(path: &Path, root: Map<String, Value>) -> Result<(), PkgError> {
    let mut content = serde_json::to_string_pretty(&Value::Object(root))
        .map_err(|e| PkgError::package_json_invalid(format!("Failed to serialize: {e}")))?;
    content.push('\n');

    atomic_write(path, content.as_bytes()).map_err(|e| {
        PkgError::cache_error(format!("Failed to write {}: {e}", path.display()))
    })
}

/// Extract string entries from one section; anything else becomes an error.
fn extract_section(
    root: &Map<String, Value>,
    section: &str,
    deps: &mut BTreeMap<String, String>,
    errors: &mut Vec<PkgDepError>,
) {
    let Some(section_value) = root.get(section) else {
        return;
    };

    if section_value.is_null() {
        return;
    }

    let Some(section_obj) = section_value.as_object() else {
        errors.push(PkgDepError::invalid_section(
            section,
            json_type_name(section_value),
        ));
        return;
    };

    for (name, range_value) in section_obj {
        if let Some(range) = range_value.as_str() {
            deps.insert(name.clone(), range.to_string());
        } else {
            errors.push(PkgDepError::invalid_range(
                name,
                json_type_name(range_value),
            ));
        }
    }
}

/// Get a human-readable type name for a JSON value.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write_package_json(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("package.json");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_declared() {
        let dir = tempdir().unwrap();
        let path = write_package_json(
            dir.path(),
            r#"{
                "name": "test",
                "dependencies": { "a": "^1.0.0", "b": "2.0.0" },
                "devDependencies": { "c": "^3.0.0" }
            }"#,
        );

        let declared = read_declared_deps(&path).unwrap();
        assert_eq!(declared.dependencies.len(), 2);
        assert_eq!(declared.dependencies["a"], "^1.0.0");
        assert_eq!(declared.dev_dependencies["c"], "^3.0.0");
        assert!(declared.errors.is_empty());
    }

    #[test]
    fn test_prod_wins_over_dev() {
        let dir = tempdir().unwrap();
        let path = write_package_json(
            dir.path(),
            r#"{
                "dependencies": { "a": "^1.0.0" },
                "devDependencies": { "a": "^2.0.0", "b": "1.0.0" }
            }"#,
        );

        let declared = read_declared_deps(&path).unwrap();
        assert_eq!(declared.dependencies["a"], "^1.0.0");
        assert!(!declared.dev_dependencies.contains_key("a"));
        assert!(declared.dev_dependencies.contains_key("b"));
    }

    #[test]
    fn test_invalid_entries_collected() {
        let dir = tempdir().unwrap();
        let path = write_package_json(
            dir.path(),
            r#"{
                "dependencies": { "a": "^1.0.0", "b": 42, "c": null },
                "devDependencies": []
            }"#,
        );

        let declared = read_declared_deps(&path).unwrap();
        assert_eq!(declared.dependencies.len(), 1);
        assert_eq!(declared.errors.len(), 3);
        assert!(declared
            .errors
            .iter()
            .any(|e| e.name == "b" && e.code == codes::PKG_DEP_RANGE_INVALID));
        assert!(declared
            .errors
            .iter()
            .any(|e| e.name == "devDependencies" && e.code == codes::PKG_PACKAGE_JSON_INVALID));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = read_declared_deps(&dir.path().join("package.json")).unwrap_err();
        assert_eq!(err.code(), codes::PKG_PACKAGE_JSON_NOT_FOUND);
    }

    #[test]
    fn test_not_an_object() {
        let dir = tempdir().unwrap();
        let path = write_package_json(dir.path(), "[1, 2, 3]");
        let err = read_declared_deps(&path).unwrap_err();
        assert_eq!(err.code(), codes::PKG_PACKAGE_JSON_INVALID);
    }

    #[test]
    fn test_read_package_dependencies() {
        let dir = tempdir().unwrap();
        write_package_json(
            dir.path(),
            r#"{ "name": "is-even", "version": "1.0.0", "dependencies": { "is-odd": "^0.1.2", "bad": 1 } }"#,
        );

        let deps = read_package_dependencies(dir.path()).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps["is-odd"], "^0.1.2");
    }

    #[test]
    fn test_read_package_dependencies_none_declared() {
        let dir = tempdir().unwrap();
        write_package_json(dir.path(), r#"{ "name": "leaf", "version": "1.0.0" }"#);
        assert!(read_package_dependencies(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_add_preserves_other_fields() {
        let dir = tempdir().unwrap();
        let path = write_package_json(
            dir.path(),
            r#"{ "name": "app", "version": "1.0.0", "scripts": { "test": "x" } }"#,
        );

        add_dependency(&path, "is-odd", "^3.0.1", false).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["dependencies"]["is-odd"], "^3.0.1");
        assert_eq!(value["scripts"]["test"], "x");
        assert!(content.find("\"name\"").unwrap() < content.find("\"scripts\"").unwrap());
    }

    #[test]
    fn test_add_dev_moves_between_sections() {
        let dir = tempdir().unwrap();
        let path = write_package_json(dir.path(), r#"{ "dependencies": { "a": "1.0.0" } }"#);

        add_dependency(&path, "a", "^1.0.0", true).unwrap();

        let declared = read_declared_deps(&path).unwrap();
        assert!(!declared.dependencies.contains_key("a"));
        assert_eq!(declared.dev_dependencies["a"], "^1.0.0");
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let path = write_package_json(
            dir.path(),
            r#"{ "dependencies": { "a": "1.0.0", "b": "1.0.0" }, "devDependencies": { "c": "1.0.0" } }"#,
        );

        assert!(remove_dependency(&path, "a").unwrap());
        assert!(remove_dependency(&path, "c").unwrap());
        assert!(!remove_dependency(&path, "zzz").unwrap());

        let declared = read_declared_deps(&path).unwrap();
        assert_eq!(declared.dependencies.keys().collect::<Vec<_>>(), vec!["b"]);
        assert!(declared.dev_dependencies.is_empty());
    }
}

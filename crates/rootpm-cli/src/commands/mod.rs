pub mod add;
pub mod install;
pub mod remove;
pub mod version;

use miette::{IntoDiagnostic, Result};
use rootpm_core::paths::project_root;
use rootpm_core::pkg::{FetchStats, PkgError, ResolveResult};
use rootpm_core::{Config, Error};
use serde::Serialize;
use std::path::PathBuf;

/// Error details for JSON output.
#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// Fetch counters for JSON output.
#[derive(Debug, Serialize)]
pub struct StatsOutput {
    pub manifests_fetched: usize,
    pub manifests_not_modified: usize,
    pub tarballs_downloaded: usize,
    pub cache_hits: usize,
    pub unresolved: usize,
    pub unplaced: usize,
}

impl From<FetchStats> for StatsOutput {
    fn from(stats: FetchStats) -> Self {
        Self {
            manifests_fetched: stats.manifests_fetched,
            manifests_not_modified: stats.manifests_not_modified,
            tarballs_downloaded: stats.tarballs_downloaded,
            cache_hits: stats.cache_hits,
            unresolved: stats.unresolved,
            unplaced: stats.unplaced,
        }
    }
}

/// Result of a project operation for JSON output.
#[derive(Debug, Serialize)]
pub struct OperationOutput {
    pub ok: bool,
    pub installed: Vec<InstalledOutput>,
    pub removed: Vec<String>,
    pub packages: usize,
    pub lockfile_written: bool,
    pub stats: StatsOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize)]
pub struct InstalledOutput {
    pub name: String,
    pub version: String,
}

impl OperationOutput {
    fn from_result(result: &ResolveResult) -> Self {
        let installed = result
            .installed
            .iter()
            .filter_map(|name| {
                result.lock.dependencies.get(name).map(|version| InstalledOutput {
                    name: name.clone(),
                    version: version.clone(),
                })
            })
            .collect();

        Self {
            ok: true,
            installed,
            removed: result.removed.clone(),
            packages: result.lock.packages.len(),
            lockfile_written: result.lockfile_written,
            stats: result.stats.into(),
            error: None,
        }
    }

    fn from_error(err: &PkgError) -> Self {
        Self {
            ok: false,
            installed: Vec::new(),
            removed: Vec::new(),
            packages: 0,
            lockfile_written: false,
            stats: FetchStats::default().into(),
            error: Some(ErrorInfo {
                code: err.code().to_string(),
                message: err.message().to_string(),
            }),
        }
    }
}

/// Find the project root from the configured working directory.
pub fn project_dir(config: &Config) -> Result<PathBuf> {
    project_root(&config.cwd)
        .ok_or_else(|| Error::ProjectNotFound {
            start: config.cwd.clone(),
        })
        .into_diagnostic()
}

/// Print the outcome of a project operation and exit non-zero on failure.
pub fn report(outcome: std::result::Result<ResolveResult, PkgError>, json: bool) -> Result<()> {
    match outcome {
        Ok(result) => {
            if json {
                let output = OperationOutput::from_result(&result);
                println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
            } else {
                print_human(&result);
            }
            Ok(())
        }
        Err(err) => {
            if json {
                let output = OperationOutput::from_error(&err);
                println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
            } else {
                eprintln!("error: {err}");
            }
            std::process::exit(2);
        }
    }
}

fn print_human(result: &ResolveResult) {
    for name in &result.installed {
        match result.lock.dependencies.get(name) {
            Some(version) => println!("+ {name}@{version}"),
            None => println!("! {name}: no matching version"),
        }
    }
    for key in &result.removed {
        println!("- {key}");
    }

    let stats = result.stats;
    if stats.cache_hits > 0 {
        println!("({} from cache)", stats.cache_hits);
    }
    if stats.unresolved > 0 {
        eprintln!("! {} constraints could not be resolved", stats.unresolved);
    }
    if stats.unplaced > 0 {
        eprintln!("! {} packages could not be placed in the lockfile", stats.unplaced);
    }

    if result.lockfile_written {
        println!("{} packages locked", result.lock.packages.len());
    } else {
        println!("Lockfile up to date");
    }
}

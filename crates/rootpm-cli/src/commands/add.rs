use super::{project_dir, report};
use miette::{IntoDiagnostic, Result};
use rootpm_core::pkg::{add, fetcher_from_config, FetchOptions};
use rootpm_core::Config;
use tracing::info;

/// Split `name@constraint`, keeping the leading `@` of a scoped name.
///
/// A spec without a constraint yields an empty constraint (latest).
#[must_use]
pub fn split_spec(spec: &str) -> (&str, &str) {
    let spec = spec.trim();
    let start = usize::from(spec.starts_with('@'));
    match spec[start..].find('@') {
        Some(idx) => (&spec[..start + idx], &spec[start + idx + 1..]),
        None => (spec, ""),
    }
}

pub fn run(config: &Config, spec: &str, dev: bool) -> Result<()> {
    let project = project_dir(config)?;
    let (name, constraint) = split_spec(spec);
    info!(name, constraint, dev, "add");

    let fetcher = match fetcher_from_config(config, FetchOptions::default()) {
        Ok(fetcher) => fetcher,
        Err(e) => return report(Err(e), config.json_logs),
    };

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let outcome = runtime.block_on(add(&project, &fetcher, name, constraint, dev));
    report(outcome, config.json_logs)
}

use super::{project_dir, report};
use miette::{IntoDiagnostic, Result};
use rootpm_core::pkg::{fetcher_from_config, install, FetchOptions, ResolveOptions};
use rootpm_core::Config;
use tracing::info;

/// Options for `rootpm install`.
#[derive(Debug, Clone)]
pub struct InstallAction {
    pub revalidate: bool,
    pub concurrency: usize,
}

pub fn run(config: &Config, action: &InstallAction) -> Result<()> {
    let project = project_dir(config)?;
    info!(
        project = %project.display(),
        production = config.production,
        registry = %config.registry,
        "install"
    );

    let fetch = FetchOptions {
        max_concurrent_fetches: action.concurrency,
        revalidate_manifests: action.revalidate,
        ..FetchOptions::default()
    };
    let opts = ResolveOptions {
        production: config.production,
        fetch: fetch.clone(),
    };

    let fetcher = match fetcher_from_config(config, fetch) {
        Ok(fetcher) => fetcher,
        Err(e) => return report(Err(e), config.json_logs),
    };

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let outcome = runtime.block_on(install(&project, &fetcher, &opts));
    report(outcome, config.json_logs)
}

use super::{project_dir, report};
use miette::Result;
use rootpm_core::pkg::remove;
use rootpm_core::Config;
use tracing::info;

pub fn run(config: &Config, name: &str) -> Result<()> {
    let project = project_dir(config)?;
    info!(name, project = %project.display(), "remove");
    report(remove(&project, name), config.json_logs)
}

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::needless_pass_by_value)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use rootpm_core::pkg::DEFAULT_MAX_CONCURRENT_FETCHES;
use rootpm_core::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rootpm")]
#[command(author, version, about = "Resolve, fetch and lock npm dependencies", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Registry base URL (overrides ROOTPM_REGISTRY)
    #[arg(long, global = true, value_name = "URL")]
    registry: Option<String>,

    /// Package cache root (overrides ROOTPM_CACHE_DIR)
    #[arg(long, global = true, value_name = "PATH")]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Bring the lockfile in line with package.json
    Install {
        /// Skip devDependencies and prune dev-only packages from the lockfile
        #[arg(long)]
        production: bool,

        /// Revalidate cached manifests with the registry (conditional requests)
        #[arg(long)]
        revalidate: bool,

        /// Maximum concurrent registry requests
        #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_FETCHES)]
        concurrency: usize,
    },

    /// Add a dependency (name or name@constraint)
    Add {
        /// Package spec, e.g. `is-odd` or `is-odd@^3.0.0`
        spec: String,

        /// Record under devDependencies
        #[arg(short = 'D', long)]
        dev: bool,
    },

    /// Remove a direct dependency and everything only it needed
    Remove {
        /// Package name
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::new(cwd)
        .with_env_overrides()
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);
    if let Some(registry) = cli.registry {
        config = config.with_registry(registry);
    }
    if let Some(cache_dir) = cli.cache_dir {
        config = config.with_cache_root(cache_dir);
    }
    if let Some(Commands::Install { production, .. }) = &cli.command {
        config = config.with_production(*production);
    }

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Install {
            revalidate,
            concurrency,
            ..
        }) => {
            let span = tracing::info_span!("install", cmd = "install", cwd = %config.cwd.display());
            let _guard = span.enter();
            let action = commands::install::InstallAction {
                revalidate,
                concurrency,
            };
            commands::install::run(&config, &action)
        }
        Some(Commands::Add { spec, dev }) => {
            let span = tracing::info_span!("add", cmd = "add", cwd = %config.cwd.display());
            let _guard = span.enter();
            commands::add::run(&config, &spec, dev)
        }
        Some(Commands::Remove { name }) => {
            let span = tracing::info_span!("remove", cmd = "remove", cwd = %config.cwd.display());
            let _guard = span.enter();
            commands::remove::run(&config, &name)
        }
    }
}

use crate::pkg::PkgError;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for rootpm operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Project root not found from {start}")]
    ProjectNotFound { start: PathBuf },

    #[error(transparent)]
    Pkg(#[from] PkgError),
}

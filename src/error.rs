use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::state::Phase;

/// Why a sync run stopped. The first failing artifact aborts the whole plan.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot locate {path}: {cause}")]
    Source { path: String, cause: String },

    #[error("I/O error at {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("download of {path} failed: {cause}")]
    Transfer { path: String, cause: String },
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("entry point '{0}' is neither registered nor one of the synchronized artifacts")]
    EntryPointNotFound(String),

    #[error("artifact {0:?} is missing from the installation")]
    MissingArtifact(PathBuf),

    #[error("failed to construct '{entry_point}': {cause}")]
    Construction { entry_point: String, cause: String },
}

/// Cross-thread error report: the phase that failed plus a printable cause.
#[derive(Clone, Debug, Error)]
#[error("Error during {phase} phase: {cause}")]
pub struct LaunchFailure {
    pub phase: Phase,
    pub cause: String,
}

impl LaunchFailure {
    pub fn new(phase: Phase, cause: impl ToString) -> Self {
        Self {
            phase,
            cause: cause.to_string(),
        }
    }
}

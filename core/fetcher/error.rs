use crate::model::RepoKey;
use crate::rules::RuleError;
use std::path::PathBuf;
use thiserror::*;

/// Whether an error is worth retrying on a later build. External fetches
/// are often flaky, so most failures are transient; the engine, not this
/// core, decides what to do with the tag.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    Transient,
    Persistent,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("An error occurred during the fetch of repository '{repo}':\n   {err}")]
    RuleFailed { repo: RepoKey, err: RuleError },

    #[error("the rule for repository '{repo}' finished without creating a directory")]
    NoRepositoryDirectory { repo: RepoKey },

    #[error("Pending asynchronous work after the rule for repository '{repo}' finished running")]
    PendingWork { repo: RepoKey },

    #[error("Could not set up repository directory {dir:?} due to {err:?}")]
    DirectorySetup { dir: PathBuf, err: std::io::Error },

    #[error("Could not clean up repository directory {dir:?} due to {err:?}")]
    DirectoryCleanup { dir: PathBuf, err: std::io::Error },

    #[error("the fetch was interrupted")]
    Interrupted,

    #[error("the fetch worker terminated unexpectedly: {reason}")]
    WorkerLost { reason: String },
}

impl FetchError {
    pub fn transience(&self) -> Transience {
        match self {
            FetchError::RuleFailed { .. }
            | FetchError::NoRepositoryDirectory { .. }
            | FetchError::PendingWork { .. }
            | FetchError::DirectorySetup { .. }
            | FetchError::DirectoryCleanup { .. } => Transience::Transient,
            // an interrupted or vanished fetch is not rerun blindly
            FetchError::Interrupted | FetchError::WorkerLost { .. } => Transience::Persistent,
        }
    }
}

impl From<crate::context::Interrupted> for FetchError {
    fn from(_: crate::context::Interrupted) -> Self {
        Self::Interrupted
    }
}

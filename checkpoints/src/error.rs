use thiserror::Error;
use vcs::VcsError;

/// Errors surfaced by the checkpoint store.
///
/// Remote failures during bootstrap and "nothing changed" commits never
/// appear here: the former are logged and absorbed, the latter are a
/// [`vcs::CommitOutcome`]. Listing failures are absorbed into an empty list.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The local repository could not be initialized or attached to
    #[error("Bootstrap failed: {message}")]
    Bootstrap { message: String },

    /// Remote synchronization failed after a write.
    ///
    /// `local_commit` is set when the local history was already updated, in
    /// which case the local branch is ahead of the remote.
    #[error("Push failed for {path}: {source}")]
    Push {
        path: String,
        local_commit: Option<String>,
        #[source]
        source: VcsError,
    },

    /// Checkpoint id or path unknown to the repository
    #[error("Checkpoint does not exist: {path}@{id}")]
    NotFound { path: String, id: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Backend error: {0}")]
    Backend(#[from] VcsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CheckpointError {
    pub fn not_found(path: impl Into<String>, id: impl Into<String>) -> Self {
        CheckpointError::NotFound {
            path: path.into(),
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckpointError::NotFound { .. })
    }

    /// Status class a host transport should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CheckpointError::NotFound { .. } => 404,
            CheckpointError::InvalidPath(_) | CheckpointError::InvalidConfig(_) => 400,
            CheckpointError::Push { .. } => 502,
            _ => 500,
        }
    }
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

use crate::types::{CommitInfo, Identity, LogQuery};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No repository has been initialized at the root")]
    NotInitialized,

    #[error("Pathspec '{0}' did not match any file known to the repository")]
    PathspecNotFound(String),

    #[error("Revision not found: {0}")]
    RevisionNotFound(String),

    #[error("Remote not found: {0}")]
    RemoteNotFound(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Push of {refname} rejected: {message}")]
    PushRejected { refname: String, message: String },

    #[error("Invalid UTF-8 in git data: {0}")]
    InvalidUtf8(String),

    #[error("Invalid commit timestamp: {0}")]
    InvalidTimestamp(String),
}

impl VcsError {
    /// Whether the error names something the repository does not know about.
    pub fn is_not_found(&self) -> bool {
        match self {
            VcsError::PathspecNotFound(_)
            | VcsError::RevisionNotFound(_)
            | VcsError::BranchNotFound(_)
            | VcsError::RemoteNotFound(_) => true,
            VcsError::Git(e) => e.code() == git2::ErrorCode::NotFound,
            _ => false,
        }
    }
}

pub type VcsResult<T> = Result<T, VcsError>;

/// Result of a commit attempt.
///
/// An unchanged tree is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(String),
    EmptyDiff,
}

impl CommitOutcome {
    pub fn commit_id(&self) -> Option<&str> {
        match self {
            CommitOutcome::Committed(id) => Some(id),
            CommitOutcome::EmptyDiff => None,
        }
    }

    pub fn is_empty_diff(&self) -> bool {
        matches!(self, CommitOutcome::EmptyDiff)
    }
}

/// Command surface over a version-control repository rooted at one directory.
///
/// Paths are relative to the repository root and use `/` separators. Every
/// call blocks until the underlying operation completes.
pub trait VersionControlBackend: Send {
    fn is_repository(&self) -> bool;

    fn init(&mut self) -> VcsResult<()>;

    /// Branch HEAD points at, including an unborn branch.
    fn current_branch(&self) -> VcsResult<String>;

    fn add_remote(&mut self, name: &str, url: &str) -> VcsResult<()>;

    fn has_remote(&self, name: &str) -> bool;

    fn fetch_branch(&mut self, remote: &str, branch: &str) -> VcsResult<()>;

    /// Create `branch` from `{remote}/{branch}`, track it and check it out.
    fn track_remote_branch(&mut self, remote: &str, branch: &str) -> VcsResult<()>;

    fn create_branch(&mut self, branch: &str) -> VcsResult<()>;

    /// Whether HEAD's tree contains `path`.
    fn is_tracked(&self, path: &str) -> VcsResult<bool>;

    fn add(&mut self, paths: &[&str]) -> VcsResult<()>;

    fn add_all(&mut self) -> VcsResult<()>;

    /// Commit staged content. A non-empty `paths` restricts the commit to
    /// those paths, leaving any other staged change in the index.
    fn commit(&mut self, message: &str, paths: &[&str]) -> VcsResult<CommitOutcome>;

    fn resolve(&self, rev: &str) -> VcsResult<String>;

    /// Whether `path` exists in the tree of `rev`.
    fn exists_at(&self, rev: &str, path: &str) -> VcsResult<bool>;

    fn checkout_path(&mut self, rev: &str, path: &str) -> VcsResult<()>;

    fn log(&self, query: &LogQuery) -> VcsResult<Vec<CommitInfo>>;

    fn push(&mut self, remote: &str, branch: &str, set_upstream: bool) -> VcsResult<()>;

    fn configure_identity(&mut self, identity: &Identity) -> VcsResult<()>;

    fn set_config(&mut self, key: &str, value: &str) -> VcsResult<()>;
}

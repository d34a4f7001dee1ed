pub mod backend;
pub mod config;
pub mod git;
pub mod types;

pub use backend::{CommitOutcome, VcsError, VcsResult, VersionControlBackend};
pub use config::{GitConfig, DEFAULT_REMOTE};
pub use git::GitBackend;
pub use types::{CommitInfo, Credentials, Identity, LogQuery};

pub mod prelude {
    pub use crate::backend::*;
    pub use crate::config::*;
    pub use crate::git::*;
    pub use crate::types::*;
}

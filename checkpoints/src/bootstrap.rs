//! Repository bootstrap: attach to or create the checkpoint repository,
//! bind it to the `{identity}-{environment}` branch and link the remote.
//!
//! Only failures of the local repository are fatal. Anything involving the
//! remote (registration, fetch, push) is logged, recorded in the
//! [`BootstrapReport`], and the repository continues local-only.

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, CheckpointResult};
use crate::event::HistoryEvent;
use serde::Serialize;
use std::fs;
use tracing::{debug, info, warn};
use vcs::{CommitOutcome, VcsError, VcsResult, VersionControlBackend};

pub const IGNORE_FILE: &str = ".gitignore";

/// Exclude every hidden entry except the rule file itself.
pub const IGNORE_RULES: &str = ".*\n!/.gitignore\n";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub branch: String,
    /// An existing repository was reused as-is
    pub attached: bool,
    pub remote_linked: bool,
    /// The branch was created from its remote counterpart
    pub tracking_remote: bool,
    pub baseline: Option<String>,
    pub baseline_pushed: bool,
    /// Absorbed failures, in the order they happened
    pub warnings: Vec<String>,
}

impl BootstrapReport {
    fn absorb(&mut self, context: &str, error: &VcsError) {
        warn!("{}: {}", context, error);
        self.warnings.push(format!("{}: {}", context, error));
    }
}

fn fatal(context: &str, error: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Bootstrap {
        message: format!("{}: {}", context, error),
    }
}

fn link_remote_branch<B: VersionControlBackend>(
    backend: &mut B,
    remote: &str,
    branch: &str,
) -> VcsResult<()> {
    backend.fetch_branch(remote, branch)?;
    backend.track_remote_branch(remote, branch)
}

fn configure_writer<B: VersionControlBackend>(
    backend: &mut B,
    config: &CheckpointConfig,
) -> CheckpointResult<()> {
    backend
        .configure_identity(&config.writer_identity())
        .map_err(|e| fatal("Failed to configure writer identity", e))?;
    backend
        .set_config("push.default", "matching")
        .map_err(|e| fatal("Failed to configure push policy", e))?;
    Ok(())
}

/// Run once per store lifetime, before any checkpoint operation.
pub fn bootstrap<B: VersionControlBackend>(
    backend: &mut B,
    config: &CheckpointConfig,
) -> CheckpointResult<BootstrapReport> {
    info!("Init git checkpoints in {}", config.root_dir.display());
    let remote = config.remote_name.as_str();

    if backend.is_repository() {
        let branch = backend
            .current_branch()
            .map_err(|e| fatal("Failed to read current branch", e))?;
        configure_writer(backend, config)?;
        info!("Attached to existing repository on branch {}", branch);
        return Ok(BootstrapReport {
            remote_linked: backend.has_remote(remote),
            branch,
            attached: true,
            ..BootstrapReport::default()
        });
    }

    let branch = config.branch_name()?;
    let mut report = BootstrapReport {
        branch: branch.clone(),
        ..BootstrapReport::default()
    };

    backend
        .init()
        .map_err(|e| fatal("Failed to initialize repository", e))?;

    if let Some(remote_config) = config.active_remote() {
        info!("Git checkpoints connecting to remote repo ...");
        match backend.add_remote(remote, &remote_config.url) {
            Ok(()) => report.remote_linked = true,
            Err(e) => report.absorb("Failed to register remote", &e),
        }
    } else {
        debug!("No remote configured, repository is local-only");
    }

    if report.remote_linked {
        debug!("Assuming branch {} exists remotely, fetching and linking", branch);
        match link_remote_branch(backend, remote, &branch) {
            Ok(()) => report.tracking_remote = true,
            Err(e) => report.absorb("Could not link remote branch", &e),
        }
    }
    if !report.tracking_remote {
        debug!("Creating branch {}", branch);
        backend
            .create_branch(&branch)
            .map_err(|e| fatal("Failed to create branch", e))?;
    }

    fs::write(config.root_dir.join(IGNORE_FILE), IGNORE_RULES)
        .map_err(|e| fatal("Failed to write ignore rules", e))?;

    // Identity is needed by the baseline commit below.
    configure_writer(backend, config)?;

    let baseline = backend
        .add_all()
        .and_then(|()| backend.commit(&HistoryEvent::Baseline.to_message(), &[]));
    match baseline {
        Ok(CommitOutcome::Committed(id)) => {
            info!("Baseline checkpoint {} for existing files", id);
            report.baseline = Some(id);
        }
        Ok(CommitOutcome::EmptyDiff) => debug!("No untracked files to baseline"),
        Err(e) => report.absorb("Baseline commit failed", &e),
    }

    if report.remote_linked {
        match backend.push(remote, &branch, true) {
            Ok(()) => report.baseline_pushed = true,
            Err(e) => report.absorb("Baseline push failed, continuing local-only", &e),
        }
    }

    info!("Git checkpoints initialised on branch {}", branch);
    Ok(report)
}

//! Checkpoint store: per-document snapshots recorded as commits on the
//! writer's branch and pushed to the configured remote.

use crate::bootstrap::{bootstrap, BootstrapReport};
use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, CheckpointResult};
use crate::event::HistoryEvent;
use crate::model::{Checkpoint, CheckpointModelBuilder, HistoryEntry};
use tracing::{debug, info, warn};
use vcs::{
    CommitInfo, CommitOutcome, GitBackend, LogQuery, VcsError, VersionControlBackend,
};

/// Normalize a host path into a repository-relative one.
///
/// Leading and trailing `/` are stripped and `.` segments dropped. Paths
/// escaping the root, pointing into `.git`, or containing control
/// characters are rejected.
pub fn checkpoint_path(path: &str) -> CheckpointResult<String> {
    if path.chars().any(char::is_control) {
        return Err(CheckpointError::InvalidPath(path.escape_debug().to_string()));
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(CheckpointError::InvalidPath(path.to_string())),
            segment => segments.push(segment),
        }
    }
    match segments.first() {
        None => Err(CheckpointError::InvalidPath(path.to_string())),
        Some(&".git") => Err(CheckpointError::InvalidPath(path.to_string())),
        Some(_) => Ok(segments.join("/")),
    }
}

/// Missing paths and revisions become [`CheckpointError::NotFound`].
fn lookup_error(error: VcsError, path: &str, id: &str) -> CheckpointError {
    match error {
        VcsError::PathspecNotFound(_) | VcsError::RevisionNotFound(_) => {
            CheckpointError::not_found(path, id)
        }
        other => other.into(),
    }
}

pub struct CheckpointStore<B: VersionControlBackend = GitBackend> {
    backend: B,
    config: CheckpointConfig,
    branch: String,
    models: CheckpointModelBuilder,
}

impl CheckpointStore<GitBackend> {
    /// Open the store over `config.root_dir`, bootstrapping the repository.
    pub fn open(config: CheckpointConfig) -> CheckpointResult<(Self, BootstrapReport)> {
        config.validate().map_err(CheckpointError::InvalidConfig)?;
        let backend = GitBackend::new(config.root_dir.clone(), config.git_config()?);
        Self::open_with_backend(config, backend)
    }
}

impl<B: VersionControlBackend> CheckpointStore<B> {
    pub fn open_with_backend(
        config: CheckpointConfig,
        mut backend: B,
    ) -> CheckpointResult<(Self, BootstrapReport)> {
        config.validate().map_err(CheckpointError::InvalidConfig)?;
        let models = CheckpointModelBuilder::new(config.zone()?);
        let report = bootstrap(&mut backend, &config)?;
        let store = Self {
            backend,
            branch: report.branch.clone(),
            config,
            models,
        };
        Ok((store, report))
    }

    /// Release the repository handle.
    pub fn close(self) {
        info!("Closing checkpoint store on branch {}", self.branch);
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Snapshot the current content of `path`.
    ///
    /// Unchanged content yields the most recent checkpoint of `path` again.
    pub fn create_checkpoint(&mut self, path: &str) -> CheckpointResult<Checkpoint> {
        let path = checkpoint_path(path)?;
        debug!("Creating checkpoint for {}", path);

        let event = if self.backend.is_tracked(&path)? {
            HistoryEvent::Modify { path: path.clone() }
        } else {
            HistoryEvent::Create { path: path.clone() }
        };
        self.backend
            .add(&[path.as_str()])
            .map_err(|e| lookup_error(e, &path, "HEAD"))?;
        let outcome = self
            .backend
            .commit(&event.to_message(), &[path.as_str()])
            .map_err(|e| lookup_error(e, &path, "HEAD"))?;
        if outcome.is_empty_diff() {
            debug!("{} unchanged since its last checkpoint", path);
        }

        let latest = self
            .backend
            .log(&LogQuery::for_path(path.as_str()).with_limit(1))?
            .into_iter()
            .next()
            .ok_or_else(|| CheckpointError::not_found(&path, "HEAD"))?;
        let checkpoint = self.models.from_commit(&latest);

        self.sync(&path, outcome.commit_id().map(str::to_string))?;
        Ok(checkpoint)
    }

    /// Bring `path` back to its content at checkpoint `id`.
    ///
    /// Pending edits are committed first, so the content being replaced
    /// stays reachable in history. Only local state changes; nothing is
    /// pushed.
    pub fn restore_checkpoint(&mut self, id: &str, path: &str) -> CheckpointResult<()> {
        let path = checkpoint_path(path)?;
        debug!("Restoring {} to checkpoint {}", path, id);

        let target = self
            .backend
            .resolve(id)
            .map_err(|e| lookup_error(e, &path, id))?;
        if !self.backend.exists_at(&target, &path)? {
            return Err(CheckpointError::not_found(&path, id));
        }

        if let Some(safety) = self.preserve_pending(&path, &target)? {
            debug!("Preserved pending edits of {} as {}", path, safety);
        }
        self.backend
            .checkout_path(&target, &path)
            .map_err(|e| lookup_error(e, &path, id))
    }

    fn preserve_pending(&mut self, path: &str, target: &str) -> CheckpointResult<Option<String>> {
        match self.backend.add(&[path]) {
            Ok(()) => {}
            Err(VcsError::PathspecNotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let event = HistoryEvent::Restore {
            path: path.to_string(),
            target: target.to_string(),
        };
        match self.backend.commit(&event.to_message(), &[path]) {
            Ok(CommitOutcome::Committed(id)) => Ok(Some(id)),
            Ok(CommitOutcome::EmptyDiff) | Err(VcsError::PathspecNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record that `old_path` now lives at `new_path`.
    ///
    /// A document that was never checkpointed under `old_path` is recorded
    /// as a new document at `new_path` instead.
    pub fn rename_checkpoint(&mut self, old_path: &str, new_path: &str) -> CheckpointResult<()> {
        let old_path = checkpoint_path(old_path)?;
        let new_path = checkpoint_path(new_path)?;
        debug!("Renaming checkpoints {} -> {}", old_path, new_path);

        let renamed = HistoryEvent::Rename {
            from: Some(old_path.clone()),
            to: new_path.clone(),
        };
        let paths = [old_path.as_str(), new_path.as_str()];
        let recorded = self
            .backend
            .add(&paths)
            .and_then(|()| self.backend.commit(&renamed.to_message(), &paths));

        let outcome = match recorded {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(
                    "No history to carry over from {} ({}), recording {} as new",
                    old_path, e, new_path
                );
                let unsaved = HistoryEvent::Rename {
                    from: None,
                    to: new_path.clone(),
                };
                self.backend
                    .add(&[new_path.as_str()])
                    .map_err(|e| lookup_error(e, &new_path, "HEAD"))?;
                self.backend.commit(&unsaved.to_message(), &[new_path.as_str()])?
            }
        };
        self.sync(&new_path, outcome.commit_id().map(str::to_string))
    }

    /// Mark `path` as deleted. Its earlier checkpoints stay in history.
    ///
    /// `id` is accepted for interface compatibility: every checkpoint of the
    /// path is retired together.
    pub fn delete_checkpoint(&mut self, id: &str, path: &str) -> CheckpointResult<()> {
        let path = checkpoint_path(path)?;
        debug!("Deleting checkpoints of {} (requested {})", path, id);

        if !self.backend.is_tracked(&path)? {
            debug!("{} was never checkpointed, nothing to delete", path);
            return Ok(());
        }
        self.backend.add(&[path.as_str()])?;
        let event = HistoryEvent::Delete { path: path.clone() };
        let outcome = self.backend.commit(&event.to_message(), &[path.as_str()])?;
        self.sync(&path, outcome.commit_id().map(str::to_string))
    }

    pub fn rename_all_checkpoints(&mut self, old_path: &str, new_path: &str) -> CheckpointResult<()> {
        self.rename_checkpoint(old_path, new_path)
    }

    pub fn delete_all_checkpoints(&mut self, path: &str) -> CheckpointResult<()> {
        self.delete_checkpoint("", path)
    }

    /// Most recent checkpoints of `path`, newest first, bounded by
    /// `max_checkpoints`. Never fails: errors are logged and yield no entries.
    pub fn list_checkpoints(&self, path: &str) -> Vec<Checkpoint> {
        self.list_checkpoints_limited(path, self.config.max_checkpoints)
    }

    pub fn list_checkpoints_limited(&self, path: &str, limit: usize) -> Vec<Checkpoint> {
        self.query(path, limit)
            .iter()
            .map(|commit| self.models.from_commit(commit))
            .collect()
    }

    /// History of `path`, newest first, with the event of each commit.
    /// Bounded and fail-open like [`Self::list_checkpoints`].
    pub fn history(&self, path: &str) -> Vec<HistoryEntry> {
        self.history_limited(path, self.config.max_checkpoints)
    }

    pub fn history_limited(&self, path: &str, limit: usize) -> Vec<HistoryEntry> {
        self.query(path, limit)
            .iter()
            .map(|commit| self.models.history_entry(commit))
            .collect()
    }

    /// Look up one checkpoint of `path` by id or unambiguous id prefix.
    pub fn checkpoint(&self, id: &str, path: &str) -> CheckpointResult<Checkpoint> {
        let path = checkpoint_path(path)?;
        let target = self
            .backend
            .resolve(id)
            .map_err(|e| lookup_error(e, &path, id))?;
        self.backend
            .log(&LogQuery::for_path(path.as_str()))?
            .iter()
            .find(|commit| commit.id == target)
            .map(|commit| self.models.from_commit(commit))
            .ok_or_else(|| CheckpointError::not_found(&path, id))
    }

    fn query(&self, path: &str, limit: usize) -> Vec<CommitInfo> {
        let path = match checkpoint_path(path) {
            Ok(path) => path,
            Err(e) => {
                warn!("Not listing checkpoints: {}", e);
                return Vec::new();
            }
        };
        debug!("Listing checkpoints for {}", path);

        let query = LogQuery::for_path(path.as_str()).with_limit(limit);
        self.backend.log(&query).unwrap_or_else(|e| {
            warn!("Listing checkpoints for {} failed: {}", path, e);
            Vec::new()
        })
    }

    /// Push the branch after a write. Local-only repositories skip this.
    fn sync(&mut self, path: &str, local_commit: Option<String>) -> CheckpointResult<()> {
        let remote = self.config.remote_name.as_str();
        if !self.backend.has_remote(remote) {
            debug!("No remote {}, {} stays local", remote, path);
            return Ok(());
        }
        self.backend
            .push(remote, &self.branch, true)
            .map_err(|source| {
                warn!("Push of {} to {} failed: {}", path, remote, source);
                CheckpointError::Push {
                    path: path.to_string(),
                    local_commit,
                    source,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    // Attached backends never touch the root directory.
    fn open(backend: MockBackend) -> CheckpointStore<MockBackend> {
        let config = CheckpointConfig::new("/srv/notebooks", "ALICE", "test").with_timezone("UTC");
        CheckpointStore::open_with_backend(config, backend).unwrap().0
    }

    fn attached() -> CheckpointStore<MockBackend> {
        open(MockBackend::attached("ALICE-test"))
    }

    #[test]
    fn test_checkpoint_path_normalization() {
        assert_eq!(checkpoint_path("/notes.ipynb").unwrap(), "notes.ipynb");
        assert_eq!(checkpoint_path("a//b/./c.ipynb/").unwrap(), "a/b/c.ipynb");
        assert!(checkpoint_path("").is_err());
        assert!(checkpoint_path("/").is_err());
        assert!(checkpoint_path("../secret").is_err());
        assert!(checkpoint_path("a/../../b").is_err());
        assert!(checkpoint_path(".git/config").is_err());
        assert!(checkpoint_path("a\nb").is_err());
    }

    #[test]
    fn test_create_records_create_then_modify() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        store.create_checkpoint("a.ipynb").unwrap();
        store.backend.put_file("a.ipynb");
        store.create_checkpoint("/a.ipynb").unwrap();

        let history = store.history("a.ipynb");
        assert_eq!(history.len(), 2);
        assert!(matches!(history[0].event, HistoryEvent::Modify { .. }));
        assert!(matches!(history[1].event, HistoryEvent::Create { .. }));
    }

    #[test]
    fn test_create_is_idempotent_without_changes() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        let first = store.create_checkpoint("a.ipynb").unwrap();
        let second = store.create_checkpoint("a.ipynb").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.backend.commits.len(), 1);
    }

    #[test]
    fn test_create_missing_file_is_not_found() {
        let mut store = attached();
        let err = store.create_checkpoint("ghost.ipynb").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_push_failure_keeps_local_commit() {
        let mut store = attached();
        store.backend.fail_push = true;
        store.backend.put_file("a.ipynb");

        match store.create_checkpoint("a.ipynb") {
            Err(CheckpointError::Push { local_commit, .. }) => {
                let commit = store.backend.last_commit().unwrap();
                assert_eq!(local_commit.as_deref(), Some(commit.info.id.as_str()));
            }
            other => panic!("expected push failure, got {:?}", other),
        }
    }

    #[test]
    fn test_commit_failure_is_not_pushed() {
        let mut store = attached();
        store.backend.fail_commit = true;
        store.backend.put_file("a.ipynb");

        let err = store.create_checkpoint("a.ipynb").unwrap_err();
        assert!(matches!(err, CheckpointError::Backend(_)));
        assert_eq!(err.status_code(), 500);
        assert!(!store.backend.called("push"));
    }

    #[test]
    fn test_local_only_store_never_pushes() {
        let mut backend = MockBackend::attached("ALICE-test");
        backend.remotes.clear();
        let mut store = open(backend);
        store.backend.put_file("a.ipynb");
        store.create_checkpoint("a.ipynb").unwrap();
        assert!(!store.backend.called("push"));
    }

    #[test]
    fn test_list_is_bounded_and_newest_first() {
        let mut store = attached();
        for _ in 0..12 {
            store.backend.put_file("a.ipynb");
            store.create_checkpoint("a.ipynb").unwrap();
        }

        let listed = store.list_checkpoints("a.ipynb");
        assert_eq!(listed.len(), 10);
        assert!(listed
            .windows(2)
            .all(|pair| pair[0].last_modified >= pair[1].last_modified));
        assert_eq!(listed[0].id, store.backend.last_commit().unwrap().info.id);
        assert_eq!(store.list_checkpoints_limited("a.ipynb", 3).len(), 3);
    }

    #[test]
    fn test_history_is_bounded_like_list() {
        let mut store = attached();
        for _ in 0..12 {
            store.backend.put_file("a.ipynb");
            store.create_checkpoint("a.ipynb").unwrap();
        }

        let history = store.history("a.ipynb");
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].checkpoint.id, store.list_checkpoints("a.ipynb")[0].id);
        assert_eq!(store.history_limited("a.ipynb", 20).len(), 12);

        store.backend.fail_log = true;
        assert!(store.history("a.ipynb").is_empty());
    }

    #[test]
    fn test_list_fails_open() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        store.create_checkpoint("a.ipynb").unwrap();
        store.backend.fail_log = true;

        assert!(store.list_checkpoints("a.ipynb").is_empty());
        assert!(store.list_checkpoints("../escape").is_empty());
    }

    #[test]
    fn test_restore_snapshots_pending_edits() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        let first = store.create_checkpoint("a.ipynb").unwrap();
        store.backend.put_file("a.ipynb");
        store.create_checkpoint("a.ipynb").unwrap();
        store.backend.put_file("a.ipynb");

        store.restore_checkpoint(&first.id, "a.ipynb").unwrap();

        let history = store.history("a.ipynb");
        assert_eq!(history.len(), 3);
        assert_eq!(
            history[0].event,
            HistoryEvent::Restore {
                path: "a.ipynb".to_string(),
                target: first.id.clone(),
            }
        );
        assert!(store.backend.called("checkout_path"));
    }

    #[test]
    fn test_restore_unknown_id_has_no_side_effects() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        store.create_checkpoint("a.ipynb").unwrap();
        store.backend.put_file("a.ipynb");
        let commits = store.backend.count("commit");

        let err = store.restore_checkpoint("ffff", "a.ipynb").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.backend.count("commit"), commits);
    }

    #[test]
    fn test_restore_without_pending_edits_adds_no_commit() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        let first = store.create_checkpoint("a.ipynb").unwrap();

        store.restore_checkpoint(&first.id, "a.ipynb").unwrap();
        assert_eq!(store.backend.commits.len(), 1);
    }

    #[test]
    fn test_restore_stays_local() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        let first = store.create_checkpoint("a.ipynb").unwrap();
        store.backend.put_file("a.ipynb");
        let pushes = store.backend.count("push");
        store.backend.fail_push = true;

        store.restore_checkpoint(&first.id, "a.ipynb").unwrap();

        assert_eq!(store.backend.count("push"), pushes);
        assert_eq!(store.backend.on_disk["a.ipynb"], 1);
        assert_eq!(store.backend.commits.len(), 2);
    }

    #[test]
    fn test_restore_to_checkpoint_without_path_is_not_found() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        store.create_checkpoint("a.ipynb").unwrap();
        store.backend.remove_file("a.ipynb");
        store.delete_checkpoint("", "a.ipynb").unwrap();
        let deleted = store.backend.last_commit().unwrap().info.id.clone();
        store.backend.put_file("a.ipynb");
        let commits = store.backend.count("commit");

        let err = store.restore_checkpoint(&deleted, "a.ipynb").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.backend.count("commit"), commits);
        assert!(!store.backend.called("checkout_path"));
    }

    #[test]
    fn test_rename_carries_history() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        store.create_checkpoint("a.ipynb").unwrap();
        store.backend.remove_file("a.ipynb");
        store.backend.put_file("b.ipynb");

        store.rename_checkpoint("a.ipynb", "b.ipynb").unwrap();

        let commit = store.backend.last_commit().unwrap();
        assert_eq!(commit.info.summary, "Renaming a.ipynb -> b.ipynb");
        assert_eq!(commit.paths, vec!["a.ipynb".to_string(), "b.ipynb".to_string()]);
        assert_eq!(store.list_checkpoints("b.ipynb").len(), 1);
    }

    #[test]
    fn test_rename_of_unsaved_document() {
        let mut store = attached();
        store.backend.put_file("b.ipynb");

        store.rename_checkpoint("a.ipynb", "b.ipynb").unwrap();

        let commit = store.backend.last_commit().unwrap();
        assert_eq!(commit.info.summary, "Renaming unsaved document -> b.ipynb");
        assert_eq!(commit.paths, vec!["b.ipynb".to_string()]);
    }

    #[test]
    fn test_delete_preserves_history() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        let first = store.create_checkpoint("a.ipynb").unwrap();
        store.backend.remove_file("a.ipynb");

        store.delete_checkpoint(&first.id, "a.ipynb").unwrap();

        let history = store.history("a.ipynb");
        assert_eq!(history.len(), 2);
        assert!(matches!(history[0].event, HistoryEvent::Delete { .. }));
        assert_eq!(history[1].checkpoint.id, first.id);
        assert!(!store.backend.tracked.contains_key("a.ipynb"));
    }

    #[test]
    fn test_delete_of_unknown_path_is_noop() {
        let mut store = attached();
        store.delete_all_checkpoints("never.ipynb").unwrap();
        assert!(!store.backend.called("commit"));
        assert!(!store.backend.called("push"));
    }

    #[test]
    fn test_checkpoint_lookup() {
        let mut store = attached();
        store.backend.put_file("a.ipynb");
        store.backend.put_file("b.ipynb");
        let a = store.create_checkpoint("a.ipynb").unwrap();
        let b = store.create_checkpoint("b.ipynb").unwrap();

        assert_eq!(store.checkpoint(&a.id, "a.ipynb").unwrap(), a);
        assert!(store.checkpoint(&b.id, "a.ipynb").unwrap_err().is_not_found());
        assert!(store.checkpoint("nope", "a.ipynb").unwrap_err().is_not_found());
    }
}

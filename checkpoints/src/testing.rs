//! In-memory backend for exercising store policy without a repository.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use vcs::{
    CommitInfo, CommitOutcome, Identity, LogQuery, VcsError, VcsResult, VersionControlBackend,
};

#[derive(Debug, Clone)]
pub struct MockCommit {
    pub info: CommitInfo,
    /// Paths this commit changed
    pub paths: Vec<String>,
    /// Full tree after the commit
    pub tree: BTreeMap<String, u32>,
}

/// Files are modelled as content versions on disk and in HEAD. Commits only
/// look at the paths they are given. Every mutating call is recorded by name.
#[derive(Debug, Default)]
pub struct MockBackend {
    pub initialized: bool,
    pub branch: String,
    pub remotes: Vec<String>,
    pub remote_branches: BTreeSet<String>,
    pub on_disk: BTreeMap<String, u32>,
    pub staged: BTreeSet<String>,
    pub tracked: BTreeMap<String, u32>,
    /// Oldest first
    pub commits: Vec<MockCommit>,
    pub identity: Option<Identity>,
    pub config: HashMap<String, String>,
    pub calls: Vec<String>,
    pub fail_init: bool,
    pub fail_push: bool,
    pub fail_log: bool,
    pub fail_commit: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            branch: "master".to_string(),
            ..Self::default()
        }
    }

    /// Repository already initialized and on `branch`, with `origin` linked.
    pub fn attached(branch: &str) -> Self {
        Self {
            initialized: true,
            branch: branch.to_string(),
            remotes: vec!["origin".to_string()],
            ..Self::default()
        }
    }

    /// Write new content to `path`.
    pub fn put_file(&mut self, path: &str) {
        *self.on_disk.entry(path.to_string()).or_insert(0) += 1;
    }

    pub fn remove_file(&mut self, path: &str) {
        self.on_disk.remove(path);
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls.iter().any(|call| call == name)
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.iter().filter(|call| *call == name).count()
    }

    pub fn last_commit(&self) -> Option<&MockCommit> {
        self.commits.last()
    }

    fn tree_at(&self, rev: &str) -> VcsResult<&BTreeMap<String, u32>> {
        self.commits
            .iter()
            .find(|commit| commit.info.id == rev)
            .map(|commit| &commit.tree)
            .ok_or_else(|| VcsError::RevisionNotFound(rev.to_string()))
    }

    fn record(&mut self, name: &str) {
        self.calls.push(name.to_string());
    }

    fn commit_time(&self) -> NaiveDateTime {
        let base = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|date| date.and_hms_opt(12, 0, 0))
            .unwrap_or_default();
        base + Duration::minutes(self.commits.len() as i64)
    }
}

impl VersionControlBackend for MockBackend {
    fn is_repository(&self) -> bool {
        self.initialized
    }

    fn init(&mut self) -> VcsResult<()> {
        self.record("init");
        if self.fail_init {
            return Err(VcsError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only filesystem",
            )));
        }
        self.initialized = true;
        Ok(())
    }

    fn current_branch(&self) -> VcsResult<String> {
        Ok(self.branch.clone())
    }

    fn add_remote(&mut self, name: &str, _url: &str) -> VcsResult<()> {
        self.record("add_remote");
        self.remotes.push(name.to_string());
        Ok(())
    }

    fn has_remote(&self, name: &str) -> bool {
        self.remotes.iter().any(|remote| remote == name)
    }

    fn fetch_branch(&mut self, remote: &str, branch: &str) -> VcsResult<()> {
        self.record("fetch_branch");
        if !self.remote_branches.contains(branch) {
            return Err(VcsError::BranchNotFound(format!("{}/{}", remote, branch)));
        }
        Ok(())
    }

    fn track_remote_branch(&mut self, _remote: &str, branch: &str) -> VcsResult<()> {
        self.record("track_remote_branch");
        self.branch = branch.to_string();
        Ok(())
    }

    fn create_branch(&mut self, branch: &str) -> VcsResult<()> {
        self.record("create_branch");
        self.branch = branch.to_string();
        Ok(())
    }

    fn is_tracked(&self, path: &str) -> VcsResult<bool> {
        Ok(self.tracked.contains_key(path))
    }

    fn add(&mut self, paths: &[&str]) -> VcsResult<()> {
        self.record("add");
        for path in paths {
            if !self.on_disk.contains_key(*path) && !self.tracked.contains_key(*path) {
                return Err(VcsError::PathspecNotFound(path.to_string()));
            }
            self.staged.insert(path.to_string());
        }
        Ok(())
    }

    fn add_all(&mut self) -> VcsResult<()> {
        self.record("add_all");
        let all: Vec<String> = self
            .on_disk
            .keys()
            .chain(self.tracked.keys())
            .cloned()
            .collect();
        self.staged.extend(all);
        Ok(())
    }

    fn commit(&mut self, message: &str, paths: &[&str]) -> VcsResult<CommitOutcome> {
        self.record("commit");
        if self.fail_commit {
            return Err(VcsError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "index locked",
            )));
        }

        let candidates: Vec<String> = if paths.is_empty() {
            self.staged.iter().cloned().collect()
        } else {
            for path in paths {
                if !self.staged.contains(*path) && !self.tracked.contains_key(*path) {
                    return Err(VcsError::PathspecNotFound(path.to_string()));
                }
            }
            paths.iter().map(|path| path.to_string()).collect()
        };

        let changed: Vec<String> = candidates
            .into_iter()
            .filter(|path| self.staged.contains(path))
            .filter(|path| self.on_disk.get(path) != self.tracked.get(path))
            .collect();
        for path in &changed {
            self.staged.remove(path);
        }
        if changed.is_empty() {
            return Ok(CommitOutcome::EmptyDiff);
        }

        for path in &changed {
            match self.on_disk.get(path) {
                Some(version) => self.tracked.insert(path.clone(), *version),
                None => self.tracked.remove(path),
            };
        }

        let id = format!("{:040x}", self.commits.len() + 1);
        let summary = message.lines().next().unwrap_or("").to_string();
        self.commits.push(MockCommit {
            info: CommitInfo {
                id: id.clone(),
                summary,
                message: message.to_string(),
                local_time: self.commit_time(),
                offset_minutes: 0,
            },
            paths: changed,
            tree: self.tracked.clone(),
        });
        Ok(CommitOutcome::Committed(id))
    }

    fn resolve(&self, rev: &str) -> VcsResult<String> {
        self.commits
            .iter()
            .find(|commit| !rev.is_empty() && commit.info.id.starts_with(rev))
            .map(|commit| commit.info.id.clone())
            .ok_or_else(|| VcsError::RevisionNotFound(rev.to_string()))
    }

    fn exists_at(&self, rev: &str, path: &str) -> VcsResult<bool> {
        Ok(self.tree_at(rev)?.contains_key(path))
    }

    fn checkout_path(&mut self, rev: &str, path: &str) -> VcsResult<()> {
        self.record("checkout_path");
        let version = *self
            .tree_at(rev)?
            .get(path)
            .ok_or_else(|| VcsError::PathspecNotFound(path.to_string()))?;
        self.on_disk.insert(path.to_string(), version);
        Ok(())
    }

    fn log(&self, query: &LogQuery) -> VcsResult<Vec<CommitInfo>> {
        if self.fail_log {
            return Err(VcsError::NotInitialized);
        }
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(self
            .commits
            .iter()
            .rev()
            .filter(|commit| match &query.path {
                Some(path) => commit.paths.iter().any(|p| p == path),
                None => true,
            })
            .take(limit)
            .map(|commit| commit.info.clone())
            .collect())
    }

    fn push(&mut self, remote: &str, branch: &str, _set_upstream: bool) -> VcsResult<()> {
        self.record("push");
        if self.fail_push {
            return Err(VcsError::PushRejected {
                refname: format!("refs/heads/{}", branch),
                message: format!("{} is unreachable", remote),
            });
        }
        Ok(())
    }

    fn configure_identity(&mut self, identity: &Identity) -> VcsResult<()> {
        self.identity = Some(identity.clone());
        Ok(())
    }

    fn set_config(&mut self, key: &str, value: &str) -> VcsResult<()> {
        self.config.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

//! Git operations layer
//!
//! Implements [`VersionControlBackend`] on top of git2-rs. The repository
//! lives at a fixed root; nothing here shells out to a `git` binary.

use crate::backend::{CommitOutcome, VcsError, VcsResult, VersionControlBackend};
use crate::config::GitConfig;
use crate::types::{CommitInfo, Identity, LogQuery};
use chrono::{FixedOffset, Offset, TimeZone, Utc};
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Commit, Cred, ErrorCode, FetchOptions, Index, IndexAddOption, IndexEntry, Oid,
    PushOptions, RemoteCallbacks, Repository, Signature, Sort, Tree,
};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Credential prompts answered before giving up on a remote.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

pub struct GitBackend {
    root: PathBuf,
    repo: Option<Repository>,
    config: GitConfig,
}

impl GitBackend {
    /// Bind to `root`, attaching to an existing repository if there is one.
    pub fn new(root: impl Into<PathBuf>, config: GitConfig) -> Self {
        let root = root.into();
        let repo = Repository::open(&root).ok();
        Self { root, repo, config }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    fn repo(&self) -> VcsResult<&Repository> {
        self.repo.as_ref().ok_or(VcsError::NotInitialized)
    }

    fn head_commit(&self) -> VcsResult<Option<Commit<'_>>> {
        let repo = self.repo()?;
        match repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if is_unborn(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Signature stamped with the configured zone's current UTC offset.
    fn signature(&self) -> VcsResult<Signature<'static>> {
        let repo = self.repo()?;
        let now = Utc::now();
        let offset_minutes = self
            .config
            .timezone
            .offset_from_utc_datetime(&now.naive_utc())
            .fix()
            .local_minus_utc()
            / 60;
        let time = git2::Time::new(now.timestamp(), offset_minutes);

        let configured = repo.signature().ok();
        let name = configured
            .as_ref()
            .and_then(|s| s.name())
            .unwrap_or(self.config.fallback_identity.name.as_str())
            .to_string();
        let email = configured
            .as_ref()
            .and_then(|s| s.email())
            .unwrap_or(self.config.fallback_identity.email.as_str())
            .to_string();

        Ok(Signature::new(&name, &email, &time)?)
    }

    fn callbacks<'a>(&self) -> RemoteCallbacks<'a> {
        let credentials = self.config.credentials.clone();
        let git_config = self.repo.as_ref().and_then(|r| r.config().ok());
        let mut attempts = 0;

        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username_from_url, allowed| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("remote rejected the supplied credentials"));
            }
            if allowed.is_user_pass_plaintext() {
                if let Some(creds) = &credentials {
                    return Cred::userpass_plaintext(&creds.username, &creds.password);
                }
                if let Some(cfg) = &git_config {
                    if let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url) {
                        return Ok(cred);
                    }
                }
            }
            if allowed.is_ssh_key() {
                if let Some(user) = username_from_url {
                    return Cred::ssh_key_from_agent(user);
                }
            }
            Cred::default()
        });
        callbacks
    }
}

fn is_unborn(e: &git2::Error) -> bool {
    matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound)
}

/// True when an index/tree path equals `path` or lies beneath it.
fn covers(entry: &[u8], path: &str) -> bool {
    let path = path.as_bytes();
    entry == path
        || (entry.len() > path.len() && entry.starts_with(path) && entry[path.len()] == b'/')
}

fn entry_path(entry: &IndexEntry) -> VcsResult<PathBuf> {
    std::str::from_utf8(&entry.path)
        .map(PathBuf::from)
        .map_err(|_| VcsError::InvalidUtf8("index path".to_string()))
}

fn tree_entry(tree: &Tree<'_>, path: &str) -> Option<(Oid, i32)> {
    tree.get_path(Path::new(path))
        .ok()
        .map(|entry| (entry.id(), entry.filemode()))
}

/// Whether `commit` changed `path` relative to every one of its parents.
fn touches(commit: &Commit<'_>, path: &str) -> VcsResult<bool> {
    let current = tree_entry(&commit.tree()?, path);
    if commit.parent_count() == 0 {
        return Ok(current.is_some());
    }
    for parent in commit.parents() {
        if tree_entry(&parent.tree()?, path) == current {
            return Ok(false);
        }
    }
    Ok(true)
}

fn read_commit(commit: &Commit<'_>) -> VcsResult<CommitInfo> {
    let time = commit.time();
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60).ok_or_else(|| {
        VcsError::InvalidTimestamp(format!("offset {} minutes", time.offset_minutes()))
    })?;
    let utc = chrono::DateTime::from_timestamp(time.seconds(), 0)
        .ok_or_else(|| VcsError::InvalidTimestamp(format!("{} seconds", time.seconds())))?;

    let message = String::from_utf8_lossy(commit.message_bytes()).into_owned();
    let summary = message.lines().next().unwrap_or("").to_string();

    Ok(CommitInfo {
        id: commit.id().to_string(),
        summary,
        message,
        local_time: utc.with_timezone(&offset).naive_local(),
        offset_minutes: time.offset_minutes(),
    })
}

impl VersionControlBackend for GitBackend {
    fn is_repository(&self) -> bool {
        self.repo.is_some()
    }

    fn init(&mut self) -> VcsResult<()> {
        std::fs::create_dir_all(&self.root)?;
        let repo = Repository::init(&self.root)?;
        info!("Initialized git repository at {}", self.root.display());
        self.repo = Some(repo);
        Ok(())
    }

    fn current_branch(&self) -> VcsResult<String> {
        let repo = self.repo()?;
        let head = repo.find_reference("HEAD")?;
        match head.symbolic_target() {
            Some(target) => Ok(target
                .strip_prefix("refs/heads/")
                .unwrap_or(target)
                .to_string()),
            None => Err(VcsError::BranchNotFound("detached HEAD".to_string())),
        }
    }

    fn add_remote(&mut self, name: &str, url: &str) -> VcsResult<()> {
        self.repo()?.remote(name, url)?;
        Ok(())
    }

    fn has_remote(&self, name: &str) -> bool {
        self.repo
            .as_ref()
            .map(|repo| repo.find_remote(name).is_ok())
            .unwrap_or(false)
    }

    fn fetch_branch(&mut self, remote: &str, branch: &str) -> VcsResult<()> {
        let repo = self.repo()?;
        let mut handle = repo
            .find_remote(remote)
            .map_err(|_| VcsError::RemoteNotFound(remote.to_string()))?;

        let tracking = format!("refs/remotes/{}/{}", remote, branch);
        let refspec = format!("refs/heads/{}:{}", branch, tracking);
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks());
        handle.fetch(&[refspec.as_str()], Some(&mut options), None)?;

        // A refspec naming a missing branch fetches nothing without failing.
        if repo.find_reference(&tracking).is_err() {
            return Err(VcsError::BranchNotFound(format!("{}/{}", remote, branch)));
        }
        debug!("Fetched {}", tracking);
        Ok(())
    }

    fn track_remote_branch(&mut self, remote: &str, branch: &str) -> VcsResult<()> {
        let repo = self.repo()?;
        let upstream = format!("{}/{}", remote, branch);
        let commit = repo
            .find_reference(&format!("refs/remotes/{}", upstream))
            .map_err(|_| VcsError::BranchNotFound(upstream.clone()))?
            .peel_to_commit()?;

        // Refuses to clobber untracked files, before any ref is touched.
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;

        let mut local = repo.branch(branch, &commit, false)?;
        local.set_upstream(Some(upstream.as_str()))?;
        repo.set_head(&format!("refs/heads/{}", branch))?;
        Ok(())
    }

    fn create_branch(&mut self, branch: &str) -> VcsResult<()> {
        let repo = self.repo()?;
        if repo.find_branch(branch, BranchType::Local).is_err() {
            if let Some(commit) = self.head_commit()? {
                repo.branch(branch, &commit, false)?;
            }
        }
        repo.set_head(&format!("refs/heads/{}", branch))?;
        Ok(())
    }

    fn is_tracked(&self, path: &str) -> VcsResult<bool> {
        Ok(match self.head_commit()? {
            Some(commit) => tree_entry(&commit.tree()?, path).is_some(),
            None => false,
        })
    }

    fn add(&mut self, paths: &[&str]) -> VcsResult<()> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        for path in paths {
            let on_disk = self.root.join(path).exists();
            let tracked = index.iter().any(|entry| covers(&entry.path, path));
            if !on_disk && !tracked {
                return Err(VcsError::PathspecNotFound(path.to_string()));
            }
            if on_disk {
                index.add_all([*path], IndexAddOption::DEFAULT, None)?;
            }
            // Picks up deletions of tracked paths.
            index.update_all([*path], None)?;
        }
        index.write()?;
        Ok(())
    }

    fn add_all(&mut self) -> VcsResult<()> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        Ok(())
    }

    fn commit(&mut self, message: &str, paths: &[&str]) -> VcsResult<CommitOutcome> {
        let repo = self.repo()?;
        let parent = self.head_commit()?;
        let parent_tree = match &parent {
            Some(commit) => Some(commit.tree()?),
            None => None,
        };

        let mut index = repo.index()?;
        let tree_id = if paths.is_empty() {
            index.write_tree()?
        } else {
            // HEAD's tree with only the named paths taken from the index.
            let mut partial = Index::new()?;
            if let Some(tree) = &parent_tree {
                partial.read_tree(tree)?;
            }
            for path in paths {
                let in_head = parent_tree
                    .as_ref()
                    .map(|tree| tree_entry(tree, path).is_some())
                    .unwrap_or(false);
                let staged: Vec<IndexEntry> = index
                    .iter()
                    .filter(|entry| covers(&entry.path, path))
                    .collect();
                if !in_head && staged.is_empty() {
                    return Err(VcsError::PathspecNotFound(path.to_string()));
                }

                let stale = partial
                    .iter()
                    .filter(|entry| covers(&entry.path, path))
                    .map(|entry| entry_path(&entry))
                    .collect::<VcsResult<Vec<_>>>()?;
                for stale_path in stale {
                    partial.remove(&stale_path, 0)?;
                }
                for entry in &staged {
                    partial.add(entry)?;
                }
            }
            partial.write_tree_to(repo)?
        };

        let tree = repo.find_tree(tree_id)?;
        let unchanged = match &parent_tree {
            Some(parent_tree) => parent_tree.id() == tree_id,
            None => tree.is_empty(),
        };
        if unchanged {
            debug!("Nothing to commit for {:?}", paths);
            return Ok(CommitOutcome::EmptyDiff);
        }

        let signature = self.signature()?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        debug!("Committed {} ({})", oid, message.lines().next().unwrap_or(""));
        Ok(CommitOutcome::Committed(oid.to_string()))
    }

    fn resolve(&self, rev: &str) -> VcsResult<String> {
        let repo = self.repo()?;
        let commit = repo
            .revparse_single(rev)
            .and_then(|object| object.peel_to_commit())
            .map_err(|_| VcsError::RevisionNotFound(rev.to_string()))?;
        Ok(commit.id().to_string())
    }

    fn exists_at(&self, rev: &str, path: &str) -> VcsResult<bool> {
        let commit = self
            .repo()?
            .revparse_single(rev)
            .and_then(|object| object.peel_to_commit())
            .map_err(|_| VcsError::RevisionNotFound(rev.to_string()))?;
        Ok(tree_entry(&commit.tree()?, path).is_some())
    }

    fn checkout_path(&mut self, rev: &str, path: &str) -> VcsResult<()> {
        let repo = self.repo()?;
        let commit = repo
            .revparse_single(rev)
            .and_then(|object| object.peel_to_commit())
            .map_err(|_| VcsError::RevisionNotFound(rev.to_string()))?;
        let tree = commit.tree()?;
        if tree_entry(&tree, path).is_none() {
            return Err(VcsError::PathspecNotFound(path.to_string()));
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.force().recreate_missing(true).path(path);
        repo.checkout_tree(tree.as_object(), Some(&mut checkout))?;
        Ok(())
    }

    fn log(&self, query: &LogQuery) -> VcsResult<Vec<CommitInfo>> {
        let repo = self.repo()?;
        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push_head()?;

        let limit = query.limit.unwrap_or(usize::MAX);
        let mut commits = Vec::new();
        for oid in revwalk {
            if commits.len() >= limit {
                break;
            }
            let commit = repo.find_commit(oid?)?;
            if let Some(path) = &query.path {
                if !touches(&commit, path)? {
                    continue;
                }
            }
            commits.push(read_commit(&commit)?);
        }
        Ok(commits)
    }

    fn push(&mut self, remote: &str, branch: &str, set_upstream: bool) -> VcsResult<()> {
        let repo = self.repo()?;
        let mut handle = repo
            .find_remote(remote)
            .map_err(|_| VcsError::RemoteNotFound(remote.to_string()))?;

        let refname = format!("refs/heads/{}", branch);
        let refspec = format!("{}:{}", refname, refname);
        let rejection: RefCell<Option<String>> = RefCell::new(None);
        {
            let mut callbacks = self.callbacks();
            callbacks.push_update_reference(|_refname, status| {
                if let Some(msg) = status {
                    *rejection.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            handle.push(&[refspec.as_str()], Some(&mut options))?;
        }

        if let Some(message) = rejection.into_inner() {
            return Err(VcsError::PushRejected { refname, message });
        }

        if set_upstream {
            let mut local = repo.find_branch(branch, BranchType::Local)?;
            if local.upstream().is_err() {
                let upstream = format!("{}/{}", remote, branch);
                if let Err(e) = local.set_upstream(Some(upstream.as_str())) {
                    debug!("Could not record upstream for {}: {}", branch, e);
                }
            }
        }
        debug!("Pushed {} to {}", refname, remote);
        Ok(())
    }

    fn configure_identity(&mut self, identity: &Identity) -> VcsResult<()> {
        let mut config = self.repo()?.config()?;
        config.set_str("user.name", &identity.name)?;
        config.set_str("user.email", &identity.email)?;
        Ok(())
    }

    fn set_config(&mut self, key: &str, value: &str) -> VcsResult<()> {
        self.repo()?.config()?.set_str(key, value)?;
        Ok(())
    }
}

use crate::branch::branch_name;
use crate::error::{CheckpointError, CheckpointResult};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;
use vcs::{Credentials, GitConfig, Identity, DEFAULT_REMOTE};

pub const DEFAULT_MAX_CHECKPOINTS: usize = 10;
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

fn default_max_checkpoints() -> usize {
    DEFAULT_MAX_CHECKPOINTS
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_remote_name() -> String {
    DEFAULT_REMOTE.to_string()
}

/// Remote the branch is synchronized with.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl RemoteConfig {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// A remote is only registered when url and both credentials are present.
    pub fn is_complete(&self) -> bool {
        !self.url.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Documents directory; the repository is rooted here
    pub root_dir: PathBuf,
    pub identity: String,
    pub environment: String,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
    /// IANA zone used to write and interpret commit timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_remote_name")]
    pub remote_name: String,
}

impl CheckpointConfig {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        identity: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            identity: identity.into(),
            environment: environment.into(),
            remote: None,
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
            timezone: default_timezone(),
            remote_name: default_remote_name(),
        }
    }

    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_max_checkpoints(mut self, max_checkpoints: usize) -> Self {
        self.max_checkpoints = max_checkpoints;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = remote_name.into();
        self
    }

    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    /// Read the deployment environment contract:
    /// `DEPLOY_ENV`, `USER`, `GIT_USER`, `GIT_PASS`, `GIT_EMAIL`, `GIT_URL`
    /// and `DEBUG_HOME` (falling back to `HOME`) as the documents root.
    pub fn from_env() -> CheckpointResult<Self> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let environment = var("DEPLOY_ENV")
            .ok_or_else(|| CheckpointError::InvalidConfig("DEPLOY_ENV is not set".to_string()))?;
        let identity = var("USER")
            .ok_or_else(|| CheckpointError::InvalidConfig("USER is not set".to_string()))?
            .to_uppercase();
        let root_dir = var("DEBUG_HOME")
            .or_else(|| var("HOME"))
            .ok_or_else(|| CheckpointError::InvalidConfig("HOME is not set".to_string()))?;

        let mut config = Self::new(root_dir, identity, environment);
        match (var("GIT_USER"), var("GIT_PASS"), var("GIT_EMAIL"), var("GIT_URL")) {
            (Some(user), Some(pass), Some(email), Some(url)) => {
                config.remote = Some(RemoteConfig::new(url, user, pass).with_email(email));
            }
            _ => warn!("Git remote environment variables not set, assuming local git only"),
        }
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> CheckpointResult<Self> {
        toml::from_str(contents).map_err(|e| CheckpointError::InvalidConfig(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn branch_name(&self) -> CheckpointResult<String> {
        branch_name(&self.identity, &self.environment)
    }

    pub fn zone(&self) -> CheckpointResult<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| CheckpointError::InvalidConfig(format!("Unknown timezone: {}", self.timezone)))
    }

    /// Remote to register at bootstrap, if fully specified.
    pub fn active_remote(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref().filter(|remote| remote.is_complete())
    }

    pub fn writer_identity(&self) -> Identity {
        let email = self
            .remote
            .as_ref()
            .and_then(|remote| remote.email.clone())
            .filter(|email| !email.is_empty())
            .unwrap_or_else(|| format!("{}@localhost", self.identity.to_lowercase()));
        Identity::new(self.identity.clone(), email)
    }

    pub fn git_config(&self) -> CheckpointResult<GitConfig> {
        let mut config = GitConfig::new()
            .with_fallback_identity(self.writer_identity())
            .with_timezone(self.zone()?);
        if let Some(remote) = self.active_remote() {
            config = config.with_credentials(Credentials::new(
                remote.username.clone(),
                remote.password.clone(),
            ));
        }
        config.validate().map_err(CheckpointError::InvalidConfig)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.root_dir.as_os_str().is_empty() {
            return Err("Root directory cannot be empty".to_string());
        }

        if self.identity.trim().is_empty() {
            return Err("Identity cannot be empty".to_string());
        }

        if self.environment.trim().is_empty() {
            return Err("Environment cannot be empty".to_string());
        }

        if self.max_checkpoints == 0 {
            return Err("Max checkpoints must be greater than 0".to_string());
        }

        if self.remote_name.is_empty() {
            return Err("Remote name cannot be empty".to_string());
        }

        self.zone().map_err(|e| e.to_string())?;
        self.branch_name().map_err(|e| e.to_string())?;

        Ok(())
    }
}

use crate::types::{Credentials, Identity};
use chrono_tz::Tz;

/// Remote name used when a configuration does not name one.
pub const DEFAULT_REMOTE: &str = "origin";

#[derive(Debug, Clone)]
pub struct GitConfig {
    pub credentials: Option<Credentials>,
    /// Signature used when the repository has no configured identity
    pub fallback_identity: Identity,
    /// Zone whose UTC offset is stamped on every commit this backend writes
    pub timezone: Tz,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            fallback_identity: Identity::new("checkpoints", "checkpoints@localhost"),
            timezone: chrono_tz::UTC,
        }
    }
}

impl GitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_fallback_identity(mut self, identity: Identity) -> Self {
        self.fallback_identity = identity;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.fallback_identity.name.trim().is_empty() {
            return Err("Fallback identity name cannot be empty".to_string());
        }

        if let Some(credentials) = &self.credentials {
            if credentials.username.is_empty() {
                return Err("Remote username cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

//! Branch names derived from identity and environment.

use crate::error::{CheckpointError, CheckpointResult};

/// Replace anything outside `[A-Za-z0-9._-]` with `-`, collapse dash runs and
/// trim separators from both ends.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let c = if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// `{identity}-{environment}`, sanitized and checked against git's ref rules.
pub fn branch_name(identity: &str, environment: &str) -> CheckpointResult<String> {
    let identity = sanitize_component(identity);
    let environment = sanitize_component(environment);
    if identity.is_empty() || environment.is_empty() {
        return Err(CheckpointError::InvalidConfig(
            "Identity and environment must contain at least one branch-safe character"
                .to_string(),
        ));
    }

    let name = format!("{}-{}", identity, environment);
    if name.ends_with(".lock") || !git2::Reference::is_valid_name(&format!("refs/heads/{}", name))
    {
        return Err(CheckpointError::InvalidConfig(format!(
            "Invalid branch name: {}",
            name
        )));
    }
    Ok(name)
}

// ABOUTME: Validation utilities for workspace identifiers and run options
// ABOUTME: Rejects ids that could be abused as path fragments or log injection vectors

use crate::error::{RunnerError, RunnerResult};

/// Longest workspace id accepted.
pub const MAX_WORKSPACE_ID_LEN: usize = 100;

/// Validates a workspace id.
///
/// Workspace ids become directory names under the workspaces base path and
/// container names, so only ASCII letters, digits, `-` and `_` are allowed.
///
/// # Examples
///
/// ```
/// use runbox_runner::validation::validate_workspace_id;
///
/// assert!(validate_workspace_id("W1").is_ok());
/// assert!(validate_workspace_id("").is_err());
/// assert!(validate_workspace_id("../etc").is_err());
/// ```
pub fn validate_workspace_id(workspace_id: &str) -> RunnerResult<()> {
    if workspace_id.is_empty() {
        return Err(RunnerError::InvalidWorkspaceId {
            reason: "workspace id cannot be empty".to_string(),
        });
    }

    if workspace_id.len() > MAX_WORKSPACE_ID_LEN {
        return Err(RunnerError::InvalidWorkspaceId {
            reason: format!(
                "workspace id is longer than {} characters",
                MAX_WORKSPACE_ID_LEN
            ),
        });
    }

    if let Some(bad) = workspace_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(RunnerError::InvalidWorkspaceId {
            reason: format!("unexpected character {:?}", bad),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_workspace_ids() {
        assert!(validate_workspace_id("W1").is_ok());
        assert!(validate_workspace_id("workspace_name").is_ok());
        assert!(validate_workspace_id("my-workspace-2024").is_ok());
    }

    #[test]
    fn test_empty_workspace_id() {
        assert!(validate_workspace_id("").is_err());
    }

    #[test]
    fn test_path_fragments_rejected() {
        assert!(validate_workspace_id("..").is_err());
        assert!(validate_workspace_id("../etc").is_err());
        assert!(validate_workspace_id("a/b").is_err());
        assert!(validate_workspace_id("a\\b").is_err());
    }

    #[test]
    fn test_control_characters_rejected() {
        assert!(validate_workspace_id("test\nline").is_err());
        assert!(validate_workspace_id("test\0null").is_err());
    }

    #[test]
    fn test_length_limit() {
        let long = "a".repeat(MAX_WORKSPACE_ID_LEN + 1);
        assert!(validate_workspace_id(&long).is_err());
        let exact = "a".repeat(MAX_WORKSPACE_ID_LEN);
        assert!(validate_workspace_id(&exact).is_ok());
    }
}

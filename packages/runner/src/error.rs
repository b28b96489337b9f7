// ABOUTME: Error taxonomy for the runner crate
// ABOUTME: Maps every failure to a stable machine-readable code and an HTTP-class status

use thiserror::Error;

/// Errors produced by path resolution, preview, executors and the session registry.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Path '{path}' escapes the workspace root")]
    PathTraversal { path: String },

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("No execution strategy for '{extension}' files")]
    UnsupportedType { extension: String },

    #[error("Launch failed: {reason}")]
    LaunchFailed { reason: String },

    #[error("Execution timed out after {millis}ms")]
    TimedOut { millis: u64 },

    #[error("Execution crashed: {reason}")]
    Crashed { reason: String },

    #[error("Invalid workspace id: {reason}")]
    InvalidWorkspaceId { reason: String },

    #[error("Invalid run options: {reason}")]
    InvalidOptions { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;

impl RunnerError {
    pub fn traversal(path: impl Into<String>) -> Self {
        RunnerError::PathTraversal { path: path.into() }
    }

    pub fn file_not_found(name: impl Into<String>) -> Self {
        RunnerError::NotFound {
            what: "File",
            name: name.into(),
        }
    }

    pub fn workspace_not_found(name: impl Into<String>) -> Self {
        RunnerError::NotFound {
            what: "Workspace",
            name: name.into(),
        }
    }

    pub fn launch_failed(reason: impl Into<String>) -> Self {
        RunnerError::LaunchFailed {
            reason: reason.into(),
        }
    }

    /// Machine-readable error code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::PathTraversal { .. } => "PATH_TRAVERSAL",
            RunnerError::NotFound { .. } => "NOT_FOUND",
            RunnerError::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            RunnerError::LaunchFailed { .. } => "LAUNCH_FAILED",
            RunnerError::TimedOut { .. } => "TIMED_OUT",
            RunnerError::Crashed { .. } => "CRASHED",
            RunnerError::InvalidWorkspaceId { .. } => "INVALID_WORKSPACE_ID",
            RunnerError::InvalidOptions { .. } => "INVALID_OPTIONS",
            RunnerError::Io(_) => "IO_ERROR",
            RunnerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// HTTP status class for this error.
    ///
    /// Path problems are always reported as 404 so a probe cannot tell an
    /// escaping path apart from a missing file.
    pub fn status_code(&self) -> u16 {
        match self {
            RunnerError::PathTraversal { .. } | RunnerError::NotFound { .. } => 404,
            RunnerError::UnsupportedType { .. }
            | RunnerError::InvalidWorkspaceId { .. }
            | RunnerError::InvalidOptions { .. } => 400,
            RunnerError::LaunchFailed { .. } => 502,
            RunnerError::TimedOut { .. } => 504,
            RunnerError::Crashed { .. } => 422,
            RunnerError::Io(_) | RunnerError::Serialization(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traversal_maps_to_not_found_status() {
        let err = RunnerError::traversal("../../etc/passwd");
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.code(), "PATH_TRAVERSAL");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_launch_failed_keeps_diagnostic() {
        let err = RunnerError::launch_failed("image pull failed: manifest unknown");
        assert_eq!(
            err.to_string(),
            "Launch failed: image pull failed: manifest unknown"
        );
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_io_error_is_server_side() {
        let err: RunnerError = std::io::Error::other("disk gone").into();
        assert_eq!(err.status_code(), 500);
    }
}

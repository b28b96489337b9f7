// ABOUTME: Resolves preview requests to files inside a workspace
// ABOUTME: Rejects traversal and picks the content type served for each file

use crate::error::{RunnerError, RunnerResult};
use crate::paths;
use crate::validation::validate_workspace_id;
use crate::workspace::WorkspaceStore;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// File served when the request names no file or a directory.
pub const INDEX_FILE: &str = "index.html";

/// Bytes and content type for one preview response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewContent {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Serves workspace files as static content.
///
/// Read-only and independent of the session registry, so previews keep
/// working while an execution is active in the same workspace.
#[derive(Clone)]
pub struct PreviewServer {
    workspaces: Arc<dyn WorkspaceStore>,
}

impl PreviewServer {
    pub fn new(workspaces: Arc<dyn WorkspaceStore>) -> Self {
        Self { workspaces }
    }

    /// Read `relative_path` from the workspace.
    ///
    /// An empty path serves `index.html`; a directory serves its `index.html`.
    /// Escaping paths fail with `PathTraversal`, missing files with `NotFound`.
    pub async fn serve(&self, workspace_id: &str, relative_path: &str) -> RunnerResult<PreviewContent> {
        validate_workspace_id(workspace_id)?;
        let root = self.workspaces.root(workspace_id).await?;

        let relative = if relative_path.trim_matches('/').is_empty() {
            INDEX_FILE
        } else {
            relative_path
        };

        let mut target = paths::resolve_existing(&root, relative).await?;
        if tokio::fs::metadata(&target).await?.is_dir() {
            let index = format!("{}/{}", paths::normalize_relative(relative)?, INDEX_FILE);
            target = paths::resolve_existing(&root, &index).await?;
        }

        debug!("Serving preview {}/{} -> {}", workspace_id, relative, target.display());

        let bytes = tokio::fs::read(&target).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RunnerError::file_not_found(relative),
            _ => RunnerError::Io(e),
        })?;

        Ok(PreviewContent {
            bytes,
            content_type: content_type_for(&target),
        })
    }
}

/// Content type from the file extension alone.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

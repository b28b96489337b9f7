// ABOUTME: Workspace store collaborator mapping workspace ids to root directories
// ABOUTME: Directory-backed implementation plus a path-safe file listing

use crate::error::{RunnerError, RunnerResult};
use crate::validation::validate_workspace_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Resolves workspace ids to root directories.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Root directory of an existing workspace, `NotFound` otherwise.
    async fn root(&self, workspace_id: &str) -> RunnerResult<PathBuf>;

    async fn exists(&self, workspace_id: &str) -> bool {
        self.root(workspace_id).await.is_ok()
    }

    /// Create the workspace root if needed and return it.
    async fn create(&self, workspace_id: &str) -> RunnerResult<PathBuf>;
}

/// Workspaces are directories named by id under a base path.
#[derive(Debug, Clone)]
pub struct DirectoryWorkspaceStore {
    base: PathBuf,
}

impl DirectoryWorkspaceStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, workspace_id: &str) -> RunnerResult<PathBuf> {
        validate_workspace_id(workspace_id)?;
        let base = if self.base.is_absolute() {
            self.base.clone()
        } else {
            std::env::current_dir()?.join(&self.base)
        };
        Ok(crate::paths::normalize_root(&base).join(workspace_id))
    }
}

#[async_trait]
impl WorkspaceStore for DirectoryWorkspaceStore {
    async fn root(&self, workspace_id: &str) -> RunnerResult<PathBuf> {
        let path = self.path_for(workspace_id)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            _ => Err(RunnerError::workspace_not_found(workspace_id)),
        }
    }

    async fn create(&self, workspace_id: &str) -> RunnerResult<PathBuf> {
        let path = self.path_for(workspace_id)?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }
}

/// Entry returned by [`list_files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFile {
    /// `/`-separated path relative to the workspace root.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

const MAX_LISTING_DEPTH: usize = 16;

/// List the files under a workspace root, sorted by path.
///
/// Symlinks are reported but never followed, so the listing cannot wander
/// outside the root.
pub async fn list_files(root: &Path) -> RunnerResult<Vec<WorkspaceFile>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(MAX_LISTING_DEPTH)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let metadata = entry.metadata().ok();
            files.push(WorkspaceFile {
                path,
                is_dir: entry.file_type().is_dir(),
                size: metadata.map(|m| m.len()).unwrap_or(0),
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok::<_, RunnerError>(files)
    })
    .await
    .map_err(|e| RunnerError::Io(std::io::Error::other(e)))?
}

// ABOUTME: Path resolution confined to a workspace root
// ABOUTME: Rejects parent segments, absolute overrides and symlinks that escape the root

use crate::error::{RunnerError, RunnerResult};
use std::path::{Component, Path, PathBuf};

/// Normalize a workspace-relative path into `/`-separated segments.
///
/// Both `/` and `\` are treated as separators, empty and `.` segments are
/// dropped, and any `..` segment or absolute prefix is rejected outright,
/// even when the path would lexically stay inside the root.
pub fn normalize_relative(relative: &str) -> RunnerResult<String> {
    if relative.contains('\0') {
        return Err(RunnerError::traversal(relative));
    }
    if relative.starts_with('/') || relative.starts_with('\\') {
        return Err(RunnerError::traversal(relative));
    }

    let mut segments = Vec::new();
    for (index, segment) in relative.split(['/', '\\']).enumerate() {
        match segment {
            "" | "." => continue,
            ".." => return Err(RunnerError::traversal(relative)),
            s if index == 0 && is_drive_prefix(s) => {
                return Err(RunnerError::traversal(relative));
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(RunnerError::traversal(relative));
    }
    Ok(segments.join("/"))
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Lexically clean a root path: drop `.` segments and fold `..` into its parent.
pub fn normalize_root(root: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in root.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolve `relative` under `root`.
///
/// Pure name resolution: touches no filesystem state. The returned path is
/// always prefixed by the normalized root and never equal to it. Symlinks are
/// checked separately by [`verify_within`] when the file is opened.
pub fn resolve(root: &Path, relative: &str) -> RunnerResult<PathBuf> {
    let cleaned = normalize_relative(relative)?;
    let root = normalize_root(root);
    let resolved = root.join(&cleaned);

    if !resolved.starts_with(&root) || resolved == root {
        return Err(RunnerError::traversal(relative));
    }
    Ok(resolved)
}

/// Open-time check: follow symlinks and confirm the real target is still under the real root.
///
/// Returns the canonical target path. A missing target is `NotFound`; a target
/// whose canonical form leaves the root is `PathTraversal`.
pub async fn verify_within(root: &Path, resolved: &Path) -> RunnerResult<PathBuf> {
    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| RunnerError::workspace_not_found(root.display().to_string()))?;

    let canonical = match tokio::fs::canonicalize(resolved).await {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RunnerError::file_not_found(display_relative(root, resolved)));
        }
        Err(e) => return Err(RunnerError::Io(e)),
    };

    if canonical == canonical_root || !canonical.starts_with(&canonical_root) {
        tracing::warn!(
            "Blocked path escaping workspace root via symlink: {}",
            resolved.display()
        );
        return Err(RunnerError::traversal(display_relative(root, resolved)));
    }

    Ok(canonical)
}

/// Resolve and verify in one step.
pub async fn resolve_existing(root: &Path, relative: &str) -> RunnerResult<PathBuf> {
    let resolved = resolve(root, relative)?;
    verify_within(root, &resolved).await
}

/// Read a regular file under `root`.
pub async fn read_within(root: &Path, relative: &str) -> RunnerResult<Vec<u8>> {
    let path = resolve_existing(root, relative).await?;
    let metadata = tokio::fs::metadata(&path).await?;
    if !metadata.is_file() {
        return Err(RunnerError::file_not_found(relative));
    }
    Ok(tokio::fs::read(&path).await?)
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(normalize_root(root))
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("../../etc/passwd")]
    #[case("..")]
    #[case("a/../b")]
    #[case("a/b/../../..")]
    #[case("..\\..\\windows")]
    #[case("/etc/passwd")]
    #[case("\\server\\share")]
    #[case("C:/Windows")]
    #[case("ok\0.html")]
    #[case("")]
    #[case("./.")]
    fn test_resolve_rejects_escapes(#[case] relative: &str) {
        let err = resolve(Path::new("/srv/ws/W1"), relative).unwrap_err();
        assert!(
            matches!(err, RunnerError::PathTraversal { .. }),
            "{relative:?} gave {err:?}"
        );
    }

    #[rstest]
    #[case("index.html", "/srv/ws/W1/index.html")]
    #[case("./css/site.css", "/srv/ws/W1/css/site.css")]
    #[case("a//b/./c.js", "/srv/ws/W1/a/b/c.js")]
    #[case("dir\\nested\\file.txt", "/srv/ws/W1/dir/nested/file.txt")]
    #[case("...hidden", "/srv/ws/W1/...hidden")]
    fn test_resolve_accepts_inner_paths(#[case] relative: &str, #[case] expected: &str) {
        let resolved = resolve(Path::new("/srv/ws/W1"), relative).unwrap();
        assert_eq!(resolved, PathBuf::from(expected));
        assert!(resolved.starts_with("/srv/ws/W1"));
    }

    #[test]
    fn test_resolve_normalizes_root() {
        let resolved = resolve(Path::new("/srv/./ws/tmp/../W1/"), "index.html").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/ws/W1/index.html"));
    }

    #[test]
    fn test_normalize_relative_output() {
        assert_eq!(normalize_relative("./a//b\\c.html").unwrap(), "a/b/c.html");
    }

    #[tokio::test]
    async fn test_read_within_reads_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();

        let bytes = read_within(dir.path(), "index.html").await.unwrap();
        assert_eq!(bytes, b"<h1>hi</h1>");
    }

    #[tokio::test]
    async fn test_read_within_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = read_within(dir.path(), "nope.html").await.unwrap_err();
        assert!(matches!(err, RunnerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_read_within_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        let err = read_within(dir.path(), "assets").await.unwrap_err();
        assert!(matches!(err, RunnerError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escaping_root_rejected_at_open() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "top secret").unwrap();

        let root = TempDir::new().unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            root.path().join("link.txt"),
        )
        .unwrap();

        // Name resolution alone cannot see the escape.
        assert!(resolve(root.path(), "link.txt").is_ok());

        let err = read_within(root.path(), "link.txt").await.unwrap_err();
        assert!(matches!(err, RunnerError::PathTraversal { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_root_allowed() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("real")).unwrap();
        std::fs::write(root.path().join("real/page.html"), "ok").unwrap();
        std::os::unix::fs::symlink(root.path().join("real"), root.path().join("alias")).unwrap();

        let bytes = read_within(root.path(), "alias/page.html").await.unwrap();
        assert_eq!(bytes, b"ok");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_directory_escape_rejected() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("passwd"), "root:x:0:0").unwrap();

        let root = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("etc")).unwrap();

        let err = read_within(root.path(), "etc/passwd").await.unwrap_err();
        assert!(matches!(err, RunnerError::PathTraversal { .. }));
    }
}

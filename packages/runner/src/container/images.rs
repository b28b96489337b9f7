// ABOUTME: Closed table mapping container runtimes to images, ports and mounts
// ABOUTME: Builds the start command, environment and preview URL path per runtime

use serde::{Deserialize, Serialize};

/// Container runtimes known to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Php,
    Node,
    Python,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, MountMode::ReadOnly)
    }
}

/// One row of the closed runtime image table.
///
/// The preview URL carries the entry file only for web-server images (php),
/// where the server resolves the path against the mount. Node and Python run
/// the entry file as the server process itself, so their preview URL is the
/// server root `/` and the entry file appears in the start command instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeImage {
    pub kind: RuntimeKind,
    pub image: &'static str,
    /// Port the service listens on inside the container.
    pub container_port: u16,
    /// Where the workspace is mounted.
    pub mount_path: &'static str,
    pub mount: MountMode,
    /// True when the entry file is addressed by URL path rather than executed.
    pub serves_files: bool,
}

static IMAGES: [RuntimeImage; 3] = [
    // Apache only reads the workspace.
    RuntimeImage {
        kind: RuntimeKind::Php,
        image: "php:8.3-apache",
        container_port: 80,
        mount_path: "/var/www/html",
        mount: MountMode::ReadOnly,
        serves_files: true,
    },
    RuntimeImage {
        kind: RuntimeKind::Node,
        image: "node:20-alpine",
        container_port: 3000,
        mount_path: "/workspace",
        mount: MountMode::ReadWrite,
        serves_files: false,
    },
    RuntimeImage {
        kind: RuntimeKind::Python,
        image: "python:3.12-alpine",
        container_port: 8000,
        mount_path: "/workspace",
        mount: MountMode::ReadWrite,
        serves_files: false,
    },
];

impl RuntimeImage {
    pub fn for_kind(kind: RuntimeKind) -> &'static RuntimeImage {
        match kind {
            RuntimeKind::Php => &IMAGES[0],
            RuntimeKind::Node => &IMAGES[1],
            RuntimeKind::Python => &IMAGES[2],
        }
    }

    /// Command that starts `entry_file`, or `None` to keep the image default.
    pub fn command(&self, entry_file: &str) -> Option<Vec<String>> {
        let entry = format!("{}/{}", self.mount_path, entry_file);
        match self.kind {
            RuntimeKind::Php => None,
            RuntimeKind::Node => Some(vec!["node".to_string(), entry]),
            RuntimeKind::Python => Some(vec!["python".to_string(), "-u".to_string(), entry]),
        }
    }

    pub fn working_dir(&self) -> &'static str {
        self.mount_path
    }

    /// Environment every container of this image receives.
    pub fn env(&self) -> Vec<(String, String)> {
        match self.kind {
            RuntimeKind::Php => Vec::new(),
            RuntimeKind::Node | RuntimeKind::Python => {
                vec![("PORT".to_string(), self.container_port.to_string())]
            }
        }
    }

    /// Path component of the preview URL for `entry_file`.
    ///
    /// `/<entry_file>` for web-server images, `/` for runtimes whose entry
    /// file is the server process.
    pub fn url_path(&self, entry_file: &str) -> String {
        if self.serves_files {
            format!("/{}", entry_file)
        } else {
            "/".to_string()
        }
    }
}

// ABOUTME: Closed extension-to-strategy dispatch table
// ABOUTME: Adding a runtime is one table entry, never a new branch in the registry

use crate::config::JsStrategy;
use crate::container::RuntimeKind;
use crate::types::Strategy;
use std::collections::BTreeMap;
use std::path::Path;

const STATIC_EXTENSIONS: &[&str] = &["html", "htm", "css", "svg", "png", "jpg", "jpeg", "json"];
const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs"];
const CONTAINER_EXTENSIONS: &[(&str, RuntimeKind)] =
    &[("php", RuntimeKind::Php), ("py", RuntimeKind::Python)];

/// What to do with a file of a given extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Static,
    SandboxedScript,
    Container(RuntimeKind),
    Unsupported,
}

impl Dispatch {
    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            Dispatch::Static => Some(Strategy::Static),
            Dispatch::SandboxedScript => Some(Strategy::SandboxedScript),
            Dispatch::Container(_) => Some(Strategy::Container),
            Dispatch::Unsupported => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyTable {
    entries: BTreeMap<&'static str, Dispatch>,
}

impl StrategyTable {
    pub fn new(js_strategy: JsStrategy) -> Self {
        let mut entries = BTreeMap::new();
        for ext in STATIC_EXTENSIONS {
            entries.insert(*ext, Dispatch::Static);
        }
        let script = match js_strategy {
            JsStrategy::Sandbox => Dispatch::SandboxedScript,
            JsStrategy::Container => Dispatch::Container(RuntimeKind::Node),
        };
        for ext in SCRIPT_EXTENSIONS {
            entries.insert(*ext, script);
        }
        for (ext, runtime) in CONTAINER_EXTENSIONS {
            entries.insert(*ext, Dispatch::Container(*runtime));
        }
        Self { entries }
    }

    pub fn lookup(&self, file: &str) -> Dispatch {
        let extension = extension_of(file);
        self.entries
            .get(extension.as_str())
            .copied()
            .unwrap_or(Dispatch::Unsupported)
    }

    pub fn supported_extensions(&self) -> Vec<String> {
        self.entries.keys().map(|ext| format!(".{}", ext)).collect()
    }

    /// Guidance returned with an unsupported result.
    pub fn unsupported_message(&self, extension: &str) -> String {
        let shown = if extension.is_empty() {
            "files without an extension".to_string()
        } else {
            format!("'.{}' files", extension)
        };
        format!(
            "Cannot run {}. Supported types: {}. Static files are previewed, scripts run in a sandbox or container, and server runtimes run in containers.",
            shown,
            self.supported_extensions().join(", ")
        )
    }
}

/// Lowercased extension without the dot; empty when there is none.
pub fn extension_of(file: &str) -> String {
    Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("index.html", Dispatch::Static)]
    #[case("INDEX.HTM", Dispatch::Static)]
    #[case("styles/site.css", Dispatch::Static)]
    #[case("data.json", Dispatch::Static)]
    #[case("script.js", Dispatch::SandboxedScript)]
    #[case("module.mjs", Dispatch::SandboxedScript)]
    #[case("server.php", Dispatch::Container(RuntimeKind::Php))]
    #[case("app.py", Dispatch::Container(RuntimeKind::Python))]
    #[case("main.rb", Dispatch::Unsupported)]
    #[case("Dockerfile", Dispatch::Unsupported)]
    fn test_default_table(#[case] file: &str, #[case] expected: Dispatch) {
        let table = StrategyTable::new(JsStrategy::Sandbox);
        assert_eq!(table.lookup(file), expected);
    }

    #[test]
    fn test_js_can_switch_to_container() {
        let table = StrategyTable::new(JsStrategy::Container);
        assert_eq!(
            table.lookup("server.js"),
            Dispatch::Container(RuntimeKind::Node)
        );
        assert_eq!(
            table.lookup("server.js").strategy(),
            Some(Strategy::Container)
        );
    }

    #[test]
    fn test_unsupported_message_lists_extensions() {
        let table = StrategyTable::new(JsStrategy::Sandbox);
        let message = table.unsupported_message("rb");
        assert!(message.contains("'.rb'"));
        assert!(message.contains(".php"));
        assert!(message.contains(".html"));
    }
}

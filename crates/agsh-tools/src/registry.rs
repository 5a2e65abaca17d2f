use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Plain text result. Failures are represented as `ERROR: <message>` text
/// rather than a `Result`, so the model always sees something to react to.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn error(text: impl std::fmt::Display) -> Self {
        Self {
            text: format!("ERROR: {text}"),
        }
    }

    pub fn is_error(&self) -> bool {
        self.text.starts_with("ERROR:")
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn call(&self, input: Value, cancel: CancellationToken) -> ToolOutput;
}

/// Registry of built-in tool adapters, keyed by name. Unknown tool names
/// resolve to an error `ToolOutput` rather than a hard failure, so executor
/// loop detection and correction prompting stay in the model-facing layer.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<HashMap<&'static str, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let mut tools: HashMap<&'static str, Arc<dyn Tool>> = HashMap::new();
        tools.insert("shell", Arc::new(crate::shell_tool::ShellTool::default()));
        tools.insert("glob", Arc::new(crate::index_tool::GlobTool));
        tools.insert(
            "filesystem_index_search",
            Arc::new(crate::index_tool::FilesystemIndexTool),
        );
        tools.insert("read_file", Arc::new(crate::fs_tool::ReadFileTool));
        tools.insert("write_file", Arc::new(crate::fs_tool::WriteFileTool));
        tools.insert(
            "http_search",
            Arc::new(crate::http_tool::HttpSearchTool::default()),
        );
        tools.insert("applescript", Arc::new(crate::macos_tool::AppleScriptTool));
        tools.insert("run_shortcut", Arc::new(crate::macos_tool::ShortcutTool));
        Self {
            tools: Arc::new(tools),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub async fn call(&self, name: &str, input: Value, cancel: CancellationToken) -> ToolOutput {
        match self.tools.get(name) {
            Some(tool) => tool.call(input, cancel).await,
            None => ToolOutput::error(format!("unknown tool `{name}`")),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

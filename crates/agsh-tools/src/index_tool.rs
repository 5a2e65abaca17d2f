use async_trait::async_trait;
use ignore::WalkBuilder;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::registry::{Tool, ToolOutput};

const MAX_MATCHES: usize = 200;

/// Recursive filename-pattern glob rooted at a caller-supplied directory.
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &'static str {
        "glob"
    }

    async fn call(&self, input: Value, _cancel: CancellationToken) -> ToolOutput {
        let Some(pattern) = input.get("pattern").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing `pattern` string argument");
        };
        let root = input.get("root").and_then(|v| v.as_str()).unwrap_or(".");
        let full_pattern = format!("{}/**/{}", root.trim_end_matches('/'), pattern);

        let entries = match glob::glob(&full_pattern) {
            Ok(entries) => entries,
            Err(err) => return ToolOutput::error(format!("invalid glob pattern: {err}")),
        };

        let mut matches = Vec::new();
        for entry in entries.flatten() {
            matches.push(entry.display().to_string());
            if matches.len() >= MAX_MATCHES {
                break;
            }
        }
        if matches.is_empty() {
            ToolOutput::ok("no files matched")
        } else {
            ToolOutput::ok(matches.join("\n"))
        }
    }
}

/// Filename-substring search across an indexed root, used in place of
/// `find`/`locate`-style shell invocations against personal paths.
pub struct FilesystemIndexTool;

#[async_trait]
impl Tool for FilesystemIndexTool {
    fn name(&self) -> &'static str {
        "filesystem_index_search"
    }

    async fn call(&self, input: Value, _cancel: CancellationToken) -> ToolOutput {
        let Some(query) = input.get("query").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing `query` string argument");
        };
        let root = input.get("root").and_then(|v| v.as_str()).unwrap_or(".");
        let needle = query.to_lowercase();

        let mut matches = Vec::new();
        for entry in WalkBuilder::new(root).build().flatten() {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name.contains(&needle) {
                matches.push(entry.path().display().to_string());
                if matches.len() >= MAX_MATCHES {
                    break;
                }
            }
        }
        if matches.is_empty() {
            ToolOutput::ok("no files matched")
        } else {
            ToolOutput::ok(matches.join("\n"))
        }
    }
}

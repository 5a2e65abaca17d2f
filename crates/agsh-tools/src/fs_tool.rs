use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::registry::{Tool, ToolOutput};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    async fn call(&self, input: Value, _cancel: CancellationToken) -> ToolOutput {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing `path` string argument");
        };
        match fs::read_to_string(path).await {
            Ok(content) => ToolOutput::ok(content),
            Err(err) => ToolOutput::error(format!("could not read `{path}`: {err}")),
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    async fn call(&self, input: Value, _cancel: CancellationToken) -> ToolOutput {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing `path` string argument");
        };
        let content = input.get("content").and_then(|v| v.as_str()).unwrap_or("");
        if let Some(parent) = std::path::Path::new(path).parent() {
            if let Err(err) = fs::create_dir_all(parent).await {
                return ToolOutput::error(format!("could not create parent dirs for `{path}`: {err}"));
            }
        }
        match fs::write(path, content).await {
            Ok(()) => ToolOutput::ok(format!("wrote {} bytes to {path}", content.len())),
            Err(err) => ToolOutput::error(format!("could not write `{path}`: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let path_str = path.to_str().unwrap().to_string();

        let write = WriteFileTool;
        let out = write
            .call(
                serde_json::json!({"path": path_str, "content": "hello"}),
                CancellationToken::new(),
            )
            .await;
        assert!(!out.is_error());

        let read = ReadFileTool;
        let out = read
            .call(serde_json::json!({"path": path_str}), CancellationToken::new())
            .await;
        assert_eq!(out.text, "hello");
    }

    #[tokio::test]
    async fn reading_a_missing_file_is_an_error() {
        let read = ReadFileTool;
        let out = read
            .call(serde_json::json!({"path": "/nonexistent/path/x"}), CancellationToken::new())
            .await;
        assert!(out.is_error());
    }
}

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::registry::{Tool, ToolOutput};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct ShellTool {
    timeout: std::time::Duration,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn call(&self, input: Value, cancel: CancellationToken) -> ToolOutput {
        let Some(command) = input.get("command").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing `command` string argument");
        };

        let mut proc = Command::new("bash");
        proc.arg("-c").arg(command);
        let mut child = match proc.spawn() {
            Ok(child) => child,
            Err(err) => return ToolOutput::error(format!("failed to spawn shell: {err}")),
        };

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return ToolOutput::ok("command cancelled");
            }
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => result,
        };

        match output {
            Ok(Ok(output)) if output.status.success() => {
                ToolOutput::ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => ToolOutput::error(format!(
                "exit status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )),
            Ok(Err(err)) => ToolOutput::error(format!("shell execution failed: {err}")),
            Err(_) => ToolOutput::error(format!("command timed out after {:?}", self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_command_and_captures_stdout() {
        let tool = ShellTool::default();
        let out = tool
            .call(serde_json::json!({"command": "echo hi"}), CancellationToken::new())
            .await;
        assert_eq!(out.text.trim(), "hi");
    }

    #[tokio::test]
    async fn missing_command_is_an_error_not_a_panic() {
        let tool = ShellTool::default();
        let out = tool.call(serde_json::json!({}), CancellationToken::new()).await;
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn nonzero_exit_status_is_reported_as_error() {
        let tool = ShellTool::default();
        let out = tool
            .call(serde_json::json!({"command": "exit 1"}), CancellationToken::new())
            .await;
        assert!(out.is_error());
    }
}

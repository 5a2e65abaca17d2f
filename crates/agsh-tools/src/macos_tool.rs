use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::registry::{Tool, ToolOutput};

/// Runs an AppleScript snippet via `osascript`. No-op error on non-macOS.
pub struct AppleScriptTool;

#[async_trait]
impl Tool for AppleScriptTool {
    fn name(&self) -> &'static str {
        "applescript"
    }

    async fn call(&self, input: Value, cancel: CancellationToken) -> ToolOutput {
        let Some(script) = input.get("script").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing `script` string argument");
        };
        run_macos_command("osascript", &["-e", script], cancel).await
    }
}

/// Runs a named macOS Shortcut via `shortcuts run`.
pub struct ShortcutTool;

#[async_trait]
impl Tool for ShortcutTool {
    fn name(&self) -> &'static str {
        "run_shortcut"
    }

    async fn call(&self, input: Value, cancel: CancellationToken) -> ToolOutput {
        let Some(name) = input.get("name").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing `name` string argument");
        };
        run_macos_command("shortcuts", &["run", name], cancel).await
    }
}

#[cfg(target_os = "macos")]
async fn run_macos_command(program: &str, args: &[&str], cancel: CancellationToken) -> ToolOutput {
    let mut command = tokio::process::Command::new(program);
    command.args(args);
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return ToolOutput::error(format!("failed to spawn {program}: {err}")),
    };

    let output = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return ToolOutput::ok("command cancelled");
        }
        result = child.wait_with_output() => result,
    };

    match output {
        Ok(output) if output.status.success() => {
            ToolOutput::ok(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => ToolOutput::error(String::from_utf8_lossy(&output.stderr).into_owned()),
        Err(err) => ToolOutput::error(format!("{program} execution failed: {err}")),
    }
}

#[cfg(not(target_os = "macos"))]
async fn run_macos_command(program: &str, _args: &[&str], _cancel: CancellationToken) -> ToolOutput {
    ToolOutput::error(format!("{program} is only available on macOS"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_script_is_an_error() {
        let tool = AppleScriptTool;
        let out = tool.call(serde_json::json!({}), CancellationToken::new()).await;
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn missing_shortcut_name_is_an_error() {
        let tool = ShortcutTool;
        let out = tool.call(serde_json::json!({}), CancellationToken::new()).await;
        assert!(out.is_error());
    }
}

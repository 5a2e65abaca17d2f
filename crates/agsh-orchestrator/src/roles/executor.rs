//! R3 Executor (§4.3). One invocation per subtask attempt: iteratively asks
//! the model to pick a tool or emit a final result, up to a call budget,
//! with loop detection and a transparent shell->filesystem-index redirect.

use agsh_providers::ModelClient;
use agsh_tools::ToolRegistry;
use agsh_types::{CorrectionSignal, ExecutionResult, ExecutionStatus, SubTask, ToolCallRecord};
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::parsing::strict_parse;

pub struct ExecutorDeps<'a> {
    pub model: &'a dyn ModelClient,
    pub tools: &'a ToolRegistry,
    pub max_iterations: u32,
}

const SYSTEM_PROMPT: &str = "\
You are the execution step of an agentic pipeline. Given a subtask, either \
call one tool at a time or, once you have enough evidence, emit a final \
result. Respond with exactly one JSON object.

To call a tool: {\"action\": \"tool\", \"tool\": \"<name>\", ...tool params}
To finish: {\"action\": \"result\", \"status\": \"completed\"|\"uncertain\"|\"failed\", \"output\": \"...\", \"tool_calls\": [...]}";

/// Outcome of a single executor attempt (one full tool-call loop, ended by
/// either a parsed final result or budget exhaustion). Does not itself
/// decide retries — that is the agent-validator's call.
pub async fn run_attempt(
    subtask: &SubTask,
    correction: Option<&CorrectionSignal>,
    prior_tool_calls: &[ToolCallRecord],
    deps: &ExecutorDeps<'_>,
    cancel: &CancellationToken,
) -> ExecutionResult {
    let mut transcript: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCallRecord> = Vec::new();
    let mut previous_signature: Option<(String, String)> = None;

    if let Some(correction) = correction {
        transcript.push(format!(
            "Previous attempt was rejected. What was wrong: {}. What to do instead: {}. \
             Do not repeat the prior tool calls verbatim.",
            correction.what_was_wrong, correction.what_to_do
        ));
        for call in prior_tool_calls {
            transcript.push(format!("avoid repeating: {}", call.as_line()));
        }
    }

    for _iteration in 0..deps.max_iterations.max(1) {
        if cancel.is_cancelled() {
            return ExecutionResult {
                subtask_id: subtask.subtask_id,
                status: ExecutionStatus::Failed,
                output: String::new(),
                uncertainty: None,
                tool_calls,
            };
        }

        let user_prompt = format!(
            "Intent: {}\nSuccess criteria:\n{}\nContext:\n{}",
            subtask.intent,
            subtask
                .success_criteria
                .iter()
                .map(|c| format!("- {c}"))
                .collect::<Vec<_>>()
                .join("\n"),
            subtask.context
        );

        let completion = match deps.model.complete(SYSTEM_PROMPT, &user_prompt, &transcript).await {
            Ok(completion) => completion,
            Err(err) => {
                transcript.push(format!(
                    "ERROR: model call failed: {err}. Try again or return a final result."
                ));
                continue;
            }
        };

        let action: Value = match strict_parse(&completion.text) {
            Ok(value) => value,
            Err(_) => {
                transcript.push(
                    "ERROR: your previous response was not valid JSON. Respond with exactly \
                     one JSON object as instructed."
                        .to_string(),
                );
                continue;
            }
        };

        match action.get("action").and_then(|v| v.as_str()) {
            Some("result") => {
                let status = action
                    .get("status")
                    .and_then(|v| v.as_str())
                    .map(parse_status)
                    .unwrap_or(ExecutionStatus::Uncertain);
                let output = action
                    .get("output")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                return ExecutionResult {
                    subtask_id: subtask.subtask_id,
                    status,
                    output,
                    uncertainty: action
                        .get("uncertainty")
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string),
                    tool_calls,
                };
            }
            Some("tool") => {
                let Some(tool_name) = action.get("tool").and_then(|v| v.as_str()) else {
                    transcript.push("ERROR: tool calls must include a `tool` name.".to_string());
                    continue;
                };
                let mut input = action.clone();
                if let Some(obj) = input.as_object_mut() {
                    obj.remove("action");
                    obj.remove("tool");
                }

                let (effective_tool, effective_input) = redirect_personal_find(tool_name, &input);
                let signature = (effective_tool.clone(), effective_input.to_string());

                if previous_signature.as_ref() == Some(&signature) {
                    transcript.push(
                        "ERROR: identical tool call repeated (loop detected). Use a different \
                         tool or input, or return a final result now."
                            .to_string(),
                    );
                    previous_signature = None;
                    continue;
                }
                previous_signature = Some(signature);

                let output = deps
                    .tools
                    .call(&effective_tool, effective_input.clone(), cancel.clone())
                    .await;
                let record = ToolCallRecord {
                    tool: effective_tool,
                    input: effective_input,
                    output_snippet: output.text.clone(),
                };
                transcript.push(record.as_line());
                tool_calls.push(record);
            }
            _ => {
                transcript.push(
                    "ERROR: `action` must be \"tool\" or \"result\". Respond again.".to_string(),
                );
            }
        }
    }

    ExecutionResult {
        subtask_id: subtask.subtask_id,
        status: ExecutionStatus::Uncertain,
        output: "tool-call budget exhausted before a final result was produced".to_string(),
        uncertainty: Some("budget_exhausted".to_string()),
        tool_calls,
    }
}

fn parse_status(raw: &str) -> ExecutionStatus {
    match raw {
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        _ => ExecutionStatus::Uncertain,
    }
}

/// `shell` commands running `find` against personal paths (`~`, `/Users/`,
/// `/home/`, `$HOME`) are transparently redirected to the filesystem-index
/// tool (§4.3), which is indexed and bounded rather than an unbounded
/// recursive `find`.
fn redirect_personal_find(tool: &str, input: &Value) -> (String, Value) {
    if tool != "shell" {
        return (tool.to_string(), input.clone());
    }
    let Some(command) = input.get("command").and_then(|v| v.as_str()) else {
        return (tool.to_string(), input.clone());
    };
    let personal_path = Regex::new(r"find\s+(~|\$HOME|/Users/|/home/)").unwrap();
    if !personal_path.is_match(command) {
        return (tool.to_string(), input.clone());
    }

    let name_pattern = Regex::new(r#"-i?name\s+['"]?([^'"\s]+)['"]?"#).unwrap();
    let query = name_pattern
        .captures(command)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_matches('*').to_string())
        .unwrap_or_default();
    let root = Regex::new(r"find\s+(\S+)")
        .unwrap()
        .captures(command)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| ".".to_string());

    (
        "filesystem_index_search".to_string(),
        serde_json::json!({ "query": query, "root": root }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirects_find_against_home_directory() {
        let input = serde_json::json!({"command": "find ~/Documents -name '*.pdf'"});
        let (tool, redirected) = redirect_personal_find("shell", &input);
        assert_eq!(tool, "filesystem_index_search");
        assert_eq!(redirected["query"], "pdf");
    }

    #[test]
    fn leaves_non_personal_shell_commands_alone() {
        let input = serde_json::json!({"command": "date"});
        let (tool, redirected) = redirect_personal_find("shell", &input);
        assert_eq!(tool, "shell");
        assert_eq!(redirected, input);
    }
}

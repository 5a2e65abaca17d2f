//! R1 Perceiver (§4.3). Turns raw user text plus session history into a
//! `TaskSpec`, looping through a clarifying question if the model asks
//! for one.

use agsh_providers::ModelClient;
use agsh_types::{TaskConstraints, TaskSpec};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::parsing::strict_parse;

const SYSTEM_PROMPT: &str = "\
You are the perception step of an agentic pipeline. Turn the user's \
request into a task specification with falsifiable success criteria \
(assertions about the output, never restatements of intent). If the \
request is too ambiguous to decompose, ask exactly one clarifying \
question instead. Respond with exactly one JSON object, one of:
{\"intent\": \"...\", \"success_criteria\": [...], \"scope\": null, \"deadline\": null}
{\"needs_clarification\": true, \"question\": \"...\"}";

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPerception {
    Clarify {
        #[serde(rename = "needs_clarification")]
        _needs_clarification: bool,
        question: String,
    },
    Spec {
        intent: String,
        #[serde(default)]
        success_criteria: Vec<String>,
        #[serde(default)]
        scope: Option<String>,
    },
}

/// Callback the REPL/CLI supplies to surface a clarifying question to the
/// user and return their answer. Out of scope per §1; the perceiver only
/// depends on this trait object.
#[async_trait::async_trait]
pub trait ClarifyCallback: Send + Sync {
    async fn ask(&self, question: &str) -> String;
}

const MAX_CLARIFICATION_ROUNDS: u32 = 3;

/// Loops asking the model for a `TaskSpec`; on a clarification request,
/// delegates to `clarify`, appends the Q&A to the prompt, and retries.
pub async fn perceive(
    raw_input: &str,
    history: &[String],
    model: &dyn ModelClient,
    clarify: &dyn ClarifyCallback,
) -> Result<TaskSpec, String> {
    let mut transcript: Vec<String> = history.to_vec();
    let mut user_prompt = raw_input.to_string();

    for _round in 0..MAX_CLARIFICATION_ROUNDS {
        let completion = model
            .complete(SYSTEM_PROMPT, &user_prompt, &transcript)
            .await
            .map_err(|e| format!("perceiver model call failed: {e}"))?;

        let value: Value = strict_parse(&completion.text)?;
        let parsed: RawPerception =
            serde_json::from_value(value).map_err(|e| format!("perception did not match schema: {e}"))?;

        match parsed {
            RawPerception::Clarify { question, .. } => {
                let answer = clarify.ask(&question).await;
                transcript.push(format!("Q: {question}\nA: {answer}"));
                user_prompt = raw_input.to_string();
            }
            RawPerception::Spec {
                intent,
                success_criteria,
                scope,
            } => {
                return Ok(TaskSpec {
                    task_id: Uuid::new_v4(),
                    intent,
                    success_criteria,
                    constraints: TaskConstraints { scope, deadline: None },
                    raw_input: raw_input.to_string(),
                });
            }
        }
    }

    Err("perceiver exhausted clarification rounds without producing a task spec".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agsh_providers::{Completion, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedModel {
        responses: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _context: &[String],
        ) -> agsh_providers::ProviderResult<Completion> {
            let mut responses = self.responses.lock().unwrap();
            let text = if responses.is_empty() {
                "{}".to_string()
            } else {
                responses.remove(0).to_string()
            };
            Ok(Completion {
                text,
                usage: TokenUsage::default(),
            })
        }
    }

    struct FixedAnswer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClarifyCallback for FixedAnswer {
        async fn ask(&self, _question: &str) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            "the budget report for Q1".to_string()
        }
    }

    #[tokio::test]
    async fn publishes_task_spec_directly_when_unambiguous() {
        let model = ScriptedModel {
            responses: Mutex::new(vec![
                r#"{"intent": "summarize report", "success_criteria": ["summary exists"]}"#,
            ]),
        };
        let clarify = FixedAnswer {
            calls: AtomicUsize::new(0),
        };
        let spec = perceive("summarize the report", &[], &model, &clarify).await.unwrap();
        assert_eq!(spec.intent, "summarize report");
        assert_eq!(clarify.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clarification_round_trip_then_spec() {
        let model = ScriptedModel {
            responses: Mutex::new(vec![
                r#"{"needs_clarification": true, "question": "which report?"}"#,
                r#"{"intent": "summarize Q1 report", "success_criteria": ["summary exists"]}"#,
            ]),
        };
        let clarify = FixedAnswer {
            calls: AtomicUsize::new(0),
        };
        let spec = perceive("summarize the report", &[], &model, &clarify).await.unwrap();
        assert_eq!(spec.intent, "summarize Q1 report");
        assert_eq!(clarify.calls.load(Ordering::SeqCst), 1);
    }
}

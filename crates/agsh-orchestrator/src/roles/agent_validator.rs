//! R4a Agent-Validator (§4.3). Scores one `ExecutionResult` against a
//! subtask's success criteria and produces a structured verdict.

use agsh_providers::ModelClient;
use agsh_types::{
    evidence_forces_environmental, CriterionVerdict, ExecutionResult, FailureClass, SubTask,
    Verdict,
};
use serde::Deserialize;
use serde_json::Value;

use crate::parsing::strict_parse;

const SYSTEM_PROMPT: &str = "\
You are the validation step of an agentic pipeline. Given a subtask's \
success criteria and an execution result, decide whether it matched, \
should be retried with corrective guidance, or failed outright. Respond \
with exactly one JSON object:
{\"verdict\": \"matched\"|\"retry\"|\"failed\", \"score\": 0.0-1.0, \
\"unmet_criteria\": [...], \"criteria_verdicts\": [{\"criterion\": \"...\", \
\"verdict\": \"pass\"|\"fail\", \"failure_class\": \"logical\"|\"environmental\"|null, \
\"evidence\": \"...\"}], \"what_was_wrong\": \"...\", \"what_to_do\": \"...\", \
\"failure_reason\": \"...\"}";

#[derive(Debug, Clone)]
pub struct ValidatorVerdict {
    pub verdict: Verdict,
    pub score: f64,
    pub unmet_criteria: Vec<String>,
    pub criteria_verdicts: Vec<CriterionVerdict>,
    pub what_was_wrong: String,
    pub what_to_do: String,
    pub failure_reason: Option<String>,
}

#[derive(Deserialize)]
struct RawCriterionVerdict {
    criterion: String,
    verdict: String,
    #[serde(default)]
    failure_class: Option<String>,
    #[serde(default)]
    evidence: String,
}

#[derive(Deserialize)]
struct RawVerdict {
    verdict: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    unmet_criteria: Vec<String>,
    #[serde(default)]
    criteria_verdicts: Vec<RawCriterionVerdict>,
    #[serde(default)]
    what_was_wrong: String,
    #[serde(default)]
    what_to_do: String,
    #[serde(default)]
    failure_reason: Option<String>,
}

pub async fn score(
    subtask: &SubTask,
    result: &ExecutionResult,
    model: &dyn ModelClient,
) -> ValidatorVerdict {
    let tool_call_lines: Vec<String> = result.tool_calls.iter().map(|c| c.as_line()).collect();
    let user_prompt = format!(
        "Success criteria:\n{}\nExecution status: {:?}\nOutput:\n{}\nTool calls:\n{}",
        subtask
            .success_criteria
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n"),
        result.status,
        result.output,
        tool_call_lines.join("\n")
    );

    let raw = match model.complete(SYSTEM_PROMPT, &user_prompt, &[]).await {
        Ok(completion) => parse_verdict(&completion.text),
        Err(err) => Err(format!("validator model call failed: {err}")),
    };

    let parsed = match raw {
        Ok(parsed) => parsed,
        Err(reason) => RawVerdict {
            verdict: "retry".to_string(),
            score: 0.0,
            unmet_criteria: subtask.success_criteria.clone(),
            criteria_verdicts: Vec::new(),
            what_was_wrong: reason.clone(),
            what_to_do: "produce a structured JSON verdict as instructed".to_string(),
            failure_reason: Some(reason),
        },
    };

    let evidence_blob = format!(
        "{} {} {}",
        result.output,
        parsed.what_was_wrong,
        tool_call_lines.join(" ")
    );
    let forced_environmental = evidence_forces_environmental(&evidence_blob);

    let criteria_verdicts: Vec<CriterionVerdict> = if parsed.criteria_verdicts.is_empty() {
        subtask
            .success_criteria
            .iter()
            .map(|c| CriterionVerdict {
                criterion: c.clone(),
                passed: parsed.verdict == "matched" && !parsed.unmet_criteria.contains(c),
                failure_class: if forced_environmental {
                    Some(FailureClass::Environmental)
                } else {
                    None
                },
                evidence: String::new(),
            })
            .collect()
    } else {
        parsed
            .criteria_verdicts
            .into_iter()
            .map(|v| {
                let evidence_forces = forced_environmental || evidence_forces_environmental(&v.evidence);
                CriterionVerdict {
                    criterion: v.criterion,
                    passed: v.verdict == "pass",
                    failure_class: if evidence_forces {
                        Some(FailureClass::Environmental)
                    } else {
                        match v.failure_class.as_deref() {
                            Some("logical") => Some(FailureClass::Logical),
                            Some("environmental") => Some(FailureClass::Environmental),
                            _ => None,
                        }
                    },
                    evidence: v.evidence,
                }
            })
            .collect()
    };

    ValidatorVerdict {
        verdict: parse_verdict_enum(&parsed.verdict),
        score: parsed.score,
        unmet_criteria: parsed.unmet_criteria,
        criteria_verdicts,
        what_was_wrong: parsed.what_was_wrong,
        what_to_do: parsed.what_to_do,
        failure_reason: parsed.failure_reason,
    }
}

fn parse_verdict(text: &str) -> Result<RawVerdict, String> {
    let value: Value = strict_parse(text)?;
    serde_json::from_value(value).map_err(|e| format!("verdict did not match schema: {e}"))
}

fn parse_verdict_enum(raw: &str) -> Verdict {
    match raw {
        "matched" => Verdict::Matched,
        "failed" => Verdict::Failed,
        _ => Verdict::Retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_evidence_forces_environmental_regardless_of_model_label() {
        let raw = RawVerdict {
            verdict: "retry".into(),
            score: 0.2,
            unmet_criteria: vec!["file readable".into()],
            criteria_verdicts: vec![RawCriterionVerdict {
                criterion: "file readable".into(),
                verdict: "fail".into(),
                failure_class: Some("logical".into()),
                evidence: "ls: /root/secret: Permission denied".into(),
            }],
            what_was_wrong: String::new(),
            what_to_do: String::new(),
            failure_reason: None,
        };
        let forced = evidence_forces_environmental(&raw.criteria_verdicts[0].evidence);
        assert!(forced);
    }
}

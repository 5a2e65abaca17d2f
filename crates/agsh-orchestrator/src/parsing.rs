//! Strict -> fenced/balanced-extraction -> named-wrapper three-tier parsing
//! idiom used by every model-output parse in the chain (§4.3 implementation
//! note). A parse failure at the end of all tiers is never swallowed — the
//! caller decides what "replan-worthy" or "retry-worthy" means for its role.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Fenced ```json blocks, then the first balanced `[...]`, then the first
/// balanced `{...}` substring — tried in that order by the caller.
pub fn json_candidates(output: &str) -> Vec<String> {
    let mut out = Vec::new();

    for marker in ["```json", "```JSON", "```"] {
        if let Some(start) = output.find(marker) {
            let after = &output[start + marker.len()..];
            if let Some(end) = after.find("```") {
                let block = after[..end].trim();
                if !block.is_empty() {
                    out.push(block.to_string());
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (output.find('['), output.rfind(']')) {
        if start <= end {
            out.push(output[start..=end].to_string());
        }
    }
    if let (Some(start), Some(end)) = (output.find('{'), output.rfind('}')) {
        if start <= end {
            out.push(output[start..=end].to_string());
        }
    }

    out
}

/// Tier 1 (whole-response strict parse) + tier 2 (fenced/balanced
/// extraction retry). Tier 3 (named-wrapper shapes) is layered on top by
/// callers that need it, since the wrapper shape is role-specific.
pub fn strict_parse<T: DeserializeOwned>(output: &str) -> Result<T, String> {
    if let Ok(parsed) = serde_json::from_str::<T>(output.trim()) {
        return Ok(parsed);
    }
    for candidate in json_candidates(output) {
        if let Ok(parsed) = serde_json::from_str::<T>(&candidate) {
            return Ok(parsed);
        }
    }
    Err("response did not match the required JSON schema".to_string())
}

/// Tries `strict_parse::<T>`, then each of a list of named-wrapper shapes
/// (e.g. `{"subtasks": [...]}`, `{"plan": [...]}`), each extracted by a
/// caller-supplied closure over the raw JSON `Value`.
pub fn strict_parse_with_wrappers<T: DeserializeOwned>(
    output: &str,
    wrappers: &[fn(&Value) -> Option<T>],
) -> Result<T, String> {
    if let Ok(parsed) = strict_parse::<T>(output) {
        return Ok(parsed);
    }
    for candidate in std::iter::once(output.to_string()).chain(json_candidates(output)) {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            for wrapper in wrappers {
                if let Some(parsed) = wrapper(&value) {
                    return Ok(parsed);
                }
            }
        }
    }
    Err("response did not match any known JSON wrapper shape".to_string())
}

/// Keyword-heuristic last resort over prose, used only once the strict
/// tiers have both failed. `positive`/`negative` phrase lists are checked
/// in order; first match wins.
pub fn keyword_fallback(output: &str, positive: &[&str], negative: &[&str]) -> Option<bool> {
    let lower = output.to_lowercase();
    for phrase in positive {
        if lower.contains(phrase) {
            return Some(true);
        }
    }
    for phrase in negative {
        if lower.contains(phrase) {
            return Some(false);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
    }

    #[test]
    fn strict_parse_accepts_bare_json() {
        let parsed: Sample = strict_parse(r#"{"a": 1}"#).unwrap();
        assert_eq!(parsed, Sample { a: 1 });
    }

    #[test]
    fn strict_parse_extracts_fenced_json_block() {
        let text = "Here is the plan:\n```json\n{\"a\": 2}\n```\nThanks.";
        let parsed: Sample = strict_parse(text).unwrap();
        assert_eq!(parsed, Sample { a: 2 });
    }

    #[test]
    fn strict_parse_extracts_balanced_braces_from_prose() {
        let text = "Sure, the result is {\"a\": 3} and nothing else.";
        let parsed: Sample = strict_parse(text).unwrap();
        assert_eq!(parsed, Sample { a: 3 });
    }

    #[test]
    fn strict_parse_fails_on_pure_prose() {
        let err = strict_parse::<Sample>("no json here at all").unwrap_err();
        assert!(err.contains("did not match"));
    }

    #[test]
    fn keyword_fallback_matches_positive_before_negative() {
        assert_eq!(keyword_fallback("criteria are satisfied", &["satisfied"], &["missing"]), Some(true));
        assert_eq!(keyword_fallback("something is missing", &["satisfied"], &["missing"]), Some(false));
        assert_eq!(keyword_fallback("unrelated text", &["satisfied"], &["missing"]), None);
    }
}

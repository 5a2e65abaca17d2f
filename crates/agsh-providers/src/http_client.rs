use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::client::{Completion, ModelClient, TokenUsage};
use crate::error::{ProviderError, ProviderResult};

/// OpenAI-compatible chat-completions client. The default `ModelClient`
/// implementation; any endpoint speaking the `/chat/completions` wire
/// format (OpenAI, OpenRouter, local proxies) works unmodified.
pub struct HttpModelClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl HttpModelClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        context: &[String],
    ) -> ProviderResult<Completion> {
        let mut messages = vec![json!({"role": "system", "content": system_prompt})];
        for entry in context {
            messages.push(json!({"role": "user", "content": entry}));
        }
        messages.push(json!({"role": "user", "content": user_prompt}));

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(url).json(&json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        let value: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_error(&value).unwrap_or_else(|| status.to_string());
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }
        if let Some(detail) = extract_error(&value) {
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        let text = extract_text(&value)
            .ok_or_else(|| ProviderError::EmptyCompletion(truncate(&value.to_string(), 500)))?;
        let usage = extract_usage(&value);
        Ok(Completion { text, usage })
    }
}

fn extract_text(value: &serde_json::Value) -> Option<String> {
    value
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(ToString::to_string)
}

fn extract_usage(value: &serde_json::Value) -> TokenUsage {
    let usage = value.get("usage");
    TokenUsage {
        prompt_tokens: usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        completion_tokens: usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        total_tokens: usage
            .and_then(|u| u.get("total_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    }
}

fn extract_error(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(ToString::to_string)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        format!("{}...", &text[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_reads_openai_shape() {
        let value = json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_text(&value), Some("hi".to_string()));
    }

    #[test]
    fn extract_usage_defaults_to_zero_when_absent() {
        let value = json!({});
        let usage = extract_usage(&value);
        assert_eq!(usage.total_tokens, 0);
    }

    #[test]
    fn extract_error_reads_openai_error_shape() {
        let value = json!({"error": {"message": "bad key"}});
        assert_eq!(extract_error(&value), Some("bad key".to_string()));
    }
}

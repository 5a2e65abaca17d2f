use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::registry::{Tool, ToolOutput};

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
const MAX_RESPONSE_CHARS: usize = 20_000;

/// Generic HTTP search/fetch adapter. The search endpoint URL is caller
/// supplied so this stays a thin transport, not a bespoke search provider.
pub struct HttpSearchTool {
    client: reqwest::Client,
}

impl Default for HttpSearchTool {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl Tool for HttpSearchTool {
    fn name(&self) -> &'static str {
        "http_search"
    }

    async fn call(&self, input: Value, cancel: CancellationToken) -> ToolOutput {
        let Some(url) = input.get("url").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing `url` string argument");
        };

        let request = self.client.get(url).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return ToolOutput::ok("request cancelled"),
            result = request => result,
        };

        match response {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => {
                    let truncated: String = body.chars().take(MAX_RESPONSE_CHARS).collect();
                    ToolOutput::ok(truncated)
                }
                Err(err) => ToolOutput::error(format!("could not read response body: {err}")),
            },
            Ok(response) => ToolOutput::error(format!("http status {}", response.status())),
            Err(err) => ToolOutput::error(format!("request failed: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_is_an_error_not_a_panic() {
        let tool = HttpSearchTool::default();
        let out = tool.call(serde_json::json!({}), CancellationToken::new()).await;
        assert!(out.is_error());
    }
}

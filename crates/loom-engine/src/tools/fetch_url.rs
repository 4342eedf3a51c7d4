use std::time::Duration;

use async_trait::async_trait;

use loom_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

use crate::truncate::truncate_output;

const MAX_RESPONSE_SIZE: usize = 256 * 1024;

pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchUrlTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Loom/0.1")
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch the text content of a URL with an HTTP GET"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": {
                    "type": "string",
                    "description": "http or https URL to fetch"
                }
            }
        })
    }

    async fn execute(
        &self,
        kwargs: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let url = kwargs["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("url is required".into()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidArguments(format!(
                "unsupported url scheme: {url}"
            )));
        }

        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("request failed: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                return Err(ToolError::ExecutionFailed(format!(
                    "HTTP {status} fetching {url}"
                )));
            }
            response
                .text()
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("failed to read response: {e}")))
        };

        let body = tokio::select! {
            result = request => result?,
            () = ctx.abort_signal.cancelled() => return Err(ToolError::Cancelled),
        };
        Ok(truncate_output(&body, MAX_RESPONSE_SIZE).into())
    }
}

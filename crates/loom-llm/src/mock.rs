use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use loom_core::errors::GatewayError;
use loom_core::provider::{LlmProvider, LlmRequest};

/// One pre-programmed reply.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Text(String),
    Error(GatewayError),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Convenience for a JSON reply body.
    pub fn json(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Deterministic provider that replays queued responses in order and
/// records every request it receives.
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
    fallback: Option<String>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            queue: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            fallback: None,
        }
    }

    /// Load a JSON array of reply strings.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let replies: Vec<String> = serde_json::from_str(json)?;
        Ok(Self::new(replies.into_iter().map(ScriptedResponse::Text).collect()))
    }

    /// Reply used once the queue runs dry, instead of an error.
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn push(&self, response: ScriptedResponse) {
        self.queue.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn call(&self, request: &LlmRequest) -> Result<String, GatewayError> {
        self.requests.lock().push(request.clone());
        let next = self.queue.lock().pop_front();

        let mut response = match (next, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(reply)) => ScriptedResponse::Text(reply.clone()),
            (None, None) => {
                return Err(GatewayError::InvalidRequest(format!(
                    "no scripted response for call {}",
                    self.call_count()
                )))
            }
        };

        loop {
            match response {
                ScriptedResponse::Text(text) => return Ok(text),
                ScriptedResponse::Error(e) => return Err(e),
                ScriptedResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(model: &str) -> LlmRequest {
        LlmRequest {
            system: String::new(),
            messages: vec![],
            model: model.into(),
            max_tokens: 16,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn replays_in_order_and_records() {
        let mock = ScriptedProvider::new(vec![
            ScriptedResponse::text("one"),
            ScriptedResponse::Error(GatewayError::ProviderOverloaded),
        ]);
        assert_eq!(mock.call(&request("a")).await.unwrap(), "one");
        assert!(matches!(
            mock.call(&request("b")).await,
            Err(GatewayError::ProviderOverloaded)
        ));
        assert!(mock.call(&request("c")).await.is_err());
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.requests()[1].model, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn delay_then_resolve() {
        let mock = ScriptedProvider::new(vec![ScriptedResponse::delayed(
            Duration::from_secs(30),
            ScriptedResponse::text("late"),
        )]);
        let started = tokio::time::Instant::now();
        assert_eq!(mock.call(&request("m")).await.unwrap(), "late");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn fallback_and_json_script() {
        let mock = ScriptedProvider::from_json(r#"["first"]"#)
            .unwrap()
            .with_fallback("again");
        assert_eq!(mock.call(&request("m")).await.unwrap(), "first");
        assert_eq!(mock.call(&request("m")).await.unwrap(), "again");
        assert_eq!(mock.remaining(), 0);
    }
}

use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::messages::ChatMessage;

/// Everything a single completion call needs.
#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// The LLM boundary. Implementations return the model's raw text; the
/// orchestrator owns parsing.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, request: &LlmRequest) -> Result<String, GatewayError>;
}

#[async_trait]
impl<P: LlmProvider + ?Sized> LlmProvider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn call(&self, request: &LlmRequest) -> Result<String, GatewayError> {
        (**self).call(request).await
    }
}

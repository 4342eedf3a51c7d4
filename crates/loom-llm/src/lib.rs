pub mod anthropic;
pub mod converter;
pub mod mock;
pub mod reliable;

pub use anthropic::AnthropicProvider;
pub use mock::{ScriptedProvider, ScriptedResponse};
pub use reliable::{ReliableConfig, ReliableProvider};

use std::sync::Arc;
use std::time::Duration;

use loom_core::errors::GatewayError;
use loom_core::provider::LlmProvider;
use loom_settings::LlmSettings;
use secrecy::SecretString;

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Build the configured provider, wrapped in retry logic.
pub fn from_settings(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, GatewayError> {
    let config = ReliableConfig {
        max_retries: settings.max_retries,
        base_delay: Duration::from_millis(settings.base_delay_ms),
        max_delay: Duration::from_millis(settings.max_delay_ms),
        ..ReliableConfig::default()
    };

    match settings.provider.as_str() {
        "anthropic" => {
            let key = std::env::var(API_KEY_ENV)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| GatewayError::NotConfigured(format!("{API_KEY_ENV} is not set")))?;
            let inner = AnthropicProvider::new(SecretString::from(key), &settings.base_url)?;
            Ok(Arc::new(ReliableProvider::new(inner, config)))
        }
        other => Err(GatewayError::NotConfigured(format!(
            "unknown provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_not_configured() {
        let settings = LlmSettings {
            provider: "carrier-pigeon".into(),
            ..LlmSettings::default()
        };
        let err = from_settings(&settings).err().unwrap();
        assert!(matches!(err, GatewayError::NotConfigured(_)));
        assert!(err.is_fatal());
    }
}

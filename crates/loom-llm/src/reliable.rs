use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use loom_core::errors::GatewayError;
use loom_core::provider::{LlmProvider, LlmRequest};

#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

/// Retries retryable gateway errors with exponential backoff and jitter.
/// Fatal errors and cancellation pass straight through; a `retry_after`
/// hint from the provider replaces the computed delay.
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    total_retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        let exp = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp.min(self.config.max_delay.as_millis() as f64);

        let spread = capped * self.config.jitter_factor;
        let jitter = if spread >= 1.0 {
            (random_u64() % (spread as u64 * 2 + 1)) as f64 - spread
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(1.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }
}

/// xorshift64 seeded from the clock; jitter only needs to be uncorrelated.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64 | 1)
                .unwrap_or(0x9E37_79B9_7F4A_7C15)
        );
    }

    STATE.with(|s| {
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, request: &LlmRequest) -> Result<String, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.inner.call(request).await {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_retryable() || attempt >= self.config.max_retries => {
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    let _ = self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.error_kind(),
                        error = %e,
                        "retrying model call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedProvider, ScriptedResponse};

    fn fast() -> ReliableConfig {
        ReliableConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_factor: 0.0,
        }
    }

    fn server_error() -> ScriptedResponse {
        ScriptedResponse::Error(GatewayError::ServerError {
            status: 500,
            body: "internal".into(),
        })
    }

    fn request() -> LlmRequest {
        LlmRequest {
            system: String::new(),
            messages: vec![],
            model: "m".into(),
            max_tokens: 16,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn recovers_after_retryable_errors() {
        let mock = ScriptedProvider::new(vec![
            server_error(),
            server_error(),
            ScriptedResponse::text("recovered"),
        ]);
        let reliable = ReliableProvider::new(mock, fast());

        assert_eq!(reliable.call(&request()).await.unwrap(), "recovered");
        assert_eq!(reliable.total_retries(), 2);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let mock = ScriptedProvider::new(vec![
            ScriptedResponse::Error(GatewayError::AuthenticationFailed("bad key".into())),
            ScriptedResponse::text("unreachable"),
        ]);
        let reliable = ReliableProvider::new(mock, fast());

        let err = reliable.call(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationFailed(_)));
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let mock = ScriptedProvider::new((0..5).map(|_| server_error()).collect());
        let reliable = ReliableProvider::new(mock, fast());

        assert!(reliable.call(&request()).await.is_err());
        assert_eq!(reliable.total_retries(), 3);
    }

    #[test]
    fn delay_respects_hint_and_cap() {
        let reliable = ReliableProvider::new(
            ScriptedProvider::new(vec![]),
            ReliableConfig {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(350),
                jitter_factor: 0.0,
                ..ReliableConfig::default()
            },
        );
        assert_eq!(
            reliable.retry_delay(0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(reliable.retry_delay(0, None).as_millis(), 100);
        assert_eq!(reliable.retry_delay(1, None).as_millis(), 200);
        assert_eq!(reliable.retry_delay(4, None).as_millis(), 350);
    }

    #[test]
    fn jittered_delay_stays_in_band() {
        let reliable = ReliableProvider::new(
            ScriptedProvider::new(vec![]),
            ReliableConfig {
                base_delay: Duration::from_millis(1000),
                ..ReliableConfig::default()
            },
        );
        for _ in 0..20 {
            let ms = reliable.retry_delay(0, None).as_millis();
            assert!((800..=1200).contains(&ms), "{ms}");
        }
    }
}

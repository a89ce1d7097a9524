use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use supermean_common::{Result, SuperMeanError};
use tracing::warn;

use crate::client::{CompletionStream, LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Backoff for the given zero-based attempt, with a small deterministic
    /// jitter so parallel callers do not retry in lockstep.
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * jitter_fraction(attempt)) as u64;
        (base as u64).saturating_add(jitter).min(self.max_delay_ms)
    }
}

fn jitter_fraction(attempt: u32) -> f64 {
    let x = attempt.wrapping_mul(2_654_435_761);
    (x % 100) as f64 / 100.0
}

/// Transient transport failures worth another attempt: rate limits, 5xx
/// responses and dropped connections.
pub fn is_retryable(error: &SuperMeanError) -> bool {
    let SuperMeanError::ModelConnection { message, .. } = error else {
        return false;
    };
    let lower = message.to_lowercase();
    [
        "429",
        "rate limit",
        "500",
        "502",
        "503",
        "504",
        "server error",
        "bad gateway",
        "service unavailable",
        "gateway timeout",
        "timed out",
        "connection reset",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Extract a `retry-after: N` hint (seconds) from an error message.
fn parse_retry_after(error: &SuperMeanError) -> Option<u64> {
    let text = error.to_string().to_lowercase();
    let pos = text.find("retry-after")?;
    text[pos..]
        .split_whitespace()
        .skip(1)
        .find_map(|word| {
            word.trim_matches(|c: char| !c.is_ascii_digit())
                .parse::<u64>()
                .ok()
        })
        .map(|secs| secs * 1000)
}

pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn backoff(&self, attempt: u32, error: &SuperMeanError) {
        let delay = parse_retry_after(error)
            .map(|ms| ms.min(self.config.max_delay_ms))
            .unwrap_or_else(|| self.config.delay_for(attempt));

        warn!(
            connector = %self.inner.model_name(),
            attempt = attempt + 1,
            max_retries = self.config.max_retries,
            delay_ms = delay,
            error = %error,
            "Retrying LLM request"
        );

        tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
    }
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    self.backoff(attempt, &e).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Only establishing the stream is retried; a stream that fails midway
    /// surfaces the error to the consumer.
    async fn complete_stream(&self, request: LlmRequest) -> Result<CompletionStream> {
        let mut attempt = 0;
        loop {
            match self.inner.complete_stream(request.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    self.backoff(attempt, &e).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conn_err(message: &str) -> SuperMeanError {
        SuperMeanError::ModelConnection {
            model: "test".into(),
            message: message.into(),
        }
    }

    #[test]
    fn default_retry_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn retryable_error_detection() {
        assert!(is_retryable(&conn_err("API error 429 Too Many Requests")));
        assert!(is_retryable(&conn_err("API error 503 Service Unavailable")));
        assert!(is_retryable(&conn_err("request failed: operation timed out")));
        assert!(!is_retryable(&conn_err("API error 401 Unauthorized")));
        assert!(!is_retryable(&SuperMeanError::Config("503".into())));
    }

    #[test]
    fn retry_after_is_parsed_in_seconds() {
        let err = conn_err("API error 429: slow down retry-after: 7");
        assert_eq!(parse_retry_after(&err), Some(7000));
        assert_eq!(parse_retry_after(&conn_err("API error 500")), None);
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        };
        assert!(config.delay_for(0) >= 100);
        assert!(config.delay_for(2) >= 400);
        assert_eq!(config.delay_for(10), 1_000);
    }

    struct FlakyClient {
        failures_left: AtomicU32,
        calls: AtomicU32,
        error: &'static str,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(conn_err(self.error));
            }
            Ok(LlmResponse {
                content: "ok".into(),
                model: "flaky".into(),
                usage: None,
                finish_reason: None,
            })
        }
        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let client = RetryingClient::new(
            FlakyClient {
                failures_left: AtomicU32::new(2),
                calls: AtomicU32::new(0),
                error: "API error 502 Bad Gateway",
            },
            fast_config(),
        );
        let response = client.complete(LlmRequest::from_prompt("hi")).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let client = RetryingClient::new(
            FlakyClient {
                failures_left: AtomicU32::new(5),
                calls: AtomicU32::new(0),
                error: "API error 401 Unauthorized",
            },
            fast_config(),
        );
        assert!(client.complete(LlmRequest::from_prompt("hi")).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_limit() {
        let client = RetryingClient::new(
            FlakyClient {
                failures_left: AtomicU32::new(10),
                calls: AtomicU32::new(0),
                error: "API error 500",
            },
            fast_config(),
        );
        assert!(client.complete(LlmRequest::from_prompt("hi")).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }
}

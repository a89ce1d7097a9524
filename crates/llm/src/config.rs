use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use supermean_common::{Result, SuperMeanError};

use crate::client::{CompletionStream, LlmClient, LlmRequest, LlmResponse};
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};

/// Configuration for one named connector in the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Key the fallback chain refers to (e.g. `"deepseek"`).
    pub name: String,
    /// Wire protocol; every supported provider speaks the OpenAI dialect.
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_max_concurrent() -> usize {
    2
}

impl LlmConfig {
    /// The configured key, or `<NAME>_API_KEY` from the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            let var = format!("{}_API_KEY", self.name.to_uppercase().replace('-', "_"));
            std::env::var(var).ok().filter(|k| !k.is_empty())
        })
    }

    fn base_url(&self) -> Option<String> {
        self.api_url.clone().or_else(|| {
            let url = match self.provider.as_str() {
                "deepseek" => "https://api.deepseek.com",
                "aimlapi" => "https://api.aimlapi.com",
                "routerapi" => "https://openrouter.ai/api",
                "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai",
                _ => return None,
            };
            Some(url.to_string())
        })
    }
}

pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.semaphore
            .acquire()
            .await
            .map_err(|e| SuperMeanError::ModelConnection {
                model: self.inner.model_name().to_string(),
                message: format!("semaphore acquire failed: {e}"),
            })
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self.permit().await?;
        self.inner.complete(request).await
    }

    /// The permit covers opening the stream, not draining it.
    async fn complete_stream(&self, request: LlmRequest) -> Result<CompletionStream> {
        let _permit = self.permit().await?;
        self.inner.complete_stream(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Applies the connector's default temperature and token limit.
struct DefaultsClient {
    inner: Box<dyn LlmClient>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl DefaultsClient {
    fn apply(&self, mut request: LlmRequest) -> LlmRequest {
        request.temperature = request.temperature.or(self.temperature);
        request.max_tokens = request.max_tokens.or(self.max_tokens);
        request
    }
}

#[async_trait]
impl LlmClient for DefaultsClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.inner.complete(self.apply(request)).await
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<CompletionStream> {
        self.inner.complete_stream(self.apply(request)).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let base_client: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" | "deepseek" | "aimlapi" | "routerapi" | "gemini" => Box::new(OpenAiClient::new(
            config.name.clone(),
            config.base_url(),
            config.model.clone(),
            config.resolve_api_key(),
        )),
        other => {
            return Err(SuperMeanError::Config(format!(
                "Unknown LLM provider '{other}' for connector '{}'",
                config.name
            )));
        }
    };

    let with_defaults: Box<dyn LlmClient> = Box::new(DefaultsClient {
        inner: base_client,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    });

    let retrying: Box<dyn LlmClient> =
        Box::new(RetryingClient::new(with_defaults, config.retry.clone()));

    let semaphored = SemaphoredClient::new(Arc::from(retrying), config.max_concurrent_requests);

    Ok(Arc::new(semaphored))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_CONFIG: &str = r#"
name = "local"
provider = "openai"
model = "llama3"
api_url = "http://localhost:11434"
max_concurrent_requests = 4

[retry]
max_retries = 5
initial_delay_ms = 1000
"#;

    fn config(name: &str, provider: &str) -> LlmConfig {
        LlmConfig {
            name: name.to_string(),
            provider: provider.to_string(),
            model: "test-model".to_string(),
            api_key: None,
            api_url: None,
            temperature: None,
            max_tokens: None,
            max_concurrent_requests: 2,
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn deserialize_config_from_toml() {
        let config: LlmConfig = toml::from_str(TOML_CONFIG).unwrap();
        assert_eq!(config.name, "local");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:11434"));
        assert_eq!(config.max_concurrent_requests, 4);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn deserialize_config_defaults() {
        let config: LlmConfig = toml::from_str(
            r#"
name = "deepseek"
model = "deepseek-chat"
"#,
        )
        .unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.max_concurrent_requests, 2);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn provider_default_urls() {
        assert_eq!(
            config("x", "deepseek").base_url().as_deref(),
            Some("https://api.deepseek.com")
        );
        assert!(config("x", "openai").base_url().is_none());

        let mut explicit = config("x", "deepseek");
        explicit.api_url = Some("http://proxy".into());
        assert_eq!(explicit.base_url().as_deref(), Some("http://proxy"));
    }

    #[test]
    fn explicit_api_key_wins() {
        let mut cfg = config("nonexistent-connector-xyz", "openai");
        assert!(cfg.resolve_api_key().is_none());
        cfg.api_key = Some("sk-test".into());
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn build_known_providers() {
        for provider in ["openai", "deepseek", "aimlapi", "routerapi", "gemini"] {
            let client = build_llm_client(&config(provider, provider)).unwrap();
            assert_eq!(client.model_name(), "test-model");
        }
    }

    #[test]
    fn build_unknown_provider_fails() {
        assert!(matches!(
            build_llm_client(&config("x", "carrier-pigeon")),
            Err(SuperMeanError::Config(_))
        ));
    }

    #[tokio::test]
    async fn semaphored_client_limits_concurrency() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingClient {
            concurrent: Arc<AtomicU32>,
            max_seen: Arc<AtomicU32>,
        }

        #[async_trait]
        impl LlmClient for CountingClient {
            async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
                let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(LlmResponse {
                    content: "ok".to_string(),
                    model: "test".to_string(),
                    usage: None,
                    finish_reason: None,
                })
            }
            fn model_name(&self) -> &str {
                "test"
            }
        }

        let max_seen = Arc::new(AtomicU32::new(0));
        let inner = Arc::new(CountingClient {
            concurrent: Arc::new(AtomicU32::new(0)),
            max_seen: max_seen.clone(),
        });
        let semaphored = Arc::new(SemaphoredClient::new(inner, 2));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let client = semaphored.clone();
                tokio::spawn(async move {
                    client.complete(LlmRequest::default()).await.unwrap();
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}

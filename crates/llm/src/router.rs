//! Fallback-chain routing across named connectors.
//!
//! A request goes to the preferred connector first, then to each entry of
//! the fallback chain in order. Entries may name a specific model with the
//! `connector:model` syntax (e.g. `aimlapi:gpt-4o`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use supermean_common::{Result, SuperMeanError};
use tracing::{debug, error, info, warn};

use crate::client::{CompletionStream, LlmClient, LlmRequest};
use crate::config::{LlmConfig, build_llm_client};

const ALL_FAILED: &str = "No available model connector succeeded.";

/// The text-generation capability the mission components depend on.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, model_preference: Option<&str>) -> Result<String>;

    async fn generate_stream(
        &self,
        prompt: &str,
        model_preference: Option<&str>,
    ) -> Result<CompletionStream> {
        let text = self.generate(prompt, model_preference).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRouterConfig {
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<String>,
    #[serde(default)]
    pub connectors: Vec<LlmConfig>,
}

fn default_fallback_chain() -> Vec<String> {
    vec!["gemini".into(), "deepseek".into()]
}

impl Default for ModelRouterConfig {
    fn default() -> Self {
        Self {
            fallback_chain: default_fallback_chain(),
            connectors: Vec::new(),
        }
    }
}

/// A `connector[:model]` target.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    connector: String,
    model: Option<String>,
}

impl Target {
    fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }
        let (connector, model) = match spec.split_once(':') {
            Some((c, m)) => (c.trim(), Some(m.trim()).filter(|m| !m.is_empty())),
            None => (spec, None),
        };
        Some(Self {
            connector: connector.to_string(),
            model: model.map(str::to_string),
        })
    }

    fn label(&self) -> String {
        match &self.model {
            Some(model) => format!("{}:{}", self.connector, model),
            None => self.connector.clone(),
        }
    }
}

pub struct ModelRouter {
    connectors: HashMap<String, Arc<dyn LlmClient>>,
    fallback_chain: Vec<String>,
}

impl ModelRouter {
    pub fn new(fallback_chain: Vec<String>) -> Self {
        Self {
            connectors: HashMap::new(),
            fallback_chain,
        }
    }

    /// Build every configured connector. A connector that fails to build is
    /// logged and left out; the router still serves the others.
    pub fn from_config(config: &ModelRouterConfig) -> Self {
        let mut router = Self::new(config.fallback_chain.clone());
        for connector in &config.connectors {
            match build_llm_client(connector) {
                Ok(client) => router.register_connector(connector.name.clone(), client),
                Err(e) => error!(connector = %connector.name, error = %e, "Failed to initialize connector"),
            }
        }
        if router.connectors.is_empty() {
            warn!("Model router has no connectors; every generate call will fail");
        }
        info!(
            connectors = ?router.available_connectors(),
            fallback_chain = ?router.fallback_chain,
            "Model router initialized"
        );
        router
    }

    pub fn with_connector(mut self, name: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.register_connector(name, client);
        self
    }

    pub fn register_connector(&mut self, name: impl Into<String>, client: Arc<dyn LlmClient>) {
        self.connectors.insert(name.into(), client);
    }

    pub fn available_connectors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Preferred target first, then the chain, without repeats or unknown
    /// connectors.
    fn candidates(&self, model_preference: Option<&str>) -> Vec<Target> {
        let requested = model_preference
            .and_then(Target::parse)
            .into_iter()
            .chain(self.fallback_chain.iter().filter_map(|s| Target::parse(s)));

        let mut targets: Vec<Target> = Vec::new();
        for target in requested {
            if targets.contains(&target) {
                continue;
            }
            if !self.connectors.contains_key(&target.connector) {
                warn!(target = %target.label(), "Skipping unknown model connector");
                continue;
            }
            targets.push(target);
        }
        targets
    }

    fn exhausted(last_error: Option<SuperMeanError>) -> SuperMeanError {
        let message = match last_error {
            Some(e) => format!("{ALL_FAILED} Last error: {e}"),
            None => format!("{ALL_FAILED} No connector is configured for this request."),
        };
        SuperMeanError::ModelConnection {
            model: "router".into(),
            message,
        }
    }

    fn client_for(&self, target: &Target) -> Option<&Arc<dyn LlmClient>> {
        self.connectors.get(&target.connector)
    }
}

#[async_trait]
impl TextGenerator for ModelRouter {
    async fn generate(&self, prompt: &str, model_preference: Option<&str>) -> Result<String> {
        let mut last_error = None;
        for target in self.candidates(model_preference) {
            let Some(client) = self.client_for(&target) else {
                continue;
            };
            debug!(target = %target.label(), "Routing generation request");
            let request = LlmRequest::from_prompt(prompt).with_model(target.model.clone());
            match client.complete(request).await {
                Ok(response) => return Ok(response.content),
                Err(e) => {
                    warn!(target = %target.label(), error = %e, "Model connector failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(Self::exhausted(last_error))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        model_preference: Option<&str>,
    ) -> Result<CompletionStream> {
        let mut last_error = None;
        for target in self.candidates(model_preference) {
            let Some(client) = self.client_for(&target) else {
                continue;
            };
            let request = LlmRequest::from_prompt(prompt).with_model(target.model.clone());
            match client.complete_stream(request).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(target = %target.label(), error = %e, "Model connector failed to stream, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(Self::exhausted(last_error))
    }
}

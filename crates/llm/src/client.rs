use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use supermean_common::Result;

/// Incremental completion text. Each item is one chunk of the answer.
pub type CompletionStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Overrides the connector's configured model for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// A single user turn.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage {
                role: Role::User,
                content: prompt.into(),
            }],
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Stream the completion. Connectors without native streaming yield the
    /// whole answer as one chunk.
    async fn complete_stream(&self, request: LlmRequest) -> Result<CompletionStream> {
        let response = self.complete(request).await?;
        Ok(stream::once(async move { Ok(response.content) }).boxed())
    }

    fn model_name(&self) -> &str;
}

#[async_trait]
impl LlmClient for Box<dyn LlmClient> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        (**self).complete(request).await
    }
    async fn complete_stream(&self, request: LlmRequest) -> Result<CompletionStream> {
        (**self).complete_stream(request).await
    }
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoClient;

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse {
                content: request.messages[0].content.clone(),
                model: "echo".to_string(),
                usage: None,
                finish_reason: Some("stop".to_string()),
            })
        }
        fn model_name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn from_prompt_builds_single_user_turn() {
        let request = LlmRequest::from_prompt("Plan a trip")
            .with_system_prompt("You are a planner.")
            .with_model(Some("gpt-4o".into()));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.system_prompt.as_deref(), Some("You are a planner."));
        assert_eq!(request.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn model_override_is_skipped_when_absent() {
        let json = serde_json::to_string(&LlmRequest::from_prompt("hi")).unwrap();
        assert!(!json.contains("\"model\""));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[tokio::test]
    async fn default_stream_yields_single_chunk() {
        let mut chunks = EchoClient
            .complete_stream(LlmRequest::from_prompt("hello"))
            .await
            .unwrap();
        let first = chunks.next().await.unwrap().unwrap();
        assert_eq!(first, "hello");
        assert!(chunks.next().await.is_none());
    }
}

//! Connector for OpenAI-compatible chat completion endpoints.
//!
//! DeepSeek, AIMLAPI, RouterAPI and most local servers speak the same
//! `/v1/chat/completions` protocol, so one client covers all of them.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use supermean_common::{Result, SuperMeanError};
use tracing::debug;

use crate::client::{CompletionStream, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    model: String,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One line of a server-sent-events body.
#[derive(Debug, PartialEq)]
enum SseLine {
    Chunk(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(SseLine::Chunk)
            .unwrap_or(SseLine::Skip),
        Err(_) => SseLine::Skip,
    }
}

pub struct OpenAiClient {
    /// Connector name used in errors and logs (e.g. `"deepseek"`).
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        name: impl Into<String>,
        base_url: Option<String>,
        model: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    fn role_to_string(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn build_body(&self, request: &LlmRequest, stream: bool) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_prompt {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: Some(system.clone()),
            });
        }
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: Self::role_to_string(m.role).to_string(),
            content: Some(m.content.clone()),
        }));

        ChatCompletionRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    fn connection_error(&self, message: String) -> SuperMeanError {
        SuperMeanError::ModelConnection {
            model: self.name.clone(),
            message,
        }
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(connector = %self.name, model = %body.model, stream = body.stream, "Sending chat completion");

        let mut http_req = self.http_client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| self.connection_error(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|v| format!(" retry-after: {v}"))
                .unwrap_or_default();
            let body_text = response.text().await.unwrap_or_default();
            return Err(self.connection_error(format!(
                "API error {status}: {body_text}{retry_after}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = self.build_body(&request, false);
        let response = self.send(&body).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| self.connection_error(format!("failed to parse response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| self.connection_error("no choices in response".to_string()))?;

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<CompletionStream> {
        let body = self.build_body(&request, true);
        let response = self.send(&body).await?;
        let name = self.name.clone();

        let bytes = Box::pin(response.bytes_stream());
        let chunks = stream::unfold(
            (bytes, Vec::<u8>::new(), false),
            move |(mut bytes, mut buf, finished)| {
                let name = name.clone();
                async move {
                    if finished {
                        return None;
                    }
                    loop {
                        if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buf.drain(..=pos).collect();
                            match parse_sse_line(String::from_utf8_lossy(&line).trim()) {
                                SseLine::Chunk(text) => return Some((Ok(text), (bytes, buf, false))),
                                SseLine::Done => return None,
                                SseLine::Skip => continue,
                            }
                        }
                        match bytes.next().await {
                            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                            Some(Err(e)) => {
                                let err = SuperMeanError::ModelConnection {
                                    model: name,
                                    message: format!("streaming error: {e}"),
                                };
                                return Some((Err(err), (bytes, buf, true)));
                            }
                            None => return None,
                        }
                    }
                }
            },
        );

        Ok(chunks.boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

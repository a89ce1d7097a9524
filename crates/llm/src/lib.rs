//! LLM access for SuperMean.
//!
//! Connectors implement [`LlmClient`]; the [`ModelRouter`] strings them into
//! a fallback chain behind the [`TextGenerator`] capability that the mission
//! components call.

pub mod client;
pub mod config;
pub mod openai;
pub mod retry;
pub mod router;

pub use client::{ChatMessage, CompletionStream, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use config::{LlmConfig, SemaphoredClient, build_llm_client};
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient, is_retryable};
pub use router::{ModelRouter, ModelRouterConfig, TextGenerator};

//! Core agent traits and capabilities.
//!
//! These traits are defined in `supermean-common` so that the agent crate,
//! the skill registry and the mission loop can reference them without
//! circular dependencies.

use crate::{ContextMap, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capabilities that an agent can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    /// Can write and modify code
    CodeGeneration,
    /// Can design and document APIs
    ApiDesign,
    /// Can perform web searches
    WebSearch,
    /// Can read and analyze documents
    DocumentAnalysis,
    /// Can summarize long text
    Summarization,
    /// Can produce UI and visual designs
    UiDesign,
    /// Can answer medical questions
    MedicalAnalysis,
    /// Can audit code and configuration for vulnerabilities
    SecurityAudit,
    /// Can access long-term memory
    MemoryAccess,
}

impl AgentCapability {
    /// Short phrase used when advertising an agent to the planner.
    pub fn description(self) -> &'static str {
        match self {
            Self::CodeGeneration => "writes and modifies code",
            Self::ApiDesign => "designs and documents APIs",
            Self::WebSearch => "searches the web",
            Self::DocumentAnalysis => "reads and analyzes documents",
            Self::Summarization => "summarizes long text",
            Self::UiDesign => "produces UI and visual designs",
            Self::MedicalAnalysis => "answers medical questions",
            Self::SecurityAudit => "audits code and configuration for vulnerabilities",
            Self::MemoryAccess => "recalls long-term memory",
        }
    }
}

/// The core agent trait that all specialist agents implement.
///
/// `run` receives the step's action description plus the resolved inputs.
/// Agents conventionally answer with an object carrying a `status` field of
/// `"success"` or `"error"`; an `"error"` status is treated by callers as a
/// failed attempt, the same as an `Err`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Get the agent's unique identifier.
    fn id(&self) -> &str;

    /// Get the agent's human-readable name, used as the executor key in plans.
    fn name(&self) -> &str;

    /// Get the agent's capabilities.
    fn capabilities(&self) -> &[AgentCapability];

    /// Check if the agent has a specific capability.
    fn has_capability(&self, cap: AgentCapability) -> bool {
        self.capabilities().contains(&cap)
    }

    /// Perform a task.
    async fn run(&self, task_description: &str, inputs: &ContextMap) -> Result<Value>;

    /// Get the agent's system prompt.
    fn system_prompt(&self) -> &str;
}

/// Configuration for agent creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent ID
    pub id: String,

    /// Name the planner refers to this agent by (e.g. `"DevAgent"`)
    pub name: String,

    /// Preferred router model; `None` uses the router's chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_preference: Option<String>,

    /// Custom system prompt (optional, uses default if not set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: "agent".into(),
            name: "Agent".into(),
            model_preference: None,
            system_prompt: None,
        }
    }
}

/// Read the conventional `status` field of an agent result.
///
/// Returns the error text when the agent reported `"status": "error"`.
pub fn agent_error_status(result: &Value) -> Option<String> {
    let obj = result.as_object()?;
    match obj.get("status").and_then(Value::as_str) {
        Some("error") => Some(
            obj.get("error")
                .or_else(|| obj.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("agent reported an error status")
                .to_string(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_serializes_snake_case() {
        let json = serde_json::to_string(&AgentCapability::CodeGeneration).unwrap();
        assert_eq!(json, "\"code_generation\"");
    }

    #[test]
    fn test_agent_error_status() {
        assert_eq!(
            agent_error_status(&json!({"status": "error", "error": "API key invalid"})),
            Some("API key invalid".to_string())
        );
        assert_eq!(
            agent_error_status(&json!({"status": "error"})),
            Some("agent reported an error status".to_string())
        );
        assert_eq!(agent_error_status(&json!({"status": "success"})), None);
        assert_eq!(agent_error_status(&json!("plain text")), None);
    }

    #[test]
    fn test_agent_config_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"id": "dev", "name": "DevAgent"}"#).unwrap();
        assert_eq!(config.name, "DevAgent");
        assert!(config.model_preference.is_none());
        assert!(config.system_prompt.is_none());
    }
}

//! LLM-backed specialist agents.
//!
//! Every specialist works the same way: wrap the task and its inputs in the
//! profile's system prompt, send it through the model router, and return
//! the answer under a profile-specific output key so later plan steps can
//! reference it by name.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use supermean_common::{Agent, AgentCapability, AgentConfig, ContextMap, Result};
use supermean_llm::TextGenerator;
use tracing::{info, warn};

const DEV_SYSTEM_PROMPT: &str = r#"You are a senior software engineer. Produce working, minimal code for the task.
Return only the code and a one-line note on how to run it."#;

const RESEARCH_SYSTEM_PROMPT: &str = r#"You are a research assistant. Gather the key facts for the task,
distinguish facts from opinions, and answer with a concise structured summary."#;

const DESIGN_SYSTEM_PROMPT: &str = r#"You are a product designer. Describe layouts, components and interaction
flows for the task in plain, implementable terms."#;

const MEDICAL_SYSTEM_PROMPT: &str = r#"You are a careful medical information assistant. Answer with general,
evidence-based information, state uncertainty, and never give a diagnosis."#;

const SECURITY_SYSTEM_PROMPT: &str = r#"You are an application security reviewer. Identify concrete risks in the
provided material, rate their severity, and recommend fixes."#;

/// The built-in specialist kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentProfile {
    Dev,
    Research,
    Design,
    Medical,
    Security,
}

impl AgentProfile {
    pub const ALL: [AgentProfile; 5] = [
        AgentProfile::Dev,
        AgentProfile::Research,
        AgentProfile::Design,
        AgentProfile::Medical,
        AgentProfile::Security,
    ];

    /// Name plans use in `suggested_executor`.
    pub fn agent_name(self) -> &'static str {
        match self {
            Self::Dev => "DevAgent",
            Self::Research => "ResearchAgent",
            Self::Design => "DesignAgent",
            Self::Medical => "MedicalAgent",
            Self::Security => "SecurityAgent",
        }
    }

    /// Key the agent's answer is stored under in its result object.
    pub fn output_key(self) -> &'static str {
        match self {
            Self::Dev => "generated_code",
            Self::Research => "research_summary",
            Self::Design => "design_spec",
            Self::Medical => "medical_analysis",
            Self::Security => "security_report",
        }
    }

    pub fn capabilities(self) -> &'static [AgentCapability] {
        match self {
            Self::Dev => &[AgentCapability::CodeGeneration, AgentCapability::ApiDesign],
            Self::Research => &[
                AgentCapability::WebSearch,
                AgentCapability::DocumentAnalysis,
                AgentCapability::Summarization,
            ],
            Self::Design => &[AgentCapability::UiDesign, AgentCapability::DocumentAnalysis],
            Self::Medical => &[AgentCapability::MedicalAnalysis, AgentCapability::DocumentAnalysis],
            Self::Security => &[AgentCapability::SecurityAudit, AgentCapability::CodeGeneration],
        }
    }

    fn default_system_prompt(self) -> &'static str {
        match self {
            Self::Dev => DEV_SYSTEM_PROMPT,
            Self::Research => RESEARCH_SYSTEM_PROMPT,
            Self::Design => DESIGN_SYSTEM_PROMPT,
            Self::Medical => MEDICAL_SYSTEM_PROMPT,
            Self::Security => SECURITY_SYSTEM_PROMPT,
        }
    }
}

pub struct SpecialistAgent {
    config: AgentConfig,
    profile: AgentProfile,
    llm: Arc<dyn TextGenerator>,
    runs: AtomicU64,
}

impl SpecialistAgent {
    pub fn new(profile: AgentProfile, config: AgentConfig, llm: Arc<dyn TextGenerator>) -> Self {
        Self {
            config,
            profile,
            llm,
            runs: AtomicU64::new(0),
        }
    }

    pub fn with_default_config(profile: AgentProfile, llm: Arc<dyn TextGenerator>) -> Self {
        let name = profile.agent_name();
        Self::new(
            profile,
            AgentConfig {
                id: name.trim_end_matches("Agent").to_lowercase(),
                name: name.into(),
                ..Default::default()
            },
            llm,
        )
    }

    /// One agent per built-in profile, sharing the router.
    pub fn all_defaults(llm: Arc<dyn TextGenerator>) -> Vec<Arc<dyn Agent>> {
        AgentProfile::ALL
            .iter()
            .map(|p| Arc::new(Self::with_default_config(*p, llm.clone())) as Arc<dyn Agent>)
            .collect()
    }

    pub fn profile(&self) -> AgentProfile {
        self.profile
    }

    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    fn build_prompt(&self, task_description: &str, inputs: &ContextMap) -> String {
        let mut prompt = format!("{}\n\nTASK:\n{}\n", self.system_prompt(), task_description);
        if !inputs.is_empty() {
            let rendered = serde_json::to_string_pretty(inputs).unwrap_or_default();
            prompt.push_str("\nINPUTS:\n");
            prompt.push_str(&rendered);
            prompt.push('\n');
        }
        prompt
    }
}

#[async_trait]
impl Agent for SpecialistAgent {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> &[AgentCapability] {
        self.profile.capabilities()
    }

    async fn run(&self, task_description: &str, inputs: &ContextMap) -> Result<Value> {
        info!(
            agent = %self.id(),
            inputs = inputs.len(),
            "Running specialist task"
        );
        self.runs.fetch_add(1, Ordering::Relaxed);

        let prompt = self.build_prompt(task_description, inputs);
        match self
            .llm
            .generate(&prompt, self.config.model_preference.as_deref())
            .await
        {
            Ok(answer) => {
                let answer = answer.trim().to_string();
                Ok(json!({
                    "status": "success",
                    "agent": self.name(),
                    "output": answer,
                    self.profile.output_key(): answer,
                }))
            }
            Err(e) => {
                warn!(agent = %self.id(), error = %e, "Specialist LLM call failed");
                Ok(json!({
                    "status": "error",
                    "agent": self.name(),
                    "error": e.to_string(),
                }))
            }
        }
    }

    fn system_prompt(&self) -> &str {
        self.config
            .system_prompt
            .as_deref()
            .unwrap_or(self.profile.default_system_prompt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use supermean_common::{SuperMeanError, agent_error_status};

    struct ScriptedLlm {
        reply: Option<&'static str>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedLlm {
        async fn generate(&self, prompt: &str, _pref: Option<&str>) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            self.reply.map(str::to_string).ok_or_else(|| SuperMeanError::ModelConnection {
                model: "router".into(),
                message: "API key invalid".into(),
            })
        }
    }

    fn llm(reply: Option<&'static str>) -> Arc<ScriptedLlm> {
        Arc::new(ScriptedLlm {
            reply,
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_default_identity() {
        let agent = SpecialistAgent::with_default_config(AgentProfile::Research, llm(Some("x")));
        assert_eq!(agent.id(), "research");
        assert_eq!(agent.name(), "ResearchAgent");
        assert!(agent.has_capability(AgentCapability::WebSearch));
        assert!(agent.system_prompt().contains("research assistant"));
    }

    #[tokio::test]
    async fn test_success_result_uses_output_key() {
        let recorder = llm(Some(" Findings about Z "));
        let agent = SpecialistAgent::with_default_config(AgentProfile::Research, recorder.clone());
        let mut inputs = ContextMap::new();
        inputs.insert("topic".into(), json!("Z"));

        let result = agent.run("Research topic Z", &inputs).await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["research_summary"], "Findings about Z");
        assert_eq!(agent.run_count(), 1);

        let prompt = recorder.prompts.lock()[0].clone();
        assert!(prompt.contains("Research topic Z"));
        assert!(prompt.contains("\"topic\": \"Z\""));
    }

    #[tokio::test]
    async fn test_llm_failure_is_error_status() {
        let agent = SpecialistAgent::with_default_config(AgentProfile::Dev, llm(None));
        let result = agent.run("Write code", &ContextMap::new()).await.unwrap();
        let error = agent_error_status(&result).unwrap();
        assert!(error.contains("API key invalid"));
    }

    #[test]
    fn test_all_defaults_have_unique_names() {
        let agents = SpecialistAgent::all_defaults(llm(Some("x")));
        let mut names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), AgentProfile::ALL.len());
    }
}

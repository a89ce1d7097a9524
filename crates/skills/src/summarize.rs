//! Built-in `text.summarize` skill.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use supermean_common::{ContextMap, Result, Skill, SkillMetadata, SuperMeanError};
use supermean_llm::TextGenerator;
use tracing::info;

pub const SUMMARIZE_SKILL: &str = "text.summarize";

const DEFAULT_MAX_WORDS: u64 = 150;

/// Summarizes whatever text-like inputs it receives through the router.
pub struct SummarizeSkill {
    llm: Arc<dyn TextGenerator>,
    model_preference: Option<String>,
}

impl SummarizeSkill {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self {
            llm,
            model_preference: None,
        }
    }

    pub fn with_model_preference(mut self, model: impl Into<String>) -> Self {
        self.model_preference = Some(model.into());
        self
    }

    pub fn metadata() -> SkillMetadata {
        SkillMetadata::new("Summarize text into a short paragraph")
            .with_args(["text", "max_words"])
            .with_returns("str")
            .with_category("builtin")
    }

    /// The text to summarize: `text` if given, otherwise every string input
    /// joined together.
    fn source_text(args: &ContextMap) -> Option<String> {
        if let Some(text) = args.get("text").and_then(Value::as_str) {
            return Some(text.to_string());
        }
        let parts: Vec<String> = args
            .iter()
            .filter(|(k, _)| k.as_str() != "max_words")
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}: {s}"),
                other => format!("{k}: {other}"),
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }
}

#[async_trait]
impl Skill for SummarizeSkill {
    async fn call(&self, args: &ContextMap) -> Result<Value> {
        let text = Self::source_text(args)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SuperMeanError::skill(SUMMARIZE_SKILL, "no text to summarize"))?;
        let max_words = args
            .get("max_words")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_WORDS);

        info!(chars = text.len(), max_words, "Summarizing text");
        let prompt = format!(
            "Summarize the following in at most {max_words} words. Reply with the summary only.\n\n{text}"
        );
        let summary = self
            .llm
            .generate(&prompt, self.model_preference.as_deref())
            .await
            .map_err(|e| SuperMeanError::skill(SUMMARIZE_SKILL, e.to_string()))?;

        Ok(json!({"status": "success", "summary": summary.trim()}))
    }
}

//! Built-in `code.write` skill.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use supermean_common::{ContextMap, Result, Skill, SkillMetadata, SuperMeanError};
use supermean_llm::TextGenerator;
use tracing::{info, warn};

pub const CODE_WRITE_SKILL: &str = "code.write";

const DEFAULT_LANGUAGE: &str = "python";

/// Writes a code snippet for a described task.
pub struct CodeWriterSkill {
    llm: Arc<dyn TextGenerator>,
    model_preference: Option<String>,
}

impl CodeWriterSkill {
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
        SkillMetadata::new("Write a code snippet for a described task in a given language")
            .with_args(["description", "language", "context"])
            .with_returns("str")
            .with_category("code")
    }

    /// `description` if given, otherwise every other string input.
    fn task(args: &ContextMap) -> Option<String> {
        if let Some(text) = args.get("description").and_then(Value::as_str) {
            return Some(text.to_string());
        }
        let parts: Vec<String> = args
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "language" | "context"))
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}: {s}"),
                other => format!("{k}: {other}"),
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }

    fn prompt(description: &str, language: &str, context: Option<&str>) -> String {
        let mut prompt = format!(
            "You are an expert {language} programmer. Write clean, efficient and \
             commented {language} code for the following task.\n\n\
             TASK DESCRIPTION:\n{description}\n\n"
        );
        if let Some(context) = context {
            prompt.push_str(&format!(
                "EXISTING CODE TO BUILD ON OR MODIFY:\n```\n{context}\n```\n\n"
            ));
        }
        prompt.push_str(&format!(
            "LANGUAGE: {language}\n\nReply with the {language} code only, without explanations."
        ));
        prompt
    }
}

/// Strip one surrounding markdown fence, with or without a language tag.
pub(crate) fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        Some((_tag, body)) => body,
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[async_trait]
impl Skill for CodeWriterSkill {
    async fn call(&self, args: &ContextMap) -> Result<Value> {
        let description = Self::task(args)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SuperMeanError::skill(CODE_WRITE_SKILL, "no task description given"))?;
        let language = args
            .get("language")
            .and_then(Value::as_str)
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(DEFAULT_LANGUAGE);
        let context = args.get("context").and_then(Value::as_str);

        info!(language, chars = description.len(), "Generating code");
        let reply = self
            .llm
            .generate(
                &Self::prompt(&description, language, context),
                self.model_preference.as_deref(),
            )
            .await
            .map_err(|e| SuperMeanError::skill(CODE_WRITE_SKILL, format!("Code generation failed: {e}")))?;

        let code = strip_code_fence(&reply);
        if code.is_empty() {
            warn!(language, "Model returned no code");
            return Err(SuperMeanError::skill(
                CODE_WRITE_SKILL,
                "LLM returned an empty response for code generation",
            ));
        }
        Ok(json!({"status": "success", "language": language, "code": code}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FixedLlm {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for FixedLlm {
        async fn generate(&self, prompt: &str, _pref: Option<&str>) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn llm(reply: &str) -> Arc<FixedLlm> {
        Arc::new(FixedLlm {
            reply: reply.into(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```rust\nfn main() {}\n```"), "fn main() {}");
        assert_eq!(strip_code_fence("```\nx = 1\n```\n"), "x = 1");
        assert_eq!(strip_code_fence("  print(1)  "), "print(1)");
        assert_eq!(strip_code_fence("```"), "");
    }

    #[tokio::test]
    async fn test_writes_code_in_requested_language() {
        let recorder = llm("```javascript\nconst add = (a, b) => a + b;\n```");
        let skill = CodeWriterSkill::new(recorder.clone());
        let mut args = ContextMap::new();
        args.insert("description".into(), json!("add two numbers"));
        args.insert("language".into(), json!("javascript"));
        args.insert("context".into(), json!("// utils.js"));

        let out = skill.call(&args).await.unwrap();
        assert_eq!(out["code"], "const add = (a, b) => a + b;");
        assert_eq!(out["language"], "javascript");

        let prompt = recorder.prompts.lock()[0].clone();
        assert!(prompt.contains("expert javascript programmer"));
        assert!(prompt.contains("add two numbers"));
        assert!(prompt.contains("// utils.js"));
    }

    #[tokio::test]
    async fn test_defaults_and_failures() {
        let recorder = llm("def f(): pass");
        let skill = CodeWriterSkill::new(recorder.clone());
        let mut args = ContextMap::new();
        args.insert("design_notes".into(), json!("a stub"));
        let out = skill.call(&args).await.unwrap();
        assert_eq!(out["language"], "python");
        assert!(recorder.prompts.lock()[0].contains("design_notes: a stub"));

        assert!(matches!(
            skill.call(&ContextMap::new()).await.unwrap_err(),
            SuperMeanError::Skill { .. }
        ));
        let empty = CodeWriterSkill::new(llm("```\n```"));
        assert!(matches!(
            empty.call(&args).await.unwrap_err(),
            SuperMeanError::Skill { .. }
        ));
    }
}

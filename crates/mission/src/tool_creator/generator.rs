//! LLM code generation for new tools, with a content-addressed cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use supermean_common::{Result, SuperMeanError};
use supermean_llm::TextGenerator;
use supermean_sandbox::parse;
use tracing::{debug, info};

use super::ToolSpec;
use crate::llm_output::strip_code_fences;

const SYSTEM_PROMPT: &str = "You are an expert Python developer writing small, self-contained \
tool functions. Only the modules re, math and asyncio may be imported. Only these builtins \
exist: len, str, int, float, bool, list, dict, set, min, max, sum, ValueError, Exception. \
Validate inputs and raise ValueError on bad input. Output only code.";

pub struct CodeGenerator {
    llm: Arc<dyn TextGenerator>,
    preferred_model: String,
    cache: Mutex<HashMap<String, String>>,
}

impl CodeGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>, preferred_model: impl Into<String>) -> Self {
        Self {
            llm,
            preferred_model: preferred_model.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// SHA-256 of `description|sorted,args|return_type`, hex encoded.
    pub fn cache_key(spec: &ToolSpec) -> String {
        let mut args = spec.args.clone();
        args.sort();
        let material = format!("{}|{}|{}", spec.description, args.join(","), spec.returns);
        format!("{:x}", Sha256::digest(material.as_bytes()))
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Generate source for `spec`. Only output that parses and defines a
    /// single top-level function is returned and cached.
    pub async fn generate(&self, spec: &ToolSpec) -> Result<String> {
        let key = Self::cache_key(spec);
        let cached = self.cache.lock().get(&key).cloned();
        if let Some(code) = cached {
            info!(key = %&key[..8], "Using cached tool code");
            return Ok(code);
        }

        let request = format!(
            "Generate Python code for a function that:\n\
             TASK: {description}\n\
             ARGUMENTS: {args} (all strings)\n\
             RETURN TYPE: {returns}\n\n\
             Requirements:\n\
             1. Include type hints (str for args)\n\
             2. Include docstring\n\
             3. Handle errors appropriately\n\
             4. Use 4 spaces per indentation level\n\
             5. Be self-contained",
            description = spec.description,
            args = spec.args.join(", "),
            returns = spec.returns,
        );
        let prompt = format!("{SYSTEM_PROMPT}\n\nUSER: {request}\n\nASSISTANT:\ndef");

        let raw = self
            .llm
            .generate(&prompt, Some(&self.preferred_model))
            .await?;
        let code = complete_definition(strip_code_fences(&raw));
        if code.is_empty() {
            return Err(SuperMeanError::ToolCreation("Empty code generated".into()));
        }

        let module = parse(&code)
            .map_err(|e| SuperMeanError::ToolCreation(format!("Invalid syntax: {e}")))?;
        let count = module.functions().count();
        if count != 1 {
            return Err(SuperMeanError::ToolCreation(format!(
                "Expected exactly one function definition, found {count}"
            )));
        }

        debug!(key = %&key[..8], lines = code.lines().count(), "Caching generated tool code");
        self.cache.lock().insert(key, code.clone());
        Ok(code)
    }
}

/// The prompt ends with `def`, so replies usually continue from there.
fn complete_definition(code: &str) -> String {
    let code = code.trim();
    if code.is_empty() {
        return String::new();
    }
    let starts_ok = ["def ", "async def ", "import ", "from "]
        .iter()
        .any(|p| code.starts_with(p));
    if starts_ok {
        code.to_string()
    } else {
        format!("def {code}")
    }
}

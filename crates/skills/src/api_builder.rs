//! Built-in `api.build` skill: scaffolds CRUD endpoints for one resource.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use supermean_common::{ContextMap, Result, Skill, SkillMetadata, SuperMeanError};
use supermean_llm::TextGenerator;
use tracing::{info, warn};

use crate::code_writer::strip_code_fence;

pub const API_BUILD_SKILL: &str = "api.build";

const DEFAULT_RESOURCE: &str = "item";

pub struct ApiBuilderSkill {
    llm: Arc<dyn TextGenerator>,
    model_preference: Option<String>,
}

impl ApiBuilderSkill {
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
        SkillMetadata::new("Scaffold a CRUD API (schemas, router, endpoints) for a described resource")
            .with_args(["description", "resource_name", "fields"])
            .with_returns("str")
            .with_category("code")
    }

    fn prompt(description: &str, resource: &str, fields: &[(String, String)]) -> String {
        let class_name = capitalize(resource);
        let collection = format!("{}s", resource.to_lowercase());
        let field_lines = if fields.is_empty() {
            "    (choose suitable fields)".to_string()
        } else {
            fields
                .iter()
                .map(|(name, ty)| format!("    {name}: {ty}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "You are an expert API developer. Generate the code for a basic CRUD API \
             for a resource named '{resource}'.\n\n\
             TASK DESCRIPTION:\n{description}\n\n\
             RESOURCE DETAILS:\n\
             - Resource name: {resource}\n\
             - Class name: {class_name}\n\
             - Fields and types:\n{field_lines}\n\n\
             REQUIREMENTS:\n\
             1. Schemas {class_name}Base, {class_name}Create and {class_name} (with an id).\n\
             2. A router tagged '{collection}' over simple in-memory storage with an id counter.\n\
             3. Endpoints: POST /{collection}/, GET /{collection}/ (skip and limit), \
             GET, PUT and DELETE /{collection}/{{item_id}} with 404 handling.\n\
             4. All necessary imports.\n\
             Reply with the complete code only, without explanations."
        )
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// `fields` as `(name, type)` pairs; non-string types are rendered as JSON.
fn field_pairs(value: Option<&Value>) -> Result<Vec<(String, String)>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(name, ty)| {
                let ty = match ty {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), ty)
            })
            .collect()),
        Some(other) => Err(SuperMeanError::skill(
            API_BUILD_SKILL,
            format!("fields must be an object of name to type, got {other}"),
        )),
    }
}

#[async_trait]
impl Skill for ApiBuilderSkill {
    async fn call(&self, args: &ContextMap) -> Result<Value> {
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| SuperMeanError::skill(API_BUILD_SKILL, "no API description given"))?;
        let resource = args
            .get("resource_name")
            .and_then(Value::as_str)
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_RESOURCE);
        let fields = field_pairs(args.get("fields"))?;

        info!(resource, fields = fields.len(), "Generating API scaffold");
        let reply = self
            .llm
            .generate(
                &Self::prompt(description, resource, &fields),
                self.model_preference.as_deref(),
            )
            .await
            .map_err(|e| SuperMeanError::skill(API_BUILD_SKILL, format!("API Builder skill failed: {e}")))?;

        let code = strip_code_fence(&reply);
        if code.is_empty() {
            warn!(resource, "Model returned no API code");
            return Err(SuperMeanError::skill(
                API_BUILD_SKILL,
                "LLM returned an empty response for API generation",
            ));
        }
        Ok(json!({"status": "success", "resource": resource, "code": code}))
    }
}

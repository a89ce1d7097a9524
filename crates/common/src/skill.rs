//! The skill capability: a named, invokable function.

use crate::{ContextMap, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named capability that a plan step can invoke with keyword arguments.
///
/// Failures should be reported as [`crate::SuperMeanError::Skill`] so callers
/// can tell them apart from infrastructure errors.
#[async_trait]
pub trait Skill: Send + Sync {
    async fn call(&self, args: &ContextMap) -> Result<Value>;
}

/// Descriptive data stored next to each registered skill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillMetadata {
    #[serde(default)]
    pub description: String,

    /// Argument names, in declaration order.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,

    /// Free-form tag such as `"builtin"` or `"generated"`.
    #[serde(default)]
    pub category: String,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: Value,
}

impl SkillMetadata {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_returns(mut self, returns: impl Into<String>) -> Self {
        self.returns = Some(returns.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

/// Something that can run skills by name. The skill registry implements
/// this; the builder only depends on the trait.
#[async_trait]
pub trait SkillExecutor: Send + Sync {
    fn has_skill(&self, name: &str) -> bool;

    async fn execute(&self, name: &str, args: &ContextMap) -> Result<Value>;

    /// `(name, description)` of every skill currently available, sorted by
    /// name.
    fn describe_skills(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

//! The skill registry: named skills plus their metadata and call metrics.
//!
//! The registry is an ordinary value passed to whoever needs it, so tests and
//! concurrent missions can each hold their own.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use supermean_common::{ContextMap, Result, Skill, SkillExecutor, SkillMetadata, SuperMeanError};
use tracing::{debug, info, warn};

/// Call counters for one skill.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SkillMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

impl SkillMetrics {
    pub fn average_duration_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.calls as f64
        }
    }
}

struct Entry {
    skill: Arc<dyn Skill>,
    metadata: SkillMetadata,
    metrics: SkillMetrics,
}

#[derive(Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Entry>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill. Fails if the name is already taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        skill: Arc<dyn Skill>,
        metadata: SkillMetadata,
    ) -> Result<()> {
        let name = name.into();
        let mut skills = self.skills.write();
        if skills.contains_key(&name) {
            return Err(SuperMeanError::skill(&name, "a skill with this name is already registered"));
        }
        info!(skill = %name, category = %metadata.category, "Registered skill");
        skills.insert(
            name,
            Entry {
                skill,
                metadata,
                metrics: SkillMetrics::default(),
            },
        );
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.skills.write().remove(name).is_some();
        if removed {
            info!(skill = %name, "Unregistered skill");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills.read().contains_key(name)
    }

    /// Skill names, sorted, optionally limited to one metadata category.
    pub fn list_skills(&self, category: Option<&str>) -> Vec<String> {
        let skills = self.skills.read();
        let mut names: Vec<String> = skills
            .iter()
            .filter(|(_, e)| category.is_none_or(|c| e.metadata.category == c))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn get_skill_metadata(&self, name: &str) -> Option<SkillMetadata> {
        self.skills.read().get(name).map(|e| e.metadata.clone())
    }

    pub fn get_skill_metrics(&self, name: &str) -> Option<SkillMetrics> {
        self.skills.read().get(name).map(|e| e.metrics.clone())
    }

    fn record(&self, name: &str, started: Instant, failed: bool) {
        if let Some(entry) = self.skills.write().get_mut(name) {
            entry.metrics.calls += 1;
            entry.metrics.total_duration_ms += started.elapsed().as_millis() as u64;
            if failed {
                entry.metrics.failures += 1;
            }
        }
    }

    /// Run a skill by name.
    ///
    /// Every failure comes back as [`SuperMeanError::Skill`], except security
    /// violations, which are passed through as-is.
    pub async fn execute(&self, name: &str, args: &ContextMap) -> Result<Value> {
        let skill = self
            .skills
            .read()
            .get(name)
            .map(|e| e.skill.clone())
            .ok_or_else(|| SuperMeanError::skill(name, format!("Skill '{name}' not found.")))?;

        debug!(skill = %name, args = ?args.keys().collect::<Vec<_>>(), "Executing skill");
        let started = Instant::now();
        let outcome = skill.call(args).await;
        self.record(name, started, outcome.is_err());

        outcome.map_err(|e| match e {
            SuperMeanError::Skill { .. } | SuperMeanError::Security(_) => e,
            other => {
                warn!(skill = %name, error = %other, "Skill execution failed");
                SuperMeanError::skill(name, format!("Execution failed for skill '{name}': {other}"))
            }
        })
    }
}

#[async_trait]
impl SkillExecutor for SkillRegistry {
    fn has_skill(&self, name: &str) -> bool {
        self.contains(name)
    }

    async fn execute(&self, name: &str, args: &ContextMap) -> Result<Value> {
        SkillRegistry::execute(self, name, args).await
    }

    fn describe_skills(&self) -> Vec<(String, String)> {
        let skills = self.skills.read();
        let mut described: Vec<(String, String)> = skills
            .iter()
            .map(|(name, e)| (name.clone(), e.metadata.description.clone()))
            .collect();
        described.sort();
        described
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FnSkill;
    use serde_json::json;

    fn upper() -> Arc<dyn Skill> {
        Arc::new(FnSkill::new(|args: ContextMap| async move {
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        }))
    }

    fn broken() -> Arc<dyn Skill> {
        Arc::new(FnSkill::new(|_args: ContextMap| async move {
            Err(SuperMeanError::Agent("backend exploded".into()))
        }))
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = SkillRegistry::new();
        registry
            .register("text.upper", upper(), SkillMetadata::new("Uppercase text"))
            .unwrap();

        let mut args = ContextMap::new();
        args.insert("text".into(), json!("hello"));
        let out = registry.execute("text.upper", &args).await.unwrap();
        assert_eq!(out, json!("HELLO"));

        let metrics = registry.get_skill_metrics("text.upper").unwrap();
        assert_eq!(metrics.calls, 1);
        assert_eq!(metrics.failures, 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = SkillRegistry::new();
        registry.register("a.b", upper(), SkillMetadata::default()).unwrap();
        assert!(registry.register("a.b", upper(), SkillMetadata::default()).is_err());
    }

    #[tokio::test]
    async fn test_missing_skill_is_typed_error() {
        let registry = SkillRegistry::new();
        let err = registry.execute("nope", &ContextMap::new()).await.unwrap_err();
        match err {
            SuperMeanError::Skill { skill, message } => {
                assert_eq!(skill, "nope");
                assert_eq!(message, "Skill 'nope' not found.");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn test_foreign_errors_become_skill_errors() {
        let registry = SkillRegistry::new();
        registry.register("x.broken", broken(), SkillMetadata::default()).unwrap();
        let err = registry.execute("x.broken", &ContextMap::new()).await.unwrap_err();
        assert!(matches!(err, SuperMeanError::Skill { .. }));
        assert!(err.to_string().contains("backend exploded"));
        assert_eq!(registry.get_skill_metrics("x.broken").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_security_errors_pass_through() {
        let registry = SkillRegistry::new();
        let guarded: Arc<dyn Skill> = Arc::new(FnSkill::new(|_args: ContextMap| async move {
            Err(SuperMeanError::Security("path traversal".into()))
        }));
        registry.register("fs.read", guarded, SkillMetadata::default()).unwrap();
        let err = registry.execute("fs.read", &ContextMap::new()).await.unwrap_err();
        assert!(err.is_security_violation());
    }

    #[test]
    fn test_list_by_category_and_unregister() {
        let registry = SkillRegistry::new();
        registry
            .register("web.search", upper(), SkillMetadata::new("").with_category("builtin"))
            .unwrap();
        registry
            .register("ui.display", upper(), SkillMetadata::new("").with_category("generated"))
            .unwrap();

        assert_eq!(registry.list_skills(None), vec!["ui.display", "web.search"]);
        assert_eq!(registry.list_skills(Some("generated")), vec!["ui.display"]);
        assert!(registry.unregister("ui.display"));
        assert!(!registry.contains("ui.display"));
        assert!(registry.get_skill_metadata("web.search").is_some());
    }

    #[test]
    fn test_describe_skills_follows_registrations() {
        let registry = SkillRegistry::new();
        registry
            .register("text.upper", upper(), SkillMetadata::new("Uppercase text"))
            .unwrap();
        registry
            .register("api.build", upper(), SkillMetadata::new("Scaffold an API"))
            .unwrap();
        assert_eq!(
            SkillExecutor::describe_skills(&registry),
            vec![
                ("api.build".to_string(), "Scaffold an API".to_string()),
                ("text.upper".to_string(), "Uppercase text".to_string()),
            ]
        );
        registry.unregister("api.build");
        assert_eq!(SkillExecutor::describe_skills(&registry).len(), 1);
    }
}

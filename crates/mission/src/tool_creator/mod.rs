//! Runtime tool creation.
//!
//! A tool request goes through a fixed pipeline; each stage gates the next
//! and the first failure ends the attempt with a report instead of an error:
//!
//! ```text
//! exists? ─► generate ─► quality ─► sanitize + structure ─► load ─► smoke test ─► wrap ─► register
//!            (cached)    (score)    (rewrite, reject)      (sandbox) (optional)   (policy)
//! ```

pub mod generator;
pub mod quality;
pub mod sanitizer;
pub mod secure;
pub mod smoke_test;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use supermean_common::SkillMetadata;
use supermean_llm::TextGenerator;
use supermean_sandbox::{CodeFacts, Module, Sandbox, analyze, parse};
use supermean_skills::SkillRegistry;
use tracing::{info, warn};

use crate::config::ToolCreatorConfig;
pub use generator::CodeGenerator;
pub use quality::QualityMetrics;
pub use secure::{SecureTool, SecurityPolicy};

/// What the meta-planner asks to be built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Namespaced name, e.g. `text.word_stats`.
    pub skill_name: String,
    pub description: String,
    /// Argument names; every argument is passed as a string.
    #[serde(alias = "required_args")]
    pub args: Vec<String>,
    /// Expected return annotation, e.g. `str` or `dict`.
    #[serde(alias = "return_type")]
    pub returns: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCreationStage {
    Existence,
    Generation,
    Quality,
    Sanitization,
    Load,
    RuntimeCheck,
    Registration,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestCoverage {
    Passed,
    Skipped,
}

/// Outcome of one tool creation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCreationReport {
    pub success: bool,
    pub skill_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last stage reached; the failing one when `success` is false.
    pub stage: ToolCreationStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_coverage: Option<TestCoverage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ToolCreationReport {
    fn started(spec: &ToolSpec) -> Self {
        Self {
            success: false,
            skill_name: spec.skill_name.clone(),
            description: spec.description.clone(),
            error: None,
            stage: ToolCreationStage::Existence,
            quality_metrics: None,
            test_coverage: None,
            code: None,
        }
    }

    fn fail(mut self, stage: ToolCreationStage, error: impl Into<String>) -> Self {
        let error = error.into();
        warn!(skill = %self.skill_name, ?stage, error = %error, "Tool creation failed");
        self.stage = stage;
        self.error = Some(error);
        self
    }
}

pub struct ToolCreator {
    generator: CodeGenerator,
    registry: Arc<SkillRegistry>,
    config: ToolCreatorConfig,
}

impl ToolCreator {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        registry: Arc<SkillRegistry>,
        config: ToolCreatorConfig,
    ) -> Self {
        Self {
            generator: CodeGenerator::new(llm, config.preferred_model.clone()),
            registry,
            config,
        }
    }

    pub fn generator(&self) -> &CodeGenerator {
        &self.generator
    }

    /// Create a tool using the configured runtime-check and quality settings.
    pub async fn create_tool(&self, spec: &ToolSpec) -> ToolCreationReport {
        self.create_tool_with(
            spec,
            self.config.skip_runtime_checks,
            self.config.quality_threshold,
        )
        .await
    }

    pub async fn create_tool_with(
        &self,
        spec: &ToolSpec,
        skip_runtime_checks: bool,
        quality_threshold: f64,
    ) -> ToolCreationReport {
        use ToolCreationStage as Stage;

        info!(skill = %spec.skill_name, args = ?spec.args, returns = %spec.returns, "Creating tool");
        let mut report = ToolCreationReport::started(spec);

        if self.registry.contains(&spec.skill_name) {
            return report.fail(Stage::Existence, "Skill already exists");
        }

        let code = match self.generator.generate(spec).await {
            Ok(code) => code,
            Err(e) => return report.fail(Stage::Generation, format!("Code generation failed: {e}")),
        };
        report.code = Some(code.clone());

        let facts = match parse(&code) {
            Ok(module) => analyze(&module),
            Err(e) => return report.fail(Stage::Quality, format!("Code analysis failed: {e}")),
        };
        let metrics = QualityMetrics::from_facts(&facts);
        let overall = metrics.overall_score;
        report.quality_metrics = Some(metrics);
        if overall < quality_threshold {
            return report.fail(Stage::Quality, "Generated code does not meet quality standards");
        }

        let (code, violations) = sanitizer::sanitize(&code);
        report.code = Some(code.clone());
        if !violations.is_empty() {
            let listed: Vec<String> = violations.iter().map(ToString::to_string).collect();
            return report.fail(
                Stage::Sanitization,
                format!("Security violation: {}", listed.join("; ")),
            );
        }
        let module = match parse(&code) {
            Ok(module) => module,
            Err(e) => return report.fail(Stage::Sanitization, format!("Invalid syntax: {e}")),
        };
        if let Err(reason) = validate_structure(&module, &analyze(&module), spec) {
            return report.fail(Stage::Sanitization, reason);
        }

        let sandbox = Sandbox::new(self.config.limits.resources.clone());
        let function = match sandbox.load(&code) {
            Ok(f) => f,
            Err(e) => return report.fail(Stage::Load, format!("Code execution failed: {e}")),
        };

        if skip_runtime_checks {
            report.test_coverage = Some(TestCoverage::Skipped);
        } else {
            match smoke_test::run(&function, &spec.args).await {
                Ok(smoke) if smoke.passed() => report.test_coverage = Some(TestCoverage::Passed),
                Ok(smoke) => {
                    return report.fail(
                        Stage::RuntimeCheck,
                        format!("Runtime issues detected: {}", smoke.failure_issues().join("; ")),
                    );
                }
                Err(e) => return report.fail(Stage::RuntimeCheck, e.to_string()),
            }
        }

        let tool = SecureTool::new(
            spec.skill_name.clone(),
            function,
            SecurityPolicy::from(&self.config.limits),
        );
        let metadata = SkillMetadata::new(spec.description.clone())
            .with_args(spec.args.iter().cloned())
            .with_returns(spec.returns.clone())
            .with_category("generated")
            .with_extra(json!({
                "quality": report.quality_metrics,
                "test_coverage": report.test_coverage,
                "is_async": tool_is_async(&module),
            }));

        if let Err(e) = self
            .registry
            .register(spec.skill_name.clone(), Arc::new(tool), metadata)
        {
            return report.fail(Stage::Registration, format!("Tool registration failed: {e}"));
        }

        info!(skill = %spec.skill_name, quality = overall, "Tool created and registered");
        report.success = true;
        report.stage = Stage::Complete;
        report
    }
}

fn tool_is_async(module: &Module) -> bool {
    module.functions().next().is_some_and(|f| f.is_async)
}

/// Structural checks on the sanitized source.
fn validate_structure(module: &Module, facts: &CodeFacts, spec: &ToolSpec) -> Result<(), String> {
    if facts.definition_count != 1 {
        return Err(format!(
            "Expected exactly one function definition, found {}",
            facts.definition_count
        ));
    }
    if let Some(import) = facts.imports.iter().find(|m| quality::is_forbidden_import(m)) {
        return Err(format!("Unauthorized import detected: {import}"));
    }
    if let Some(call) = facts.calls.iter().find(|c| quality::is_forbidden_name(c)) {
        return Err(format!("Unauthorized call detected: {call}"));
    }
    if let Some(declared) = &facts.return_annotation {
        if declared.trim() != spec.returns.trim() {
            return Err(format!("Return type mismatch. Expected {}", spec.returns));
        }
    }
    let params: Vec<String> = module
        .functions()
        .next()
        .map(|f| f.param_names())
        .unwrap_or_default();
    let missing: Vec<&str> = spec
        .args
        .iter()
        .filter(|a| !params.contains(a))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "Function does not accept required arguments: {}",
            missing.join(", ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(returns: &str, args: &[&str]) -> ToolSpec {
        ToolSpec {
            skill_name: "text.t".into(),
            description: "d".into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            returns: returns.into(),
        }
    }

    fn check(source: &str, spec: &ToolSpec) -> Result<(), String> {
        let module = parse(source).unwrap();
        let facts = analyze(&module);
        validate_structure(&module, &facts, spec)
    }

    #[test]
    fn test_tool_spec_aliases() {
        let s: ToolSpec = serde_json::from_str(
            r#"{"skill_name": "a.b", "description": "d", "required_args": ["x"], "return_type": "str"}"#,
        )
        .unwrap();
        assert_eq!(s.skill_name, "a.b");
        assert_eq!(s.args, vec!["x"]);
        assert_eq!(s.returns, "str");
    }

    #[test]
    fn test_structure_checks() {
        assert!(check("def f(x: str) -> str:\n    return x\n", &spec("str", &["x"])).is_ok());
        assert!(check("def f(x: str):\n    return x\n", &spec("str", &["x"])).is_ok());

        assert_eq!(
            check("def f(x: str) -> int:\n    return 1\n", &spec("str", &["x"])).unwrap_err(),
            "Return type mismatch. Expected str"
        );
        assert!(
            check(
                "def f(x):\n    def g(y):\n        return y\n    return g(x)\n",
                &spec("str", &["x"])
            )
            .unwrap_err()
            .contains("found 2")
        );
        assert!(
            check("def f(x):\n    return compile(x)\n", &spec("str", &["x"]))
                .unwrap_err()
                .contains("compile")
        );
        assert!(
            check("import sys\n\ndef f(x):\n    return x\n", &spec("str", &["x"]))
                .unwrap_err()
                .contains("sys")
        );
        assert_eq!(
            check("import socket.io\n\ndef f(x):\n    return x\n", &spec("str", &["x"]))
                .unwrap_err(),
            "Unauthorized import detected: socket.io"
        );
        assert_eq!(
            check("def f(text):\n    return text\n", &spec("str", &["text", "mode"])).unwrap_err(),
            "Function does not accept required arguments: mode"
        );
    }

    #[test]
    fn test_report_serialization() {
        let report = ToolCreationReport::started(&spec("str", &["x"]))
            .fail(ToolCreationStage::Quality, "Generated code does not meet quality standards");
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["stage"], "quality");
        assert!(value.get("code").is_none());
        assert_eq!(
            serde_json::to_value(TestCoverage::Passed).unwrap(),
            json!("Passed")
        );
    }
}

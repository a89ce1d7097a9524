//! Static quality score for generated tool code.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use supermean_sandbox::CodeFacts;

const COMPLEXITY_WEIGHT: f64 = 0.25;
const SECURITY_WEIGHT: f64 = 0.35;
const TYPE_SAFETY_WEIGHT: f64 = 0.25;
const ERROR_HANDLING_WEIGHT: f64 = 0.15;

/// Modules generated tools must not import.
pub const FORBIDDEN_IMPORTS: &[&str] = &["os", "subprocess", "sys", "shutil", "socket"];

/// Names generated tools must not reference.
pub const FORBIDDEN_NAMES: &[&str] = &["eval", "exec", "__import__", "open", "compile"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub complexity_score: f64,
    pub security_score: f64,
    pub type_safety_score: f64,
    pub error_handling_score: f64,
    pub overall_score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl QualityMetrics {
    pub fn from_facts(facts: &CodeFacts) -> Self {
        let mut issues = Vec::new();

        // Complexity up to 5 scores full marks; 20 and above scores zero.
        let complexity_score = (1.0 - (facts.average_complexity - 5.0) / 15.0).clamp(0.0, 1.0);
        if facts.average_complexity > 10.0 {
            issues.push(format!(
                "High cyclomatic complexity ({:.1})",
                facts.average_complexity
            ));
        }

        let offending: BTreeSet<&str> = facts
            .imports
            .iter()
            .map(String::as_str)
            .filter(|m| is_forbidden_import(m))
            .chain(
                facts
                    .names
                    .iter()
                    .map(String::as_str)
                    .filter(|n| is_forbidden_name(n) || is_forbidden_import(n)),
            )
            .collect();
        let security_score = (1.0 - 0.5 * offending.len() as f64).max(0.0);
        for name in &offending {
            issues.push(format!("Uses restricted name '{name}'"));
        }

        let annotated = facts.params_annotated + usize::from(facts.has_return_annotation);
        let type_safety_score = annotated as f64 / (facts.params_total + 1) as f64;
        if !facts.has_return_annotation {
            issues.push("Missing return type annotation".into());
        }

        let error_handling_score = match (facts.raise_count > 0, facts.try_count > 0) {
            (true, true) => 1.0,
            (true, false) | (false, true) => 0.7,
            (false, false) => 0.3,
        };
        if facts.raise_count == 0 {
            issues.push("No input validation (never raises)".into());
        }

        let overall_score = COMPLEXITY_WEIGHT * complexity_score
            + SECURITY_WEIGHT * security_score
            + TYPE_SAFETY_WEIGHT * type_safety_score
            + ERROR_HANDLING_WEIGHT * error_handling_score;

        Self {
            complexity_score,
            security_score,
            type_safety_score,
            error_handling_score,
            overall_score,
            issues,
        }
    }
}

fn root(dotted: &str) -> &str {
    dotted.split('.').next().unwrap_or(dotted)
}

/// Whether importing `module` (or any submodule of it) is forbidden.
pub fn is_forbidden_import(module: &str) -> bool {
    FORBIDDEN_IMPORTS.contains(&root(module))
}

/// Whether calling or naming `name` is forbidden.
pub fn is_forbidden_name(name: &str) -> bool {
    FORBIDDEN_NAMES.contains(&name)
}

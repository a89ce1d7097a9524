//! Runtime smoke test for a freshly loaded tool.
//!
//! The tool is called with a few representative inputs. Returning a value
//! counts as the success path; raising a validation-style exception counts
//! as the input-validation path. Missing names, unsupported syntax and
//! exhausted budgets are defects.

use serde_json::{Map, Value};
use supermean_common::{Result, SuperMeanError};
use supermean_sandbox::{SandboxError, SandboxedFunction};
use tracing::debug;

const SAMPLE_VALUES: &[&str] = &["test_value", "42", ""];

/// Exception kinds that mean the code itself is broken rather than that it
/// rejected its input.
const DEFECT_KINDS: &[&str] = &["NameError", "AttributeError", "ImportError"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SmokeReport {
    pub successes: usize,
    pub validations: usize,
    pub issues: Vec<String>,
}

impl SmokeReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty() && (self.successes > 0 || self.validations > 0)
    }

    /// Issues to report when the test did not pass.
    pub fn failure_issues(&self) -> Vec<String> {
        if !self.issues.is_empty() {
            return self.issues.clone();
        }
        vec!["Neither a success path nor an input-validation path was observed".into()]
    }
}

/// Call the tool with each sample input. Each call blocks for at most the
/// tool's wall-time limit, so they run on the blocking pool.
pub async fn run(function: &SandboxedFunction, args: &[String]) -> Result<SmokeReport> {
    let function = function.clone();
    let args = args.to_vec();
    tokio::task::spawn_blocking(move || exercise(&function, &args))
        .await
        .map_err(|e| SuperMeanError::ToolCreation(format!("Runtime verification failed: {e}")))
}

fn exercise(function: &SandboxedFunction, args: &[String]) -> SmokeReport {
    let mut report = SmokeReport::default();
    let cases: Vec<Map<String, Value>> = if args.is_empty() {
        vec![Map::new()]
    } else {
        SAMPLE_VALUES
            .iter()
            .map(|v| {
                args.iter()
                    .map(|a| (a.clone(), Value::String((*v).to_string())))
                    .collect()
            })
            .collect()
    };

    for case in &cases {
        let outcome = function.call(case);
        debug!(tool = function.name(), input = ?case, ok = outcome.is_ok(), "Smoke test call");
        match outcome {
            Ok(_) => report.successes += 1,
            Err(SandboxError::Raised { kind, message }) if !DEFECT_KINDS.contains(&kind.as_str()) => {
                debug!(kind = %kind, message = %message, "Tool rejected sample input");
                report.validations += 1;
            }
            Err(e) => report
                .issues
                .push(format!("Failed with input {}: {e}", Value::Object(case.clone()))),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use supermean_sandbox::{ResourceLimits, Sandbox};

    async fn smoke(source: &str, args: &[&str]) -> SmokeReport {
        let function = Sandbox::new(ResourceLimits {
            max_operations: 10_000,
            ..Default::default()
        })
        .load(source)
        .unwrap();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        run(&function, &args).await.unwrap()
    }

    #[tokio::test]
    async fn test_validating_tool_passes() {
        let report = smoke(
            "def double(n: str) -> int:\n    if not n:\n        raise ValueError(\"empty\")\n    return int(n) * 2\n",
            &["n"],
        )
        .await;
        // "42" succeeds; "test_value" and "" raise ValueError.
        assert_eq!(report.successes, 1);
        assert_eq!(report.validations, 2);
        assert!(report.passed());
    }

    #[tokio::test]
    async fn test_missing_name_is_a_defect() {
        let report = smoke("def f(x: str) -> str:\n    return helper(x)\n", &["x"]).await;
        assert_eq!(report.issues.len(), 3);
        assert!(report.issues[0].contains("NameError"));
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn test_runaway_loop_is_a_defect() {
        let report = smoke("def f(x: str) -> str:\n    while True:\n        x = x\n", &["x"]).await;
        assert!(!report.passed());
        assert!(report.issues[0].contains("resource limit"));
    }

    #[tokio::test]
    async fn test_no_argument_tool() {
        let report = smoke("def pi() -> float:\n    return 3.14\n", &[]).await;
        assert_eq!(report.successes, 1);
        assert!(report.passed());
    }
}

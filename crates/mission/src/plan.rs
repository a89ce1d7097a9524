//! Data exchanged between the planner, builder, evaluator and meta-planner.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::tool_creator::ToolSpec;

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Unique positive id; steps run in ascending id order.
    pub step_id: i64,
    pub action_description: String,
    /// Names looked up in the initial context and in earlier step outputs.
    pub required_inputs: Vec<String>,
    /// Name this step's result is published under.
    pub expected_output: String,
    /// Agent name or skill name.
    pub suggested_executor: String,
}

/// Steps sorted by `step_id`.
pub type Plan = Vec<Step>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// What a builder run produced. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Output of every step that completed, keyed by step id.
    pub step_outputs: BTreeMap<i64, Value>,
    /// `(step_id, error)` for the step that stopped execution.
    pub failed_steps: Vec<(i64, String)>,
    /// Output of the last step that completed.
    pub final_result: Option<Value>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// The step that stopped execution and its error text.
    pub fn failure(&self) -> Option<(i64, &str)> {
        self.failed_steps
            .first()
            .map(|(id, err)| (*id, err.as_str()))
    }

    /// One-line description of the failure, for prompts and evaluations.
    pub fn failure_summary(&self) -> String {
        match self.failure() {
            Some((id, err)) => format!("Plan execution failed at step {id}: {err}"),
            None => "Plan execution failed at step unknown: Unknown error".to_string(),
        }
    }
}

/// Step counts and timing, computed without the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub success_rate: f64,
    pub duration_ms: u64,
    pub timestamp_ms: u64,
}

impl ExecutionMetrics {
    pub fn compute(plan: &[Step], result: &ExecutionResult) -> Self {
        let total_steps = plan.len();
        let completed_steps = result.step_outputs.len();
        Self {
            total_steps,
            completed_steps,
            failed_steps: result.failed_steps.len(),
            success_rate: if total_steps > 0 {
                completed_steps as f64 / total_steps as f64
            } else {
                0.0
            },
            duration_ms: result.duration_ms,
            timestamp_ms: supermean_common::now_millis(),
        }
    }
}

/// The evaluator's verdict on one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub overall_success: bool,
    /// Always within `[0, 1]`.
    pub score: f64,
    pub reasoning: String,
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ExecutionMetrics>,
    #[serde(default)]
    pub validation_passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_issues: Vec<String>,
}

/// The meta-planner's fixed decision vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    RevisePlan,
    CreateTool,
    RetryStep,
    FinalSuccess,
    FinalFailure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RevisePlan => "REVISE_PLAN",
            Self::CreateTool => "CREATE_TOOL",
            Self::RetryStep => "RETRY_STEP",
            Self::FinalSuccess => "FINAL_SUCCESS",
            Self::FinalFailure => "FINAL_FAILURE",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::FinalSuccess | Self::FinalFailure)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outcome together with the data it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    RevisePlan,
    CreateTool(ToolSpec),
    RetryStep { step_id: i64 },
    FinalSuccess,
    FinalFailure,
}

impl Decision {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::RevisePlan => Outcome::RevisePlan,
            Self::CreateTool(_) => Outcome::CreateTool,
            Self::RetryStep { .. } => Outcome::RetryStep,
            Self::FinalSuccess => Outcome::FinalSuccess,
            Self::FinalFailure => Outcome::FinalFailure,
        }
    }

    /// The JSON payload recorded in mission history.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::CreateTool(spec) => serde_json::to_value(spec).ok(),
            Self::RetryStep { step_id } => Some(json!({ "retry_step_id": step_id })),
            _ => None,
        }
    }
}

//! Mission state: the aggregate persisted after every iteration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use supermean_common::ContextMap;

use crate::plan::{Evaluation, ExecutionResult, Outcome, Plan};
use crate::tool_creator::ToolCreationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Planning,
    Building,
    Evaluating,
    Deciding,
    RevisePlan,
    CreateTool,
    RetryStep,
    FinalSuccess,
    FinalFailure,
    Failed,
    Stopped,
}

impl MissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FinalSuccess | Self::FinalFailure | Self::Failed | Self::Stopped
        )
    }

    /// Statuses a persisted mission can be in while its loop is still going.
    pub fn is_running(self) -> bool {
        !self.is_terminal()
    }
}

impl From<Outcome> for MissionStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::RevisePlan => Self::RevisePlan,
            Outcome::CreateTool => Self::CreateTool,
            Outcome::RetryStep => Self::RetryStep,
            Outcome::FinalSuccess => Self::FinalSuccess,
            Outcome::FinalFailure => Self::FinalFailure,
        }
    }
}

/// Everything that happened in one loop pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub execution_result: Option<ExecutionResult>,
    #[serde(default)]
    pub evaluation: Option<Evaluation>,
    #[serde(default)]
    pub decision: Option<Outcome>,
    #[serde(default)]
    pub decision_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_creation: Option<ToolCreationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time_ms: u64,
}

impl IterationRecord {
    pub fn new(iteration: u32, start_time_ms: u64) -> Self {
        Self {
            iteration,
            plan: None,
            execution_result: None,
            evaluation: None,
            decision: None,
            decision_data: None,
            tool_creation: None,
            error: None,
            start_time_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionState {
    pub mission_id: String,
    pub goal: String,
    #[serde(default)]
    pub initial_context: ContextMap,
    pub status: MissionStatus,
    #[serde(default)]
    pub history: Vec<IterationRecord>,
    #[serde(default)]
    pub final_result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub start_time_ms: u64,
    #[serde(default)]
    pub end_time_ms: Option<u64>,
}

impl MissionState {
    pub fn new(
        mission_id: impl Into<String>,
        goal: impl Into<String>,
        initial_context: ContextMap,
        start_time_ms: u64,
    ) -> Self {
        Self {
            mission_id: mission_id.into(),
            goal: goal.into(),
            initial_context,
            status: MissionStatus::Planning,
            history: Vec::new(),
            final_result: None,
            error: None,
            start_time_ms,
            end_time_ms: None,
        }
    }

    /// Phases that appear anywhere in the history, first occurrence order.
    pub fn phases_completed(&self) -> Vec<&'static str> {
        let mut phases = Vec::new();
        for record in &self.history {
            let seen = [
                (record.plan.is_some(), "planning"),
                (record.execution_result.is_some(), "building"),
                (record.evaluation.is_some(), "evaluating"),
                (record.decision.is_some(), "deciding"),
            ];
            for (present, phase) in seen {
                if present && !phases.contains(&phase) {
                    phases.push(phase);
                }
            }
        }
        phases
    }

    pub fn status_report(&self, max_iterations: u32) -> MissionStatusReport {
        let current_iteration = self.history.len();
        let progress = if max_iterations == 0 {
            100.0
        } else {
            (current_iteration as f64 / f64::from(max_iterations) * 100.0).min(100.0)
        };
        MissionStatusReport {
            mission_id: self.mission_id.clone(),
            goal: self.goal.clone(),
            status: self.status,
            progress,
            phases_completed: self.phases_completed(),
            current_iteration,
            max_iterations,
            final_result: self.final_result.clone(),
            error: self.error.clone(),
            start_time_ms: self.start_time_ms,
            end_time_ms: self.end_time_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionStatusReport {
    pub mission_id: String,
    pub goal: String,
    pub status: MissionStatus,
    /// Percent of the iteration budget used, capped at 100.
    pub progress: f64,
    pub phases_completed: Vec<&'static str>,
    pub current_iteration: usize,
    pub max_iterations: u32,
    pub final_result: Option<Value>,
    pub error: Option<String>,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
}

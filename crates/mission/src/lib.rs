//! SuperMean mission loop.
//!
//! A mission is driven by [`MissionControl`] through repeated iterations:
//!
//! ```text
//!            ┌──────────────────────────────────────────────────────┐
//!            │                                                      │
//!   goal ──► Planner ──► Builder ──► Evaluator ──► MetaPlanner ──┬──┘ REVISE_PLAN
//!               ▲           ▲                                   ├──► RETRY_STEP ──► Builder (resume)
//!               │           │                                   ├──► CREATE_TOOL ─► ToolCreator ─► Planner
//!               │      agents/skills                            └──► FINAL_SUCCESS | FINAL_FAILURE
//!               │
//!         previous plan, evaluation, errors, new tools
//! ```
//!
//! The loop is bounded by `max_planning_iterations`. Every iteration is
//! appended to the mission history and persisted, and lifecycle events are
//! published on the [`EventBus`].

pub mod builder;
pub mod config;
pub mod evaluator;
pub mod events;
pub mod llm_output;
pub mod meta_planner;
pub mod mission_control;
pub mod plan;
pub mod planner;
pub mod state;
pub mod tool_creator;

pub use builder::{Builder, Executable};
pub use config::{
    BuilderConfig, EvaluatorConfig, MetaPlannerConfig, MissionConfig, MissionSettings,
    PlannerConfig, ToolCreatorConfig, ToolLimits,
};
pub use evaluator::{Evaluator, HistoricalAnalysis, Trend};
pub use events::{EventBus, MissionEvent, topics};
pub use meta_planner::MetaPlanner;
pub use mission_control::MissionControl;
pub use plan::{
    Decision, Evaluation, ExecutionMetrics, ExecutionResult, ExecutionStatus, Outcome, Plan, Step,
};
pub use planner::{PlanComplexity, Planner, analyze_plan_complexity};
pub use state::{IterationRecord, MissionState, MissionStatus, MissionStatusReport};
pub use tool_creator::{
    QualityMetrics, TestCoverage, ToolCreationReport, ToolCreationStage, ToolCreator, ToolSpec,
};

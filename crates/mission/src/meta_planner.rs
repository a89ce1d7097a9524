//! The decision step: reflect on an iteration and pick what happens next.

use std::sync::Arc;

use serde_json::Value;
use supermean_common::{InvalidStructure, Result, SuperMeanError};
use supermean_llm::TextGenerator;
use tracing::{debug, info, warn};

use crate::config::MetaPlannerConfig;
use crate::llm_output::{last_line, pretty, preview};
use crate::plan::{Decision, Evaluation, ExecutionResult, Step};
use crate::tool_creator::ToolSpec;

pub struct MetaPlanner {
    llm: Arc<dyn TextGenerator>,
    config: MetaPlannerConfig,
}

impl MetaPlanner {
    pub fn new(llm: Arc<dyn TextGenerator>, config: MetaPlannerConfig) -> Self {
        Self { llm, config }
    }

    /// Decide the next move.
    ///
    /// A successful evaluation (or, without one, a successful execution)
    /// ends the mission without consulting the model.
    pub async fn reflect_and_adapt(
        &self,
        goal: &str,
        plan: &[Step],
        result: &ExecutionResult,
        evaluation: Option<&Evaluation>,
    ) -> Result<Decision> {
        match evaluation {
            Some(eval) if eval.overall_success => {
                info!(score = eval.score, "Evaluation succeeded; finishing");
                return Ok(Decision::FinalSuccess);
            }
            None if result.is_success() => {
                info!("Execution succeeded without evaluation; finishing");
                return Ok(Decision::FinalSuccess);
            }
            _ => {}
        }

        let assessment = match evaluation {
            Some(eval) => pretty(eval),
            None => format!(
                "No evaluation available. {}",
                result.failure_summary()
            ),
        };
        let prompt = build_prompt(goal, plan, result, &assessment);

        let raw = self
            .llm
            .generate(&prompt, Some(&self.config.preferred_model))
            .await
            .map_err(|e| {
                SuperMeanError::meta_planning(
                    format!("LLM interaction failed during meta-planning: {e}"),
                    e,
                )
            })?;
        if raw.trim().is_empty() {
            return Err(SuperMeanError::meta_planning(
                "Meta-Planner LLM returned an empty response.",
                InvalidStructure("empty response".into()),
            ));
        }
        debug!(response = %preview(&raw, 200), "Meta-planner LLM response");

        let decision = parse_decision(&raw);
        info!(outcome = %decision.outcome(), "Meta-planner decided");
        Ok(decision)
    }
}

fn build_prompt(goal: &str, plan: &[Step], result: &ExecutionResult, assessment: &str) -> String {
    format!(
        "You are the meta-planner of an autonomous agent system. Review the attempt below \
         and decide the next action.\n\n\
         Goal: {goal}\n\n\
         Plan:\n{plan}\n\n\
         Execution result:\n{result}\n\n\
         Evaluation:\n{assessment}\n\n\
         Choose exactly one outcome and put it alone on the LAST line of your answer:\n\
         - REVISE_PLAN: the plan needs to change\n\
         - FINAL_SUCCESS: the goal has been achieved\n\
         - FINAL_FAILURE: the goal cannot be achieved\n\
         - CREATE_TOOL: a missing capability should be built; last line is JSON \
           {{\"skill_name\": \"<namespace.name>\", \"description\": \"...\", \"args\": [\"...\"], \"returns\": \"<type>\"}}\n\
         - RETRY_STEP: a step failed transiently; last line is JSON {{\"retry_step_id\": <int>}}",
        plan = pretty(&plan),
        result = pretty(result),
    )
}

/// Read a decision from the last line of a model reply. Anything that is
/// not a recognized outcome becomes [`Decision::RevisePlan`].
pub fn parse_decision(raw: &str) -> Decision {
    let line = last_line(raw).trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == '`');

    if line.starts_with('{') {
        return match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(obj)) => decision_from_json(&obj),
            _ => {
                warn!(line = %line, "Unparseable decision JSON; defaulting to REVISE_PLAN");
                Decision::RevisePlan
            }
        };
    }

    match line.to_ascii_uppercase().as_str() {
        "REVISE_PLAN" => Decision::RevisePlan,
        "FINAL_SUCCESS" => Decision::FinalSuccess,
        "FINAL_FAILURE" => Decision::FinalFailure,
        other => {
            warn!(line = %preview(other, 80), "Unrecognized decision; defaulting to REVISE_PLAN");
            Decision::RevisePlan
        }
    }
}

fn decision_from_json(obj: &serde_json::Map<String, Value>) -> Decision {
    if obj.contains_key("skill_name") || obj.contains_key("description") {
        return match serde_json::from_value::<ToolSpec>(Value::Object(obj.clone())) {
            Ok(spec) if !spec.skill_name.trim().is_empty() => Decision::CreateTool(spec),
            _ => {
                warn!("Incomplete tool spec in decision; defaulting to REVISE_PLAN");
                Decision::RevisePlan
            }
        };
    }
    if let Some(id) = obj.get("retry_step_id") {
        return match id.as_i64() {
            Some(step_id) => Decision::RetryStep { step_id },
            None => {
                warn!(value = %id, "retry_step_id is not an integer; defaulting to REVISE_PLAN");
                Decision::RevisePlan
            }
        };
    }
    warn!("Decision JSON has no known payload; defaulting to REVISE_PLAN");
    Decision::RevisePlan
}

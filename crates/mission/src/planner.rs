//! Goal decomposition: turns a goal into an ordered list of steps.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use supermean_common::{InvalidStructure, KeyValueStore, Result, SuperMeanError};
use supermean_llm::TextGenerator;
use tracing::{debug, error, info, warn};

use crate::config::PlannerConfig;
use crate::llm_output::{parse_json, preview};
use crate::plan::{Plan, Step};

const REQUIRED_KEYS: &[&str] = &[
    "step_id",
    "action_description",
    "required_inputs",
    "expected_output",
    "suggested_executor",
];

static EXTERNAL_INPUT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(initial|project|user|system|external)\s",
        r"(?i)(configuration|settings|parameters|requirements)$",
        r"(?i)^(api|database|file)\s",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Whether an input name looks like something supplied from outside the
/// plan rather than produced by an earlier step.
pub fn is_external_input(name: &str) -> bool {
    EXTERNAL_INPUT_PATTERNS.iter().any(|re| re.is_match(name))
}

pub struct Planner {
    llm: Arc<dyn TextGenerator>,
    memory: Option<Arc<dyn KeyValueStore>>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(llm: Arc<dyn TextGenerator>, config: PlannerConfig) -> Self {
        Self {
            llm,
            memory: None,
            config,
        }
    }

    /// Persist every generated plan to `memory`.
    pub fn with_memory(mut self, memory: Arc<dyn KeyValueStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Ask the model for a plan without advertising any executors.
    pub async fn create_plan(&self, goal: &str, context: Option<&str>) -> Result<Plan> {
        self.create_plan_with(goal, context, &[]).await
    }

    /// Ask the model for a plan and validate it. `executors` are the
    /// `(name, description)` pairs a step may name as its executor.
    ///
    /// Invalid steps are dropped with a warning; the call fails only when
    /// none survive. The result is sorted by `step_id` and capped at
    /// `max_steps`.
    pub async fn create_plan_with(
        &self,
        goal: &str,
        context: Option<&str>,
        executors: &[(String, String)],
    ) -> Result<Plan> {
        info!(goal = %preview(goal, 80), executors = executors.len(), "Generating plan");
        let prompt = self.build_prompt(goal, context, executors);

        let raw = self
            .llm
            .generate(&prompt, Some(&self.config.preferred_model))
            .await
            .map_err(|e| {
                error!(error = %e, "Planner LLM call failed");
                SuperMeanError::planning(format!("LLM interaction failed during planning: {e}"), e)
            })?;
        debug!(response = %preview(&raw, 200), "Planner LLM response");

        let mut plan = parse_plan(&raw)?;
        plan.sort_by_key(|s| s.step_id);

        if plan.len() > self.config.max_steps {
            warn!(
                steps = plan.len(),
                max_steps = self.config.max_steps,
                "Plan exceeds step limit; truncating"
            );
            plan.truncate(self.config.max_steps);
        }

        check_dependencies(&plan);
        info!(steps = plan.len(), "Plan generated");

        if self.config.store_plans {
            self.store_plan(goal, &plan).await;
        }
        Ok(plan)
    }

    async fn store_plan(&self, goal: &str, plan: &Plan) {
        let Some(memory) = &self.memory else {
            return;
        };
        let key = format!("plan_{}", goal.chars().take(50).collect::<String>());
        let value = match serde_json::to_value(plan) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Could not serialize plan for storage");
                return;
            }
        };
        match memory.store(&key, value, json!({ "goal": goal })).await {
            Ok(_) => debug!(key = %key, "Plan stored"),
            Err(e) => warn!(key = %key, error = %e, "Failed to store plan"),
        }
    }

    fn build_prompt(&self, goal: &str, context: Option<&str>, executors: &[(String, String)]) -> String {
        let executors = if executors.is_empty() {
            "- (none registered)".to_string()
        } else {
            executors
                .iter()
                .map(|(name, what)| format!("- {name}: {what}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let context = context
            .filter(|c| !c.trim().is_empty())
            .map(|c| format!("\nContext from previous attempts:\n{c}\n"))
            .unwrap_or_default();

        format!(
            "You are a planning agent. Break the goal below into concrete, ordered steps.\n\n\
             Goal: {goal}\n{context}\n\
             Available executors:\n{executors}\n\n\
             Respond with a JSON list only. Each element must be an object with:\n\
             - \"step_id\": positive integer, unique\n\
             - \"action_description\": what the step does\n\
             - \"required_inputs\": list of input names (from the initial context or earlier steps' expected_output)\n\
             - \"expected_output\": name of the value this step produces\n\
             - \"suggested_executor\": one of the executors above\n\
             Keep the plan to at most {max} steps.",
            max = self.config.max_steps
        )
    }
}

/// Parse and validate a plan from raw model output.
///
/// Accepts a JSON list, optionally fenced. Elements that fail validation are
/// skipped; if none remain the reasons are reported together.
pub fn parse_plan(raw: &str) -> Result<Plan> {
    let value = parse_json(raw).map_err(|e| {
        SuperMeanError::planning(format!("Failed to parse plan JSON from LLM: {e}"), e)
    })?;

    let Value::Array(items) = value else {
        return Err(SuperMeanError::planning(
            "LLM response must be a JSON list",
            InvalidStructure("LLM response must be a JSON list".into()),
        ));
    };

    let mut plan = Vec::with_capacity(items.len());
    let mut seen = HashSet::new();
    let mut problems = Vec::new();

    for (index, item) in items.iter().enumerate() {
        match validate_step(item) {
            Ok(step) if !seen.insert(step.step_id) => {
                problems.push(format!("step {index}: duplicate step_id {}", step.step_id));
            }
            Ok(step) => plan.push(step),
            Err(reason) => problems.push(format!("step {index}: {reason}")),
        }
    }

    for problem in &problems {
        warn!(problem = %problem, "Skipping invalid plan step");
    }

    if plan.is_empty() {
        let reason = if problems.is_empty() {
            "LLM returned an empty plan".to_string()
        } else {
            format!("No valid steps in plan: {}", problems.join("; "))
        };
        return Err(SuperMeanError::planning(
            reason.clone(),
            InvalidStructure(reason),
        ));
    }
    Ok(plan)
}

fn validate_step(item: &Value) -> std::result::Result<Step, String> {
    let obj = item.as_object().ok_or("not a JSON object")?;

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|k| !obj.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing keys: {}", missing.join(", ")));
    }

    let step_id = obj["step_id"]
        .as_i64()
        .ok_or("step_id must be an integer")?;
    if step_id <= 0 {
        return Err(format!("step_id must be positive, got {step_id}"));
    }

    let text = |key: &str| -> std::result::Result<String, String> {
        obj[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("{key} must be a string"))
    };

    let required_inputs = obj["required_inputs"]
        .as_array()
        .ok_or("required_inputs must be a list")?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or("required_inputs must contain only strings")?;

    Ok(Step {
        step_id,
        action_description: text("action_description")?,
        required_inputs,
        expected_output: text("expected_output")?,
        suggested_executor: text("suggested_executor")?,
    })
}

/// Warn about inputs that no earlier step produces and that do not look
/// like external inputs.
fn check_dependencies(plan: &[Step]) {
    let mut produced: HashSet<&str> = HashSet::new();
    for step in plan {
        for input in &step.required_inputs {
            if !produced.contains(input.as_str()) && !is_external_input(input) {
                warn!(
                    step_id = step.step_id,
                    input = %input,
                    "Step requires an input no earlier step produces"
                );
            }
        }
        produced.insert(step.expected_output.as_str());
    }
}

/// Shape of a plan, independent of what the steps do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanComplexity {
    pub total_steps: usize,
    pub distinct_executors: usize,
    /// Inputs satisfied by an earlier step's output.
    pub dependency_count: usize,
    /// Longest chain of steps feeding each other.
    pub max_dependency_depth: usize,
    pub complexity_score: f64,
    /// `"low"`, `"medium"` or `"high"`.
    pub level: &'static str,
    pub executor_usage: BTreeMap<String, usize>,
}

pub fn analyze_plan_complexity(plan: &[Step]) -> PlanComplexity {
    let mut executor_usage = BTreeMap::new();
    let mut producer_depth: HashMap<&str, usize> = HashMap::new();
    let mut dependency_count = 0;
    let mut max_dependency_depth = 0;

    for step in plan {
        *executor_usage
            .entry(step.suggested_executor.clone())
            .or_insert(0) += 1;

        let mut depth = 0;
        for input in &step.required_inputs {
            if let Some(d) = producer_depth.get(input.as_str()) {
                dependency_count += 1;
                depth = depth.max(d + 1);
            }
        }
        max_dependency_depth = max_dependency_depth.max(depth);
        producer_depth.insert(step.expected_output.as_str(), depth);
    }

    let complexity_score =
        plan.len() as f64 + 0.5 * dependency_count as f64 + max_dependency_depth as f64;
    let level = if complexity_score <= 5.0 {
        "low"
    } else if complexity_score <= 12.0 {
        "medium"
    } else {
        "high"
    };

    PlanComplexity {
        total_steps: plan.len(),
        distinct_executors: executor_usage.len(),
        dependency_count,
        max_dependency_depth,
        complexity_score,
        level,
        executor_usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::error::Error as _;

    struct FixedLlm {
        reply: std::result::Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl FixedLlm {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for FixedLlm {
        async fn generate(&self, prompt: &str, _model: Option<&str>) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            self.reply.clone().map_err(|m| SuperMeanError::ModelConnection {
                model: "gemini".into(),
                message: m,
            })
        }
    }

    const TWO_STEPS: &str = r#"```json
[
  {"step_id": 2, "action_description": "Write the code", "required_inputs": ["design"],
   "expected_output": "code", "suggested_executor": "DevAgent"},
  {"step_id": 1, "action_description": "Design it", "required_inputs": ["User Requirements"],
   "expected_output": "design", "suggested_executor": "DesignAgent"}
]
```"#;

    #[tokio::test]
    async fn test_create_plan_sorts_steps() {
        let llm = FixedLlm::ok(TWO_STEPS);
        let planner = Planner::new(llm.clone(), PlannerConfig::default());

        let executors = vec![
            ("DesignAgent".to_string(), "produces UI and visual designs".to_string()),
            ("text.summarize".to_string(), "skill: Summarize text".to_string()),
        ];
        let plan = planner
            .create_plan_with("Build a todo app", Some("earlier attempt failed"), &executors)
            .await
            .unwrap();
        assert_eq!(plan.iter().map(|s| s.step_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(plan[1].required_inputs, vec!["design"]);

        let prompt = llm.prompts.lock()[0].clone();
        assert!(prompt.contains("Build a todo app"));
        assert!(prompt.contains("earlier attempt failed"));
        assert!(prompt.contains("- DesignAgent: produces UI and visual designs"));
        assert!(prompt.contains("- text.summarize: skill: Summarize text"));
        assert!(!prompt.contains("api.build"));

        planner.create_plan("Build a todo app", None).await.unwrap();
        assert!(llm.prompts.lock()[1].contains("- (none registered)"));
    }

    #[tokio::test]
    async fn test_invalid_steps_are_dropped() {
        let raw = r#"[
            {"step_id": 1, "action_description": "ok", "required_inputs": [],
             "expected_output": "a", "suggested_executor": "DevAgent"},
            {"step_id": "two", "action_description": "bad id", "required_inputs": [],
             "expected_output": "b", "suggested_executor": "DevAgent"},
            {"step_id": 3, "action_description": "no executor", "required_inputs": [],
             "expected_output": "c"},
            {"step_id": 1, "action_description": "dup", "required_inputs": [],
             "expected_output": "d", "suggested_executor": "DevAgent"},
            "not an object"
        ]"#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].expected_output, "a");
    }

    #[test]
    fn test_all_invalid_is_an_error() {
        let err = parse_plan(r#"[{"step_id": 0, "action_description": "x",
            "required_inputs": [], "expected_output": "y", "suggested_executor": "z"}]"#)
        .unwrap_err();
        assert!(err.to_string().contains("must be positive"));
        assert!(err.source().unwrap().downcast_ref::<InvalidStructure>().is_some());

        let err = parse_plan(r#"{"step_id": 1}"#).unwrap_err();
        assert!(err.to_string().contains("must be a JSON list"));

        let err = parse_plan("[]").unwrap_err();
        assert!(err.to_string().contains("empty plan"));
    }

    #[test]
    fn test_unparseable_json_keeps_cause() {
        let err = parse_plan("Sure! Here is your plan: 1. do it").unwrap_err();
        assert!(err.to_string().contains("Failed to parse plan JSON"));
        assert!(err.source().unwrap().downcast_ref::<serde_json::Error>().is_some());
    }

    #[tokio::test]
    async fn test_llm_failure_is_planning_error() {
        let llm = Arc::new(FixedLlm {
            reply: Err("all connectors down".into()),
            prompts: Mutex::new(Vec::new()),
        });
        let err = Planner::new(llm, PlannerConfig::default())
            .create_plan("goal", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SuperMeanError::Planning { .. }));
        assert!(err.to_string().contains("LLM interaction failed during planning"));
    }

    #[tokio::test]
    async fn test_plan_truncated_to_max_steps() {
        let steps: Vec<Value> = (1..=5)
            .map(|i| {
                json!({"step_id": i, "action_description": "s", "required_inputs": [],
                       "expected_output": format!("o{i}"), "suggested_executor": "DevAgent"})
            })
            .collect();
        let llm = FixedLlm::ok(&Value::Array(steps).to_string());
        let config = PlannerConfig {
            max_steps: 3,
            ..Default::default()
        };
        let plan = Planner::new(llm, config).create_plan("g", None).await.unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].step_id, 3);
    }

    #[test]
    fn test_external_inputs() {
        assert!(is_external_input("Initial requirements"));
        assert!(is_external_input("user settings"));
        assert!(is_external_input("Project Configuration"));
        assert!(is_external_input("API key"));
        assert!(!is_external_input("design_doc"));
    }

    #[test]
    fn test_plan_complexity() {
        let plan = parse_plan(TWO_STEPS).unwrap();
        let mut sorted = plan.clone();
        sorted.sort_by_key(|s| s.step_id);

        let c = analyze_plan_complexity(&sorted);
        assert_eq!(c.total_steps, 2);
        assert_eq!(c.distinct_executors, 2);
        assert_eq!(c.dependency_count, 1);
        assert_eq!(c.max_dependency_depth, 1);
        assert_eq!(c.complexity_score, 3.5);
        assert_eq!(c.level, "low");
        assert_eq!(c.executor_usage["DevAgent"], 1);
    }
}

//! Plan execution.
//!
//! Steps run strictly one after another in `step_id` order. Each step's
//! inputs are looked up in a running data map seeded with the initial
//! context; each successful output is published back into it under the
//! step's `expected_output` name (and, for object outputs, field by field).
//! Execution stops at the first step that still fails after its retries.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use supermean_common::{
    Agent, ContextMap, Result, SkillExecutor, SuperMeanError, agent_error_status,
};
use tracing::{debug, error, info, warn};

use crate::config::BuilderConfig;
use crate::plan::{ExecutionResult, ExecutionStatus, Step};

/// What a step's `suggested_executor` resolved to.
#[derive(Clone)]
pub enum Executable {
    Agent(Arc<dyn Agent>),
    Skill {
        name: String,
        executor: Arc<dyn SkillExecutor>,
    },
}

impl Executable {
    pub async fn invoke(&self, task: &str, inputs: &ContextMap) -> Result<Value> {
        match self {
            Self::Agent(agent) => {
                let output = agent.run(task, inputs).await?;
                match agent_error_status(&output) {
                    Some(message) => Err(SuperMeanError::Agent(message)),
                    None => Ok(output),
                }
            }
            Self::Skill { name, executor } => executor.execute(name, inputs).await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Skill { .. } => "skill",
        }
    }
}

pub struct Builder {
    agents: HashMap<String, Arc<dyn Agent>>,
    skills: Arc<dyn SkillExecutor>,
    config: BuilderConfig,
}

impl Builder {
    pub fn new(
        agents: Vec<Arc<dyn Agent>>,
        skills: Arc<dyn SkillExecutor>,
        config: BuilderConfig,
    ) -> Self {
        let agents = agents
            .into_iter()
            .map(|a| (a.name().to_string(), a))
            .collect();
        Self {
            agents,
            skills,
            config,
        }
    }

    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every executor a plan step can name right now, as
    /// `(name, description)`: agents first, then registered skills.
    pub fn executor_catalog(&self) -> Vec<(String, String)> {
        let mut catalog: Vec<(String, String)> = self
            .agent_names()
            .into_iter()
            .filter_map(|name| {
                let agent = self.agents.get(&name)?;
                let phrases: Vec<&str> = agent
                    .capabilities()
                    .iter()
                    .map(|c| c.description())
                    .collect();
                let description = if phrases.is_empty() {
                    "general-purpose agent".to_string()
                } else {
                    format!("agent that {}", phrases.join("; "))
                };
                Some((name, description))
            })
            .collect();
        catalog.extend(
            self.skills
                .describe_skills()
                .into_iter()
                .filter(|(name, _)| !self.agents.contains_key(name))
                .map(|(name, description)| (name, format!("skill: {description}"))),
        );
        catalog
    }

    /// Agents take precedence over skills of the same name.
    pub fn resolve(&self, executor: &str) -> Option<Executable> {
        if let Some(agent) = self.agents.get(executor) {
            return Some(Executable::Agent(agent.clone()));
        }
        self.skills.has_skill(executor).then(|| Executable::Skill {
            name: executor.to_string(),
            executor: self.skills.clone(),
        })
    }

    /// Run every step of `plan`.
    pub async fn execute_plan(&self, plan: &[Step], context: &ContextMap) -> ExecutionResult {
        self.run_steps(plan, context, BTreeMap::new(), None).await
    }

    /// Whether `plan` can be resumed at `from_step_id`: the step must exist
    /// and every earlier step must have an output in `previous`, so the
    /// resume point is never past the first failure.
    pub fn can_resume(plan: &[Step], from_step_id: i64, previous: &ExecutionResult) -> bool {
        plan.iter().any(|s| s.step_id == from_step_id)
            && plan
                .iter()
                .filter(|s| s.step_id < from_step_id)
                .all(|s| previous.step_outputs.contains_key(&s.step_id))
    }

    /// Re-run `plan` from `from_step_id` on, reusing the outputs `previous`
    /// recorded for earlier steps. A resume point that [`Builder::can_resume`]
    /// rejects fails without running anything.
    pub async fn resume_plan(
        &self,
        plan: &[Step],
        context: &ContextMap,
        from_step_id: i64,
        previous: &ExecutionResult,
    ) -> ExecutionResult {
        if !Self::can_resume(plan, from_step_id, previous) {
            warn!(from_step_id, "Refusing to resume plan past its first incomplete step");
            return ExecutionResult {
                status: ExecutionStatus::Failed,
                step_outputs: previous.step_outputs.clone(),
                failed_steps: vec![(
                    from_step_id,
                    format!("Cannot resume at step {from_step_id}: earlier steps are incomplete or the step is not in the plan"),
                )],
                final_result: None,
                duration_ms: 0,
            };
        }
        let carried: BTreeMap<i64, Value> = previous
            .step_outputs
            .range(..from_step_id)
            .map(|(id, v)| (*id, v.clone()))
            .collect();
        info!(
            from_step_id,
            carried_steps = carried.len(),
            "Resuming plan execution"
        );
        self.run_steps(plan, context, carried, Some(from_step_id))
            .await
    }

    async fn run_steps(
        &self,
        plan: &[Step],
        context: &ContextMap,
        mut step_outputs: BTreeMap<i64, Value>,
        from_step_id: Option<i64>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut steps: Vec<&Step> = plan.iter().collect();
        steps.sort_by_key(|s| s.step_id);

        let mut available = context.clone();
        let mut final_result = None;
        for step in &steps {
            if let Some(output) = step_outputs.get(&step.step_id) {
                publish(&mut available, step, output);
                final_result = Some(output.clone());
            }
        }

        info!(steps = steps.len(), "Executing plan");
        let mut failed_steps = Vec::new();

        for step in steps {
            if from_step_id.is_some_and(|from| step.step_id < from) {
                continue;
            }
            match self.run_step(step, &available).await {
                Ok(output) => {
                    publish(&mut available, step, &output);
                    step_outputs.insert(step.step_id, output.clone());
                    final_result = Some(output);
                }
                Err(message) => {
                    error!(step_id = step.step_id, error = %message, "Step failed; halting plan");
                    failed_steps.push((step.step_id, message));
                    break;
                }
            }
        }

        let status = if failed_steps.is_empty() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(?status, completed = step_outputs.len(), duration_ms, "Plan execution finished");

        ExecutionResult {
            status,
            step_outputs,
            failed_steps,
            final_result,
            duration_ms,
        }
    }

    async fn run_step(&self, step: &Step, available: &ContextMap) -> std::result::Result<Value, String> {
        let missing: Vec<&str> = step
            .required_inputs
            .iter()
            .filter(|name| !available.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(format!("Missing required inputs: {}", missing.join(", ")));
        }

        let Some(executable) = self.resolve(&step.suggested_executor) else {
            return Err(format!(
                "No executor found for '{}'",
                step.suggested_executor
            ));
        };

        let inputs: ContextMap = step
            .required_inputs
            .iter()
            .filter_map(|name| available.get(name).map(|v| (name.clone(), v.clone())))
            .collect();

        let attempts = self.config.max_step_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            debug!(
                step_id = step.step_id,
                executor = %step.suggested_executor,
                kind = executable.kind(),
                attempt,
                "Running step"
            );
            match executable.invoke(&step.action_description, &inputs).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_security_violation() => {
                    return Err(e.to_string());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        warn!(
                            step_id = step.step_id,
                            attempt,
                            error = %e,
                            "Step attempt failed; retrying"
                        );
                        if self.config.retry_delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms))
                                .await;
                        }
                    }
                }
            }
        }
        Err(last_error)
    }
}

/// Make a step's output visible to later steps: under its expected output
/// name and, for objects, under each field name.
fn publish(available: &mut ContextMap, step: &Step, output: &Value) {
    available.insert(step.expected_output.clone(), output.clone());
    if let Value::Object(fields) = output {
        for (k, v) in fields {
            available.insert(k.clone(), v.clone());
        }
    }
}

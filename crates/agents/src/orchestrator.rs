//! Caller-side agent orchestration.
//!
//! The mission loop itself is strictly sequential. Callers that want to fan
//! out independent agent tasks use [`AgentOrchestrator`]: it picks agents by
//! capability and runs a batch of assignments concurrently, bounded by a
//! semaphore, collecting one outcome per assignment.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use supermean_common::{
    Agent, AgentCapability, ContextMap, Result, SuperMeanError, agent_error_status,
};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// One unit of work for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub agent_name: String,
    pub task_description: String,
    #[serde(default)]
    pub inputs: ContextMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl TaskAssignment {
    pub fn new(agent_name: impl Into<String>, task_description: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            task_description: task_description.into(),
            inputs: ContextMap::new(),
            task_id: None,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcomeStatus {
    Completed,
    Failed,
}

/// Result of one assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub agent: String,
    pub status: TaskOutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TaskOutcome {
    fn failed(task_id: String, agent: String, error: String, duration_ms: u64) -> Self {
        Self {
            task_id,
            agent,
            status: TaskOutcomeStatus::Failed,
            result: None,
            error: Some(error),
            duration_ms,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskOutcomeStatus::Completed
    }
}

pub struct AgentOrchestrator {
    agents: HashMap<String, Arc<dyn Agent>>,
    max_concurrent_agents: usize,
    semaphore: Arc<Semaphore>,
}

impl AgentOrchestrator {
    pub fn new(max_concurrent_agents: usize) -> Self {
        let max = max_concurrent_agents.max(1);
        Self {
            agents: HashMap::new(),
            max_concurrent_agents: max,
            semaphore: Arc::new(Semaphore::new(max)),
        }
    }

    /// Register an agent under its [`Agent::name`].
    pub fn add_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pick the agent covering the largest share of the required
    /// capabilities. Ties go to the alphabetically first name.
    pub fn allocate_agent(&self, required: &[AgentCapability]) -> Option<String> {
        if required.is_empty() {
            warn!("No capabilities specified for agent allocation");
            return None;
        }

        let mut best: Option<(f64, &str)> = None;
        for (name, agent) in &self.agents {
            let matched = required.iter().filter(|c| agent.has_capability(**c)).count();
            if matched == 0 {
                continue;
            }
            let score = matched as f64 / required.len() as f64;
            let better = match best {
                None => true,
                Some((s, n)) => score > s || (score == s && name.as_str() < n),
            };
            if better {
                best = Some((score, name.as_str()));
            }
        }

        match best {
            Some((score, name)) => {
                info!(agent = %name, score, "Allocated agent for capabilities");
                Some(name.to_string())
            }
            None => {
                warn!(required = ?required, "No suitable agent found");
                None
            }
        }
    }

    /// Run one assignment. Unknown agents are an error; agent failures are
    /// reported in the outcome.
    pub async fn execute_agent_task(&self, assignment: &TaskAssignment) -> Result<TaskOutcome> {
        let agent = self.agents.get(&assignment.agent_name).cloned().ok_or_else(|| {
            SuperMeanError::NotFound(format!("Agent '{}' not found", assignment.agent_name))
        })?;
        Ok(run_assignment(agent, assignment.clone()).await)
    }

    /// Run assignments concurrently, at most `max_concurrent_agents` at a
    /// time. Outcomes come back in assignment order; one failure never
    /// cancels the others.
    pub async fn execute_parallel_tasks(&self, assignments: Vec<TaskAssignment>) -> Vec<TaskOutcome> {
        if assignments.len() > self.max_concurrent_agents {
            debug!(
                requested = assignments.len(),
                max = self.max_concurrent_agents,
                "More tasks than concurrent slots; excess tasks will queue"
            );
        }

        let mut handles = Vec::with_capacity(assignments.len());
        for (index, assignment) in assignments.into_iter().enumerate() {
            let task_id = assignment
                .task_id
                .clone()
                .unwrap_or_else(|| format!("task_{}", uuid::Uuid::new_v4()));
            let agent_name = assignment.agent_name.clone();
            let agent = self.agents.get(&agent_name).cloned();
            let semaphore = self.semaphore.clone();

            let handle = tokio::spawn(async move {
                let Some(agent) = agent else {
                    return TaskOutcome::failed(
                        task_id,
                        agent_name.clone(),
                        format!("Agent '{agent_name}' not found"),
                        0,
                    );
                };
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return TaskOutcome::failed(task_id, agent_name, e.to_string(), 0);
                    }
                };
                let mut assignment = assignment;
                assignment.task_id = Some(task_id);
                run_assignment(agent, assignment).await
            });
            handles.push((handle, index));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (handle, index) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(index, error = %e, "Agent task panicked");
                    outcomes.push(TaskOutcome::failed(
                        format!("unknown-{index}"),
                        "unknown".into(),
                        format!("task panicked: {e}"),
                        0,
                    ));
                }
            }
        }
        outcomes
    }
}

async fn run_assignment(agent: Arc<dyn Agent>, assignment: TaskAssignment) -> TaskOutcome {
    let task_id = assignment
        .task_id
        .clone()
        .unwrap_or_else(|| format!("task_{}", uuid::Uuid::new_v4()));
    let agent_name = agent.name().to_string();
    let started = Instant::now();
    info!(task_id = %task_id, agent = %agent_name, "Executing agent task");

    let result = agent
        .run(&assignment.task_description, &assignment.inputs)
        .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(value) => match agent_error_status(&value) {
            Some(err) => {
                warn!(task_id = %task_id, agent = %agent_name, error = %err, "Agent reported failure");
                TaskOutcome::failed(task_id, agent_name, err, duration_ms)
            }
            None => TaskOutcome {
                task_id,
                agent: agent_name,
                status: TaskOutcomeStatus::Completed,
                result: Some(value),
                error: None,
                duration_ms,
            },
        },
        Err(e) => {
            error!(task_id = %task_id, agent = %agent_name, error = %e, "Agent task failed");
            TaskOutcome::failed(task_id, agent_name, e.to_string(), duration_ms)
        }
    }
}

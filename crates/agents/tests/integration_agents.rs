//! Integration tests for agent orchestration.
//!
//! These tests use simulated agents so no LLM connector is needed.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use supermean_agents::{AgentOrchestrator, TaskAssignment, TaskOutcomeStatus};
use supermean_common::{Agent, AgentCapability, ContextMap, Result, SuperMeanError};

/// A mock agent that simulates work with configurable behavior.
struct SimulatedAgent {
    name: String,
    capabilities: Vec<AgentCapability>,
    delay: Duration,
    mode: Mode,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    run_count: AtomicUsize,
}

#[derive(Clone, Copy)]
enum Mode {
    Succeed,
    ErrorStatus,
    Raise,
}

impl SimulatedAgent {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capabilities: vec![AgentCapability::CodeGeneration],
            delay: Duration::from_millis(10),
            mode: Mode::Succeed,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            run_count: AtomicUsize::new(0),
        }
    }

    fn with_capabilities(mut self, caps: Vec<AgentCapability>) -> Self {
        self.capabilities = caps;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    fn sharing_counters(mut self, active: Arc<AtomicUsize>, max_active: Arc<AtomicUsize>) -> Self {
        self.active = active;
        self.max_active = max_active;
        self
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    fn id(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &self.capabilities
    }

    async fn run(&self, task_description: &str, inputs: &ContextMap) -> Result<Value> {
        self.run_count.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.mode {
            Mode::Succeed => Ok(json!({
                "status": "success",
                "echo": task_description,
                "input_count": inputs.len(),
            })),
            Mode::ErrorStatus => Ok(json!({"status": "error", "error": "API key invalid"})),
            Mode::Raise => Err(SuperMeanError::Agent(format!("{} crashed", self.name))),
        }
    }

    fn system_prompt(&self) -> &str {
        "simulated"
    }
}

// ============================================================================
// Allocation
// ============================================================================

#[test]
fn test_allocate_prefers_best_capability_overlap() {
    let orchestrator = AgentOrchestrator::new(4)
        .add_agent(Arc::new(
            SimulatedAgent::new("DevAgent").with_capabilities(vec![AgentCapability::CodeGeneration]),
        ))
        .add_agent(Arc::new(SimulatedAgent::new("SecurityAgent").with_capabilities(vec![
            AgentCapability::CodeGeneration,
            AgentCapability::SecurityAudit,
        ])));

    let chosen = orchestrator.allocate_agent(&[
        AgentCapability::CodeGeneration,
        AgentCapability::SecurityAudit,
    ]);
    assert_eq!(chosen.as_deref(), Some("SecurityAgent"));

    // Equal overlap: alphabetical tie-break.
    let chosen = orchestrator.allocate_agent(&[AgentCapability::CodeGeneration]);
    assert_eq!(chosen.as_deref(), Some("DevAgent"));

    assert!(orchestrator.allocate_agent(&[AgentCapability::MedicalAnalysis]).is_none());
    assert!(orchestrator.allocate_agent(&[]).is_none());
}

// ============================================================================
// Single task execution
// ============================================================================

#[tokio::test]
async fn test_execute_agent_task_success() {
    let orchestrator = AgentOrchestrator::new(2).add_agent(Arc::new(SimulatedAgent::new("DevAgent")));
    let outcome = orchestrator
        .execute_agent_task(&TaskAssignment::new("DevAgent", "build it").with_input("spec", json!("x")))
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert!(outcome.task_id.starts_with("task_"));
    let result = outcome.result.unwrap();
    assert_eq!(result["echo"], "build it");
    assert_eq!(result["input_count"], 1);
}

#[tokio::test]
async fn test_execute_agent_task_unknown_agent() {
    let orchestrator = AgentOrchestrator::new(2);
    let err = orchestrator
        .execute_agent_task(&TaskAssignment::new("GhostAgent", "boo"))
        .await
        .unwrap_err();
    assert!(matches!(err, SuperMeanError::NotFound(_)));
}

#[tokio::test]
async fn test_error_status_is_reported_as_failure() {
    let orchestrator = AgentOrchestrator::new(2)
        .add_agent(Arc::new(SimulatedAgent::new("ResearchAgent").with_mode(Mode::ErrorStatus)));
    let outcome = orchestrator
        .execute_agent_task(&TaskAssignment::new("ResearchAgent", "look it up"))
        .await
        .unwrap();
    assert_eq!(outcome.status, TaskOutcomeStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("API key invalid"));
}

// ============================================================================
// Parallel batches
// ============================================================================

#[tokio::test]
async fn test_parallel_tasks_isolate_failures_and_keep_order() {
    let orchestrator = AgentOrchestrator::new(4)
        .add_agent(Arc::new(SimulatedAgent::new("DevAgent")))
        .add_agent(Arc::new(SimulatedAgent::new("SecurityAgent").with_mode(Mode::Raise)))
        .add_agent(Arc::new(SimulatedAgent::new("DesignAgent")));

    let mut explicit = TaskAssignment::new("DesignAgent", "sketch");
    explicit.task_id = Some("design-1".into());

    let outcomes = orchestrator
        .execute_parallel_tasks(vec![
            TaskAssignment::new("DevAgent", "code"),
            TaskAssignment::new("SecurityAgent", "audit"),
            TaskAssignment::new("MissingAgent", "nothing"),
            explicit,
        ])
        .await;

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes[0].is_completed());
    assert_eq!(outcomes[1].status, TaskOutcomeStatus::Failed);
    assert!(outcomes[1].error.as_deref().unwrap().contains("crashed"));
    assert_eq!(outcomes[2].status, TaskOutcomeStatus::Failed);
    assert_eq!(outcomes[2].agent, "MissingAgent");
    assert!(outcomes[3].is_completed());
    assert_eq!(outcomes[3].task_id, "design-1");
}

#[tokio::test]
async fn test_parallel_tasks_respect_concurrency_limit() {
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let agent = Arc::new(
        SimulatedAgent::new("DevAgent")
            .with_delay(Duration::from_millis(30))
            .sharing_counters(active.clone(), max_active.clone()),
    );
    let orchestrator = AgentOrchestrator::new(2).add_agent(agent.clone());

    let assignments = (0..6)
        .map(|i| TaskAssignment::new("DevAgent", format!("task {i}")))
        .collect();
    let outcomes = orchestrator.execute_parallel_tasks(assignments).await;

    assert!(outcomes.iter().all(|o| o.is_completed()));
    assert_eq!(agent.run_count.load(Ordering::SeqCst), 6);
    assert!(max_active.load(Ordering::SeqCst) <= 2);
}

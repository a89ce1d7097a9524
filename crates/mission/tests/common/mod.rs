//! Shared mocks for the mission integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use supermean_common::{
    Agent, AgentCapability, ContextMap, KeyValueStore, Result, SkillMetadata, SuperMeanError,
};
use supermean_llm::TextGenerator;
use supermean_memory::MemoryStore;
use supermean_mission::{MissionConfig, MissionControl};
use supermean_skills::{FnSkill, SkillRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Planner,
    Evaluator,
    MetaPlanner,
    ToolCode,
}

fn role_of(prompt: &str) -> Role {
    if prompt.ends_with("ASSISTANT:\ndef") {
        Role::ToolCode
    } else if prompt.contains("You are a planning agent") {
        Role::Planner
    } else if prompt.contains("You are an evaluation agent") {
        Role::Evaluator
    } else {
        Role::MetaPlanner
    }
}

/// Returns queued replies per component and records every prompt.
#[derive(Default)]
pub struct ScriptedLlm {
    queues: Mutex<HashMap<Role, VecDeque<String>>>,
    prompts: Mutex<Vec<(Role, String)>>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, role: Role, reply: impl Into<String>) -> &Self {
        self.queues
            .lock()
            .entry(role)
            .or_default()
            .push_back(reply.into());
        self
    }

    pub fn calls(&self, role: Role) -> usize {
        self.prompts.lock().iter().filter(|(r, _)| *r == role).count()
    }

    pub fn prompts(&self, role: Role) -> Vec<String> {
        self.prompts
            .lock()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl TextGenerator for ScriptedLlm {
    async fn generate(&self, prompt: &str, _model: Option<&str>) -> Result<String> {
        let role = role_of(prompt);
        self.prompts.lock().push((role, prompt.to_string()));
        let reply = self.queues.lock().get_mut(&role).and_then(VecDeque::pop_front);
        reply.ok_or_else(|| SuperMeanError::ModelConnection {
            model: "scripted".into(),
            message: format!("no scripted reply for {role:?}"),
        })
    }
}

#[derive(Clone, Copy)]
pub enum Behavior {
    Succeed,
    /// Fail this many calls, then succeed.
    FailFirst(usize),
    Panic,
}

pub struct MockAgent {
    name: String,
    behavior: Behavior,
    delay: Duration,
    output: Value,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<(String, ContextMap)>>,
}

impl MockAgent {
    pub fn new(name: &str, behavior: Behavior, output: Value) -> Self {
        Self {
            name: name.into(),
            behavior,
            delay: Duration::ZERO,
            output,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn id(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &[AgentCapability::WebSearch]
    }

    async fn run(&self, task_description: &str, inputs: &ContextMap) -> Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .push((task_description.to_string(), inputs.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::Succeed => Ok(self.output.clone()),
            Behavior::FailFirst(k) if n < k => Err(SuperMeanError::Agent("API key invalid".into())),
            Behavior::FailFirst(_) => Ok(self.output.clone()),
            Behavior::Panic => panic!("agent exploded"),
        }
    }

    fn system_prompt(&self) -> &str {
        "mock"
    }
}

pub struct Harness {
    pub llm: Arc<ScriptedLlm>,
    pub registry: Arc<SkillRegistry>,
    pub store: Arc<MemoryStore>,
    pub control: Arc<MissionControl>,
}

pub fn test_config(max_iterations: u32) -> MissionConfig {
    let mut config = MissionConfig::default();
    config.evaluator.retry_delay_ms = 0;
    config.builder.retry_delay_ms = 0;
    config.mission.max_planning_iterations = max_iterations;
    config
}

pub fn harness(config: MissionConfig, llm: Arc<ScriptedLlm>, agents: Vec<Arc<dyn Agent>>) -> Harness {
    let registry = Arc::new(SkillRegistry::new());
    register_summarize(&registry);
    let store = Arc::new(MemoryStore::in_memory());
    let control = MissionControl::from_config(
        &config,
        llm.clone(),
        registry.clone(),
        agents,
        Some(store.clone() as Arc<dyn KeyValueStore>),
    );
    Harness {
        llm,
        registry,
        store,
        control: Arc::new(control),
    }
}

/// A local `text.summarize` that keeps the first three words.
fn register_summarize(registry: &SkillRegistry) {
    let skill = FnSkill::new(|args: ContextMap| async move {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        let short: Vec<&str> = text.split_whitespace().take(3).collect();
        Ok(json!(short.join(" ")))
    });
    registry
        .register(
            "text.summarize",
            Arc::new(skill),
            SkillMetadata::new("Summarize text").with_args(["text"]),
        )
        .unwrap();
}

pub fn step(id: i64, executor: &str, inputs: &[&str], output: &str) -> Value {
    json!({
        "step_id": id,
        "action_description": format!("step {id} via {executor}"),
        "required_inputs": inputs,
        "expected_output": output,
        "suggested_executor": executor,
    })
}

pub fn plan_reply(steps: &[Value]) -> String {
    Value::Array(steps.to_vec()).to_string()
}

pub fn evaluation_reply(success: bool, score: f64) -> String {
    json!({
        "overall_success": success,
        "score": score,
        "reasoning": if success { "goal met" } else { "goal not met" },
        "suggestions": [],
    })
    .to_string()
}

pub fn context(pairs: &[(&str, &str)]) -> ContextMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

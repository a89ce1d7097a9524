//! The mission loop.
//!
//! Each iteration plans (when needed), builds, evaluates and asks the
//! meta-planner what to do next. Component errors end the iteration and
//! force a fresh plan; only a panic aborts the whole mission.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use supermean_common::{
    Agent, ContextMap, KeyValueStore, Result, SkillExecutor, SuperMeanError, now_millis,
};
use supermean_llm::TextGenerator;
use supermean_skills::SkillRegistry;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builder::Builder;
use crate::config::{MissionConfig, MissionSettings};
use crate::evaluator::Evaluator;
use crate::events::{EventBus, topics};
use crate::llm_output::{pretty, preview};
use crate::meta_planner::MetaPlanner;
use crate::plan::{Decision, ExecutionResult, Outcome, Plan};
use crate::planner::Planner;
use crate::state::{IterationRecord, MissionState, MissionStatus, MissionStatusReport};
use crate::tool_creator::{ToolCreationReport, ToolCreator};

const STATE_KIND: &str = "mission_state";
const STOPPED_MESSAGE: &str = "Mission stopped manually";
const EXHAUSTED_MESSAGE: &str = "Mission failed to reach final success within iterations.";
const FINAL_FAILURE_MESSAGE: &str = "Meta-planner declared final failure.";

/// Loop-local carry-over between iterations.
struct Cursor {
    next: Outcome,
    plan: Option<Plan>,
    last_result: Option<ExecutionResult>,
    retry_from: Option<i64>,
    tool_note: Option<String>,
}

impl Cursor {
    fn new() -> Self {
        Self {
            next: Outcome::RevisePlan,
            plan: None,
            last_result: None,
            retry_from: None,
            tool_note: None,
        }
    }
}

pub struct MissionControl {
    planner: Planner,
    builder: Builder,
    evaluator: Evaluator,
    meta_planner: MetaPlanner,
    tool_creator: ToolCreator,
    events: EventBus,
    store: Option<Arc<dyn KeyValueStore>>,
    settings: MissionSettings,
    running: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl MissionControl {
    pub fn new(
        planner: Planner,
        builder: Builder,
        evaluator: Evaluator,
        meta_planner: MetaPlanner,
        tool_creator: ToolCreator,
        events: EventBus,
    ) -> Self {
        Self {
            planner,
            builder,
            evaluator,
            meta_planner,
            tool_creator,
            events,
            store: None,
            settings: MissionSettings::default(),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Wire every component from one configuration.
    pub fn from_config(
        config: &MissionConfig,
        llm: Arc<dyn TextGenerator>,
        registry: Arc<SkillRegistry>,
        agents: Vec<Arc<dyn Agent>>,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let mut planner = Planner::new(llm.clone(), config.planner.clone());
        if let Some(store) = &store {
            planner = planner.with_memory(store.clone());
        }
        let skills: Arc<dyn SkillExecutor> = registry.clone();
        let builder = Builder::new(agents, skills, config.builder.clone());
        let evaluator = Evaluator::new(llm.clone(), config.evaluator.clone());
        let meta_planner = MetaPlanner::new(llm.clone(), config.meta_planner.clone());
        let tool_creator = ToolCreator::new(llm, registry, config.tool_creator.clone());

        let control = Self::new(
            planner,
            builder,
            evaluator,
            meta_planner,
            tool_creator,
            EventBus::default(),
        )
        .with_settings(config.mission.clone());
        match store {
            Some(store) => control.with_store(store),
            None => control,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: MissionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn tool_creator(&self) -> &ToolCreator {
        &self.tool_creator
    }

    pub fn settings(&self) -> &MissionSettings {
        &self.settings
    }

    /// Run a mission to completion and return its final state.
    ///
    /// This never fails: every outcome, including an aborted loop, is
    /// recorded in the returned state. Reusing the id of a mission that is
    /// still running yields a failed state and leaves the running mission
    /// untouched.
    pub async fn start_mission(
        &self,
        goal: &str,
        initial_context: ContextMap,
        mission_id: Option<String>,
    ) -> MissionState {
        let mission_id = mission_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let stop = Arc::new(AtomicBool::new(false));
        {
            let mut running = self.running.lock();
            if running.contains_key(&mission_id) {
                warn!(mission_id = %mission_id, "Mission id is already running; refusing to start");
                let mut state =
                    MissionState::new(&mission_id, goal, initial_context, now_millis());
                state.status = MissionStatus::Failed;
                state.error = Some(format!("Mission '{mission_id}' is already running"));
                state.end_time_ms = Some(state.start_time_ms);
                return state;
            }
            running.insert(mission_id.clone(), stop.clone());
        }

        let mut state = MissionState::new(&mission_id, goal, initial_context, now_millis());
        info!(mission_id = %mission_id, goal = %preview(goal, 150), "Mission started");
        self.events.publish(
            topics::STARTED,
            &mission_id,
            json!({ "goal": goal, "start_time_ms": state.start_time_ms }),
        );

        let outcome = AssertUnwindSafe(self.run_loop(&mut state, &stop))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            error!(mission_id = %mission_id, error = %message, "Mission aborted by unexpected error");
            state.status = MissionStatus::Failed;
            state.error = Some(format!("Critical error: {message}"));
            state.end_time_ms = Some(now_millis());
            self.events.publish(
                topics::COMPLETED_FAILURE,
                &mission_id,
                json!({ "end_time_ms": state.end_time_ms, "error": state.error }),
            );
        }

        self.persist(&state).await;
        self.running.lock().remove(&mission_id);
        state
    }

    async fn run_loop(&self, state: &mut MissionState, stop: &AtomicBool) {
        let max_iterations = self.settings.max_planning_iterations;
        let mut cursor = Cursor::new();
        let mut iteration = 0;
        let mut stopped = false;

        while !cursor.next.is_final() && iteration < max_iterations {
            if stop.load(Ordering::SeqCst) {
                stopped = true;
                break;
            }
            iteration += 1;
            info!(
                mission_id = %state.mission_id,
                iteration,
                max_iterations,
                outcome = %cursor.next,
                "Starting iteration"
            );

            let mut record = IterationRecord::new(iteration, now_millis());
            match self.run_iteration(state, &mut cursor, &mut record).await {
                Ok(outcome) => cursor.next = outcome,
                Err(e) => {
                    error!(mission_id = %state.mission_id, iteration, error = %e, "Iteration failed");
                    record.error = Some(e.to_string());
                    cursor.next = Outcome::RevisePlan;
                }
            }
            state.history.push(record);
            self.persist(state).await;
        }

        if !stopped && stop.load(Ordering::SeqCst) && !cursor.next.is_final() {
            stopped = true;
        }
        state.end_time_ms = Some(now_millis());
        let id = state.mission_id.clone();

        if stopped {
            info!(mission_id = %id, iterations = iteration, "Mission stopped");
            state.status = MissionStatus::Stopped;
            state.error = Some(STOPPED_MESSAGE.into());
            self.events.publish(
                topics::STOPPED,
                &id,
                json!({ "end_time_ms": state.end_time_ms, "final_status": state.status }),
            );
            return;
        }

        match cursor.next {
            Outcome::FinalSuccess => {
                state.status = MissionStatus::FinalSuccess;
                state.final_result = cursor
                    .last_result
                    .as_ref()
                    .and_then(|r| r.final_result.clone());
                info!(mission_id = %id, iterations = iteration, "Mission completed successfully");
                self.events.publish(
                    topics::COMPLETED_SUCCESS,
                    &id,
                    json!({ "end_time_ms": state.end_time_ms, "result": state.final_result }),
                );
            }
            outcome => {
                if outcome == Outcome::FinalFailure {
                    state.status = MissionStatus::FinalFailure;
                    state.error = Some(FINAL_FAILURE_MESSAGE.into());
                } else {
                    state.status = MissionStatus::Failed;
                    state.error = Some(EXHAUSTED_MESSAGE.into());
                }
                warn!(mission_id = %id, outcome = %outcome, error = ?state.error, "Mission failed");
                self.events.publish(
                    topics::COMPLETED_FAILURE,
                    &id,
                    json!({ "end_time_ms": state.end_time_ms, "error": state.error }),
                );
            }
        }
    }

    async fn run_iteration(
        &self,
        state: &mut MissionState,
        cursor: &mut Cursor,
        record: &mut IterationRecord,
    ) -> Result<Outcome> {
        let id = state.mission_id.clone();
        let iteration = record.iteration;

        let replan = cursor.plan.is_none()
            || matches!(cursor.next, Outcome::RevisePlan | Outcome::CreateTool);
        if replan {
            state.status = MissionStatus::Planning;
            let context = self.planning_context(state, cursor);
            let executors = self.builder.executor_catalog();
            let plan = self
                .planner
                .create_plan_with(&state.goal, Some(&context), &executors)
                .await?;
            record.plan = Some(plan.clone());
            self.events.publish(
                topics::PLAN_CREATED,
                &id,
                json!({ "iteration": iteration, "plan": plan }),
            );
            cursor.plan = Some(plan);
            cursor.retry_from = None;
        }
        let plan = cursor.plan.clone().unwrap_or_default();

        state.status = MissionStatus::Building;
        let result = match (cursor.retry_from.take(), &cursor.last_result) {
            (Some(step_id), Some(previous)) => {
                info!(mission_id = %id, step_id, "Retrying plan from step");
                self.builder
                    .resume_plan(&plan, &state.initial_context, step_id, previous)
                    .await
            }
            _ => self.builder.execute_plan(&plan, &state.initial_context).await,
        };
        record.execution_result = Some(result.clone());
        self.events.publish(
            topics::BUILD_COMPLETED,
            &id,
            json!({
                "iteration": iteration,
                "status": result.status,
                "failed_steps": result.failed_steps,
            }),
        );
        cursor.last_result = Some(result.clone());

        state.status = MissionStatus::Evaluating;
        let evaluation = self
            .evaluator
            .evaluate_execution(&state.goal, &plan, &result)
            .await?;
        record.evaluation = Some(evaluation.clone());
        self.events.publish(
            topics::EVALUATION_COMPLETED,
            &id,
            json!({ "iteration": iteration, "evaluation": evaluation }),
        );

        state.status = MissionStatus::Deciding;
        let decision = match self
            .meta_planner
            .reflect_and_adapt(&state.goal, &plan, &result, Some(&evaluation))
            .await?
        {
            Decision::RetryStep { step_id } if !Builder::can_resume(&plan, step_id, &result) => {
                warn!(
                    mission_id = %id,
                    step_id,
                    "Retry target is not in the plan or lies past the first failure; revising plan"
                );
                Decision::RevisePlan
            }
            decision => decision,
        };
        let outcome = decision.outcome();
        record.decision = Some(outcome);
        record.decision_data = decision.data();
        state.status = outcome.into();
        info!(mission_id = %id, iteration, decision = %outcome, "Decision made");
        self.events.publish(
            topics::DECISION_MADE,
            &id,
            json!({
                "iteration": iteration,
                "decision": outcome,
                "decision_data": record.decision_data,
            }),
        );

        match decision {
            Decision::CreateTool(spec) => {
                let report = self.tool_creator.create_tool(&spec).await;
                cursor.tool_note = Some(tool_note(&report));
                record.tool_creation = Some(report);
            }
            Decision::RetryStep { step_id } => cursor.retry_from = Some(step_id),
            _ => {}
        }
        Ok(outcome)
    }

    /// Feedback handed to the planner: the previous plan, its evaluation,
    /// the last iteration's error and any tool created since.
    fn planning_context(&self, state: &MissionState, cursor: &mut Cursor) -> String {
        let mut sections = Vec::new();
        if !state.initial_context.is_empty() {
            let keys: Vec<&str> = state.initial_context.keys().map(String::as_str).collect();
            sections.push(format!("Initial context inputs: {}", keys.join(", ")));
        }
        if let Some(plan) = &cursor.plan {
            sections.push(format!("Previous Plan:\n{}", pretty(plan)));
        }
        if let Some(last) = state.history.last() {
            if let Some(evaluation) = &last.evaluation {
                sections.push(format!(
                    "Evaluation of Previous Execution:\n{}",
                    pretty(evaluation)
                ));
            }
            if let Some(err) = &last.error {
                sections.push(format!("The previous iteration failed: {err}"));
            }
        }
        match cursor.tool_note.take() {
            Some(note) => sections.push(note),
            None if !state.history.is_empty() => {
                sections.push("Review the previous attempt history to inform the new plan.".into());
            }
            None => {}
        }
        sections.join("\n\n")
    }

    async fn persist(&self, state: &MissionState) {
        if !self.settings.persist_state {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let value = match serde_json::to_value(state) {
            Ok(v) => v,
            Err(e) => {
                warn!(mission_id = %state.mission_id, error = %e, "Could not serialize mission state");
                return;
            }
        };
        let metadata = json!({
            "kind": STATE_KIND,
            "goal": state.goal,
            "status": state.status,
        });
        match store.store(&state.mission_id, value, metadata).await {
            Ok(_) => debug!(mission_id = %state.mission_id, status = ?state.status, "Mission state saved"),
            Err(e) => warn!(mission_id = %state.mission_id, error = %e, "Failed to save mission state"),
        }
    }

    pub async fn get_mission_state(&self, mission_id: &str) -> Result<Option<MissionState>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.retrieve(mission_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Ids of every persisted mission, sorted.
    pub async fn list_missions(&self) -> Result<Vec<String>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let filter = json!({ "kind": STATE_KIND });
        let mut ids: Vec<String> = store
            .search("", usize::MAX, Some(&filter))
            .await?
            .into_iter()
            .map(|hit| hit.key)
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub async fn delete_mission(&self, mission_id: &str) -> Result<bool> {
        match &self.store {
            Some(store) => store.delete(mission_id).await,
            None => Ok(false),
        }
    }

    pub async fn get_mission_status(&self, mission_id: &str) -> Result<MissionStatusReport> {
        let state = self
            .get_mission_state(mission_id)
            .await?
            .ok_or_else(|| SuperMeanError::NotFound(format!("Mission {mission_id} not found")))?;
        Ok(state.status_report(self.settings.max_planning_iterations))
    }

    /// Ask a mission to stop.
    ///
    /// A mission driven by this instance stops at its next iteration
    /// boundary. A persisted mission left in a running state is marked
    /// stopped directly. Returns `false` when the mission already finished.
    pub async fn stop_mission(&self, mission_id: &str) -> Result<bool> {
        let flag = self.running.lock().get(mission_id).cloned();
        if let Some(flag) = flag {
            info!(mission_id = %mission_id, "Stop requested for running mission");
            flag.store(true, Ordering::SeqCst);
            return Ok(true);
        }

        let mut state = self
            .get_mission_state(mission_id)
            .await?
            .ok_or_else(|| SuperMeanError::NotFound(format!("Mission {mission_id} not found")))?;
        if !state.status.is_running() {
            debug!(mission_id = %mission_id, status = ?state.status, "Mission already finished");
            return Ok(false);
        }

        state.status = MissionStatus::Stopped;
        state.end_time_ms = Some(now_millis());
        state.error = Some(STOPPED_MESSAGE.into());
        self.persist(&state).await;
        self.events.publish(
            topics::STOPPED,
            mission_id,
            json!({ "end_time_ms": state.end_time_ms, "final_status": state.status }),
        );
        info!(mission_id = %mission_id, "Idle mission marked stopped");
        Ok(true)
    }
}

fn tool_note(report: &ToolCreationReport) -> String {
    if report.success {
        format!(
            "Note: A new tool '{}' has been created and is available. Consider incorporating it.",
            report.skill_name
        )
    } else {
        format!(
            "Note: Creating the tool '{}' failed ({}). Plan without it.",
            report.skill_name,
            report.error.as_deref().unwrap_or("unknown error")
        )
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

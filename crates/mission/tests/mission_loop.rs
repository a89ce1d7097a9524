//! End-to-end mission loop scenarios with a scripted model.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use supermean_common::{Agent, SuperMeanError};
use supermean_mission::{MissionStatus, Outcome, topics};

#[tokio::test]
async fn research_and_summarize_succeeds_first_pass() {
    let llm = ScriptedLlm::new();
    llm.push(
        Role::Planner,
        plan_reply(&[
            step(1, "ResearchAgent", &["topic"], "research_notes"),
            step(2, "text.summarize", &["text"], "summary"),
        ]),
    )
    .push(Role::Evaluator, evaluation_reply(true, 0.9));

    let research = Arc::new(MockAgent::new(
        "ResearchAgent",
        Behavior::Succeed,
        json!({"status": "success", "text": "rust is a systems language"}),
    ));
    let h = harness(test_config(5), llm.clone(), vec![research.clone() as Arc<dyn Agent>]);
    let mut events = h.control.events().subscribe();

    let state = h
        .control
        .start_mission(
            "Research and summarize topic",
            context(&[("topic", "rust")]),
            None,
        )
        .await;

    assert_eq!(state.status, MissionStatus::FinalSuccess);
    assert_eq!(state.final_result, Some(json!("rust is a")));
    assert_eq!(state.history.len(), 1);
    assert!(state.error.is_none());
    assert!(state.end_time_ms.is_some());

    let record = &state.history[0];
    assert_eq!(record.decision, Some(Outcome::FinalSuccess));
    assert_eq!(record.evaluation.as_ref().map(|e| e.score), Some(0.9));

    // Only the declared input reaches the agent.
    let seen = research.seen.lock();
    assert_eq!(seen[0].1.len(), 1);
    assert_eq!(seen[0].1["topic"], "rust");
    drop(seen);

    assert_eq!(llm.calls(Role::Planner), 1);
    assert_eq!(llm.calls(Role::Evaluator), 1);
    assert_eq!(llm.calls(Role::MetaPlanner), 0);

    let mut published = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.mission_id, state.mission_id);
        published.push(event.topic);
    }
    assert_eq!(
        published,
        vec![
            topics::STARTED,
            topics::PLAN_CREATED,
            topics::BUILD_COMPLETED,
            topics::EVALUATION_COMPLETED,
            topics::DECISION_MADE,
            topics::COMPLETED_SUCCESS,
        ]
    );
}

#[tokio::test]
async fn failed_step_is_retried_without_replanning() {
    let llm = ScriptedLlm::new();
    llm.push(
        Role::Planner,
        plan_reply(&[step(1, "DataAgent", &[], "data")]),
    )
    .push(Role::MetaPlanner, "The key may have been rotated.\n{\"retry_step_id\": 1}")
    .push(Role::Evaluator, evaluation_reply(true, 0.8));

    // Default builder config allows three attempts per step.
    let agent = Arc::new(MockAgent::new(
        "DataAgent",
        Behavior::FailFirst(3),
        json!({"status": "success", "rows": 10}),
    ));
    let h = harness(test_config(5), llm.clone(), vec![agent.clone() as Arc<dyn Agent>]);

    let state = h
        .control
        .start_mission("Fetch the data", Default::default(), Some("m-retry".into()))
        .await;

    assert_eq!(state.mission_id, "m-retry");
    assert_eq!(state.status, MissionStatus::FinalSuccess);
    assert_eq!(state.history.len(), 2);

    let first = &state.history[0];
    let failed = first.execution_result.as_ref().unwrap();
    assert_eq!(failed.failed_steps.len(), 1);
    assert_eq!(failed.failed_steps[0].0, 1);
    assert!(failed.failed_steps[0].1.contains("API key invalid"));
    assert_eq!(first.evaluation.as_ref().unwrap().score, 0.0);
    assert_eq!(first.decision, Some(Outcome::RetryStep));
    assert_eq!(first.decision_data, Some(json!({"retry_step_id": 1})));

    let second = &state.history[1];
    assert!(second.plan.is_none());
    assert!(second.execution_result.as_ref().unwrap().is_success());

    assert_eq!(llm.calls(Role::Planner), 1);
    assert_eq!(agent.call_count(), 4);
}

#[tokio::test]
async fn created_tool_is_offered_to_the_next_plan() {
    let llm = ScriptedLlm::new();
    llm.push(
        Role::Planner,
        plan_reply(&[step(1, "text.word_count", &["text"], "count")]),
    )
    .push(
        Role::MetaPlanner,
        r#"{"skill_name": "text.word_count", "description": "Count the words in a text", "required_args": ["text"], "return_type": "int"}"#,
    )
    .push(
        Role::ToolCode,
        " word_count(text: str) -> int:\n    \"\"\"Count the words in text.\"\"\"\n    if not text:\n        raise ValueError(\"text must not be empty\")\n    return len(text.split())\n",
    )
    .push(
        Role::Planner,
        plan_reply(&[step(1, "text.word_count", &["text"], "count")]),
    )
    .push(Role::Evaluator, evaluation_reply(true, 0.95));

    let h = harness(test_config(5), llm.clone(), vec![]);
    let state = h
        .control
        .start_mission(
            "Count the words",
            context(&[("text", "one two three")]),
            None,
        )
        .await;

    assert_eq!(state.status, MissionStatus::FinalSuccess);
    assert_eq!(state.final_result, Some(json!(3)));
    assert_eq!(state.history.len(), 2);

    let first = &state.history[0];
    assert_eq!(first.decision, Some(Outcome::CreateTool));
    let report = first.tool_creation.as_ref().unwrap();
    assert!(report.success, "tool creation failed: {:?}", report.error);
    assert!(h.registry.contains("text.word_count"));
    let metadata = h.registry.get_skill_metadata("text.word_count").unwrap();
    assert_eq!(metadata.category, "generated");

    let prompts = llm.prompts(Role::Planner);
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("Note: A new tool 'text.word_count' has been created"));
    assert!(prompts[0].contains("- text.summarize: skill: Summarize text"));
    assert!(!prompts[0].contains("- text.word_count:"));
    assert!(prompts[1].contains("- text.word_count: skill: Count the words in a text"));
}

#[tokio::test]
async fn exhausted_iterations_fail_the_mission() {
    let llm = ScriptedLlm::new();
    for _ in 0..2 {
        llm.push(
            Role::Planner,
            plan_reply(&[step(1, "NoSuchAgent", &[], "x")]),
        )
        .push(Role::MetaPlanner, "REVISE_PLAN");
    }

    let h = harness(test_config(2), llm.clone(), vec![]);
    let state = h
        .control
        .start_mission("Impossible goal", Default::default(), None)
        .await;

    assert_eq!(state.status, MissionStatus::Failed);
    assert_eq!(
        state.error.as_deref(),
        Some("Mission failed to reach final success within iterations.")
    );
    assert_eq!(state.history.len(), 2);
    assert!(
        state.history[0].execution_result.as_ref().unwrap().failed_steps[0]
            .1
            .contains("No executor found for 'NoSuchAgent'")
    );
}

#[tokio::test]
async fn component_errors_trigger_replanning() {
    let llm = ScriptedLlm::new();
    // First planning call gets unparseable output; the second succeeds.
    llm.push(Role::Planner, "I cannot produce JSON today")
        .push(
            Role::Planner,
            plan_reply(&[step(1, "text.summarize", &["text"], "summary")]),
        )
        .push(Role::Evaluator, evaluation_reply(true, 0.7));

    let h = harness(test_config(3), llm.clone(), vec![]);
    let state = h
        .control
        .start_mission("Summarize", context(&[("text", "a b c d e")]), None)
        .await;

    assert_eq!(state.status, MissionStatus::FinalSuccess);
    assert_eq!(state.history.len(), 2);
    let error = state.history[0].error.as_deref().unwrap();
    assert!(error.contains("Planning error"), "unexpected error: {error}");
    assert!(state.history[0].plan.is_none());
    assert!(
        llm.prompts(Role::Planner)[1].contains("The previous iteration failed"),
        "second planning prompt should carry the error"
    );
}

#[tokio::test]
async fn explicit_final_failure() {
    let llm = ScriptedLlm::new();
    llm.push(
        Role::Planner,
        plan_reply(&[step(1, "NoSuchAgent", &[], "x")]),
    )
    .push(Role::MetaPlanner, "Nothing else can be done.\nFINAL_FAILURE");

    let h = harness(test_config(5), llm, vec![]);
    let state = h
        .control
        .start_mission("Doomed", Default::default(), None)
        .await;

    assert_eq!(state.status, MissionStatus::FinalFailure);
    assert_eq!(state.history.len(), 1);
    assert!(state.error.is_some());
}

#[tokio::test]
async fn panic_in_a_component_aborts_the_mission() {
    let llm = ScriptedLlm::new();
    llm.push(
        Role::Planner,
        plan_reply(&[step(1, "Boom", &[], "x")]),
    );
    let agent = Arc::new(MockAgent::new("Boom", Behavior::Panic, json!(null)));
    let h = harness(test_config(5), llm, vec![agent as Arc<dyn Agent>]);

    let state = h
        .control
        .start_mission("Explode", Default::default(), Some("m-panic".into()))
        .await;

    assert_eq!(state.status, MissionStatus::Failed);
    assert_eq!(state.error.as_deref(), Some("Critical error: agent exploded"));

    let persisted = h.control.get_mission_state("m-panic").await.unwrap().unwrap();
    assert_eq!(persisted.status, MissionStatus::Failed);
}

#[tokio::test]
async fn stop_is_honored_at_the_next_iteration() {
    let llm = ScriptedLlm::new();
    llm.push(Role::Planner, plan_reply(&[step(1, "Slow", &[], "x")]))
        .push(Role::MetaPlanner, "REVISE_PLAN");

    let mut config = test_config(5);
    config.builder.max_step_retries = 0;
    let agent = MockAgent::new("Slow", Behavior::FailFirst(usize::MAX), json!(null))
        .with_delay(Duration::from_millis(100));
    let h = harness(config, llm.clone(), vec![Arc::new(agent) as Arc<dyn Agent>]);

    let mut events = h.control.events().subscribe();
    let control = h.control.clone();
    let running = tokio::spawn(async move {
        control
            .start_mission("Slow goal", Default::default(), Some("m-stop".into()))
            .await
    });

    loop {
        let event = events.recv().await.unwrap();
        if event.topic == topics::PLAN_CREATED {
            break;
        }
    }
    assert!(h.control.stop_mission("m-stop").await.unwrap());

    let state = running.await.unwrap();
    assert_eq!(state.status, MissionStatus::Stopped);
    assert_eq!(state.error.as_deref(), Some("Mission stopped manually"));
    assert_eq!(state.history.len(), 1);
    assert_eq!(llm.calls(Role::Planner), 1);

    let mut stopped = false;
    while let Ok(event) = events.try_recv() {
        stopped |= event.topic == topics::STOPPED;
    }
    assert!(stopped);
}

#[tokio::test]
async fn mission_queries() {
    let llm = ScriptedLlm::new();
    llm.push(
        Role::Planner,
        plan_reply(&[step(1, "text.summarize", &["text"], "summary")]),
    )
    .push(Role::Evaluator, evaluation_reply(true, 0.9));
    let h = harness(test_config(5), llm, vec![]);

    let state = h
        .control
        .start_mission("Summarize", context(&[("text", "x y z")]), Some("m-q".into()))
        .await;
    assert_eq!(state.status, MissionStatus::FinalSuccess);

    assert_eq!(h.control.list_missions().await.unwrap(), vec!["m-q"]);

    let status = h.control.get_mission_status("m-q").await.unwrap();
    assert_eq!(status.status, MissionStatus::FinalSuccess);
    assert_eq!(status.progress, 20.0);
    assert_eq!(
        status.phases_completed,
        vec!["planning", "building", "evaluating", "deciding"]
    );

    // Finished missions cannot be stopped.
    assert!(!h.control.stop_mission("m-q").await.unwrap());

    assert!(h.control.delete_mission("m-q").await.unwrap());
    assert!(h.control.list_missions().await.unwrap().is_empty());
    assert!(matches!(
        h.control.get_mission_status("m-q").await,
        Err(SuperMeanError::NotFound(_))
    ));
    assert!(matches!(
        h.control.stop_mission("m-q").await,
        Err(SuperMeanError::NotFound(_))
    ));
}

#[tokio::test]
async fn idle_running_mission_is_marked_stopped() {
    use supermean_common::KeyValueStore;
    use supermean_mission::MissionState;

    let h = harness(test_config(5), ScriptedLlm::new(), vec![]);
    let mut state = MissionState::new("m-idle", "goal", Default::default(), 1);
    state.status = MissionStatus::Building;
    h.store
        .store(
            "m-idle",
            serde_json::to_value(&state).unwrap(),
            json!({"kind": "mission_state"}),
        )
        .await
        .unwrap();

    let mut events = h.control.events().subscribe();
    assert!(h.control.stop_mission("m-idle").await.unwrap());

    let stored = h.control.get_mission_state("m-idle").await.unwrap().unwrap();
    assert_eq!(stored.status, MissionStatus::Stopped);
    assert!(stored.end_time_ms.is_some());
    assert_eq!(events.recv().await.unwrap().topic, topics::STOPPED);
}

#[tokio::test]
async fn retry_past_the_failed_step_forces_a_new_plan() {
    let llm = ScriptedLlm::new();
    let plan = plan_reply(&[
        step(1, "Broken", &[], "data"),
        step(2, "Good", &[], "report"),
    ]);
    llm.push(Role::Planner, plan.clone())
        .push(Role::Planner, plan)
        .push(Role::MetaPlanner, "Skip ahead.\n{\"retry_step_id\": 2}")
        .push(Role::MetaPlanner, "{\"retry_step_id\": 99}");

    let mut config = test_config(2);
    config.builder.max_step_retries = 0;
    let broken = Arc::new(MockAgent::new("Broken", Behavior::FailFirst(usize::MAX), json!(null)));
    let good = Arc::new(MockAgent::new("Good", Behavior::Succeed, json!({"status": "success"})));
    let h = harness(
        config,
        llm.clone(),
        vec![broken.clone() as Arc<dyn Agent>, good.clone() as Arc<dyn Agent>],
    );

    let state = h
        .control
        .start_mission("Build the report", Default::default(), None)
        .await;

    assert_eq!(state.status, MissionStatus::Failed);
    assert!(state.final_result.is_none());
    assert_eq!(state.history.len(), 2);
    for record in &state.history {
        assert_eq!(record.decision, Some(Outcome::RevisePlan));
        assert!(record.decision_data.is_none());
        assert!(!record.execution_result.as_ref().unwrap().is_success());
    }
    assert_eq!(llm.calls(Role::Planner), 2);
    assert_eq!(broken.call_count(), 2);
    assert_eq!(good.call_count(), 0);
}

#[tokio::test]
async fn duplicate_mission_id_is_rejected_while_running() {
    let llm = ScriptedLlm::new();
    llm.push(Role::Planner, plan_reply(&[step(1, "Slow", &[], "x")]))
        .push(Role::MetaPlanner, "REVISE_PLAN");

    let mut config = test_config(5);
    config.builder.max_step_retries = 0;
    let agent = MockAgent::new("Slow", Behavior::FailFirst(usize::MAX), json!(null))
        .with_delay(Duration::from_millis(100));
    let h = harness(config, llm.clone(), vec![Arc::new(agent) as Arc<dyn Agent>]);

    let mut events = h.control.events().subscribe();
    let control = h.control.clone();
    let running = tokio::spawn(async move {
        control
            .start_mission("Slow goal", Default::default(), Some("m-dup".into()))
            .await
    });
    loop {
        let event = events.recv().await.unwrap();
        if event.topic == topics::PLAN_CREATED {
            break;
        }
    }

    let duplicate = h
        .control
        .start_mission("Other goal", Default::default(), Some("m-dup".into()))
        .await;
    assert_eq!(duplicate.status, MissionStatus::Failed);
    assert!(duplicate.error.as_deref().unwrap().contains("already running"));
    assert!(duplicate.history.is_empty());
    assert_eq!(llm.calls(Role::Planner), 1);

    assert!(h.control.stop_mission("m-dup").await.unwrap());
    let original = running.await.unwrap();
    assert_eq!(original.goal, "Slow goal");
    assert_eq!(original.status, MissionStatus::Stopped);
}

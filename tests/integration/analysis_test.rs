//! Analysis Loop Integration Tests
//!
//! Runs objectives end to end through the coordinator:
//! - A tool call followed by an answer yields exactly two steps
//! - A planner that never answers stops at the iteration cap
//! - Streamed synthesis text concatenates to the final answer
//! - Invalid tool parameters are recorded as failed executions

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use pixlie_core::{ConversationStatus, StepStatus, StepType, TerminalReason};
use pixlie_engine::models::settings::AnalysisConfig;
use pixlie_engine::services::StreamEvent;
use pixlie_llm::{PlanDecision, Planner, ScriptedPlanner};

use crate::support::{
    answer, count_authors, no_delay_fallback, wait_until_terminal, TestEngine, SEEDED_AUTHORS,
};

// ============================================================================
// Answered Objectives
// ============================================================================

#[tokio::test]
async fn test_count_distinct_authors() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        count_authors(),
        answer("42 authors"),
    ]));
    let engine = TestEngine::new(vec![planner.clone() as Arc<dyn Planner>]);
    let coordinator = &engine.coordinator;

    let id = coordinator
        .create_objective("research", "How many distinct authors posted stories?")
        .await
        .unwrap();
    let conversation = wait_until_terminal(coordinator, id).await;

    assert_eq!(conversation.status(), ConversationStatus::Answered);
    assert_eq!(conversation.terminal_reason(), Some(TerminalReason::Answered));
    assert_eq!(conversation.steps().len(), 2);

    let tool_step = &conversation.steps()[0];
    assert_eq!(tool_step.step_type(), StepType::ToolExecution);
    assert_eq!(tool_step.status(), StepStatus::Completed);
    assert_eq!(tool_step.tool_calls().len(), 1);
    let call = &tool_step.tool_calls()[0];
    assert_eq!(call.tool_name(), "query_sql");
    assert_eq!(call.result().unwrap()["rows"], json!([[SEEDED_AUTHORS]]));

    let final_step = &conversation.steps()[1];
    assert_eq!(final_step.step_type(), StepType::Synthesis);
    assert_eq!(final_step.status(), StepStatus::Completed);
    assert_eq!(final_step.results().unwrap().summary, "42 authors");
    assert_eq!(planner.calls(), 2);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_tool_params_are_recorded_not_fatal() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        PlanDecision::InvokeTool {
            name: "query_sql".into(),
            params: json!({"query": "DELETE FROM hn_items"}),
        },
        PlanDecision::InvokeTool {
            name: "no_such_tool".into(),
            params: json!({}),
        },
        answer("Could not modify the dataset."),
    ]));
    let engine = TestEngine::new(vec![planner as Arc<dyn Planner>]);
    let coordinator = &engine.coordinator;

    let id = coordinator.create_objective("research", "q").await.unwrap();
    let conversation = wait_until_terminal(coordinator, id).await;

    assert_eq!(conversation.status(), ConversationStatus::Answered);
    assert_eq!(conversation.steps().len(), 3);
    for step in &conversation.steps()[..2] {
        let call = &step.tool_calls()[0];
        assert!(!call.is_success());
        assert!(call.error().is_some());
        assert!(call.result().is_none());
    }
    assert_eq!(engine.coordinator.sandbox().tool_metrics("query_sql").unwrap().failures, 1);

    coordinator.shutdown().await;
}

// ============================================================================
// Iteration Cap
// ============================================================================

#[tokio::test]
async fn test_never_answering_planner_hits_iteration_cap() {
    let planner = Arc::new(ScriptedPlanner::repeating(count_authors()));
    let analysis = AnalysisConfig {
        max_iterations: 10,
        ..AnalysisConfig::default()
    };
    let engine = TestEngine::with_config(
        vec![planner.clone() as Arc<dyn Planner>],
        no_delay_fallback(0),
        analysis,
    );
    let coordinator = &engine.coordinator;

    let id = coordinator.create_objective("research", "loop forever").await.unwrap();
    let conversation = wait_until_terminal(coordinator, id).await;

    assert_eq!(planner.calls(), 10);
    assert_eq!(
        conversation.terminal_reason(),
        Some(TerminalReason::MaxIterationsExceeded)
    );
    assert_eq!(conversation.status(), ConversationStatus::Failed);
    assert_eq!(conversation.steps().len(), 11);

    let last = conversation.last_step().unwrap();
    assert_eq!(last.status(), StepStatus::Failed);
    assert_eq!(last.terminal_reason(), Some("max_iterations_exceeded"));
    assert!(conversation.steps()[..10]
        .iter()
        .all(|s| s.status() == StepStatus::Completed));

    coordinator.shutdown().await;
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_streamed_content_matches_final_answer() {
    let text = "There are 42 distinct authors in the seeded dataset.";
    let planner: Arc<dyn Planner> = Arc::new(
        ScriptedPlanner::new(vec![answer(text)]).with_delay(Duration::from_millis(100)),
    );
    let engine = TestEngine::new(vec![planner]);
    let coordinator = &engine.coordinator;

    let id = coordinator.create_objective("research", "q").await.unwrap();
    let mut subscription = coordinator.subscribe(id).await.unwrap();
    assert!(subscription.is_live());

    let mut streamed = String::new();
    let mut steps = Vec::new();
    while let Some(event) = subscription.next().await {
        match event {
            StreamEvent::Content { content } => streamed.push_str(&content),
            StreamEvent::ToolExecution { step } => steps.push(step),
        }
    }

    assert_eq!(streamed, text);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].results().unwrap().summary, text);
    assert_eq!(steps[0].llm_response.as_deref(), Some(text));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_subscription_after_finish_replays_ledger() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::new(vec![
        count_authors(),
        answer("42 authors"),
    ]))]);
    let coordinator = &engine.coordinator;

    let id = coordinator.create_objective("research", "q").await.unwrap();
    wait_until_terminal(coordinator, id).await;

    let mut subscription = coordinator.subscribe(id).await.unwrap();
    let mut ids = Vec::new();
    while let Some(event) = subscription.next().await {
        ids.extend(event.step_id());
    }
    assert_eq!(ids, vec![1, 2]);

    coordinator.shutdown().await;
}

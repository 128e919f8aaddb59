//! Coordinator Integration Tests
//!
//! Verifies multi-objective behavior:
//! - Cancelling one objective leaves another's ledger untouched
//! - Follow-up messages to a running objective reach the ledger
//! - Objective listing filters by workspace
//! - Unknown objective ids are NotFound

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use pixlie_core::{ConversationStatus, StepStatus, TerminalReason};
use pixlie_engine::models::objective::ObjectiveStatus;
use pixlie_engine::AppError;
use pixlie_llm::{PlanDecision, ScriptedPlanner};

use crate::support::{answer, ask, wait_for_status, wait_until_terminal, TestEngine};

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_leaves_other_objectives_untouched() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::repeating(ask(
        "Which year should I look at?",
    )))]);
    let coordinator = &engine.coordinator;

    let first = coordinator.create_objective("research", "first").await.unwrap();
    let second = coordinator.create_objective("research", "second").await.unwrap();
    wait_for_status(coordinator, first, ConversationStatus::AwaitingUser).await;
    let before = wait_for_status(coordinator, second, ConversationStatus::AwaitingUser).await;
    let before_json = serde_json::to_string(&before).unwrap();

    coordinator.cancel(first).await.unwrap();
    let cancelled = wait_until_terminal(coordinator, first).await;
    assert_eq!(cancelled.terminal_reason(), Some(TerminalReason::UserCancelled));
    assert_eq!(cancelled.last_step().unwrap().status(), StepStatus::Failed);
    assert_eq!(
        coordinator.objective(first).await.unwrap().status,
        ObjectiveStatus::Cancelled
    );

    let after = coordinator.conversation(second).await.unwrap();
    assert_eq!(serde_json::to_string(&after).unwrap(), before_json);
    assert_eq!(
        coordinator.objective(second).await.unwrap().status,
        ObjectiveStatus::Active
    );

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_reply_resumes_only_its_objective() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::new(vec![
        ask("Which year?"),
        ask("Which year?"),
        answer("42 authors in 2024"),
    ]))]);
    let coordinator = &engine.coordinator;

    let first = coordinator.create_objective("research", "first").await.unwrap();
    wait_for_status(coordinator, first, ConversationStatus::AwaitingUser).await;
    let second = coordinator.create_objective("research", "second").await.unwrap();
    wait_for_status(coordinator, second, ConversationStatus::AwaitingUser).await;

    coordinator.submit_user_response(first, "2024").await.unwrap();
    let answered = wait_until_terminal(coordinator, first).await;
    assert_eq!(answered.status(), ConversationStatus::Answered);
    let ask_step = &answered.steps()[0];
    assert_eq!(ask_step.results().unwrap().data["answer"], "2024");

    let waiting = coordinator.conversation(second).await.unwrap();
    assert_eq!(waiting.status(), ConversationStatus::AwaitingUser);
    assert_eq!(waiting.steps().len(), 1);

    coordinator.shutdown().await;
}

// ============================================================================
// Follow-ups
// ============================================================================

#[tokio::test]
async fn test_follow_up_is_recorded_in_ledger() {
    let planner = ScriptedPlanner::new(vec![
        PlanDecision::NeedMoreIterations {
            reason: "checking item types".into(),
        },
        PlanDecision::NeedMoreIterations {
            reason: "still checking".into(),
        },
        answer("42 authors, stories only"),
    ])
    .with_delay(Duration::from_millis(50));
    let engine = TestEngine::new(vec![Arc::new(planner)]);
    let coordinator = &engine.coordinator;

    let id = coordinator.create_objective("research", "q").await.unwrap();
    coordinator
        .submit_user_response(id, "only count stories")
        .await
        .unwrap();
    let conversation = wait_until_terminal(coordinator, id).await;

    assert_eq!(conversation.status(), ConversationStatus::Answered);
    let recorded: Vec<&str> = conversation
        .steps()
        .iter()
        .filter_map(|s| s.results())
        .filter_map(|r| r.data.get("user_messages"))
        .flat_map(|m| m.as_array().into_iter().flatten())
        .filter_map(|m| m.as_str())
        .collect();
    assert_eq!(recorded, vec!["only count stories"]);

    coordinator.shutdown().await;
}

// ============================================================================
// Listing and Lookup
// ============================================================================

#[tokio::test]
async fn test_list_objectives_by_workspace() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::repeating(answer(
        "42 authors",
    )))]);
    let coordinator = &engine.coordinator;

    let a = coordinator.create_objective("alpha", "a").await.unwrap();
    let b = coordinator.create_objective("beta", "b").await.unwrap();
    wait_until_terminal(coordinator, a).await;
    wait_until_terminal(coordinator, b).await;

    let alpha = coordinator.list_objectives(Some("alpha")).await.unwrap();
    assert_eq!(alpha.len(), 1);
    assert_eq!(alpha[0].id, a);
    assert_eq!(alpha[0].status, ObjectiveStatus::Completed);
    assert_eq!(coordinator.list_objectives(None).await.unwrap().len(), 2);

    let mut names = coordinator.workspace_names();
    names.sort();
    assert_eq!(names, vec!["alpha", "beta"]);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_unknown_objective_is_not_found() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::repeating(answer("x")))]);
    let coordinator = &engine.coordinator;
    let missing = Uuid::new_v4();

    assert!(matches!(
        coordinator.conversation(missing).await.unwrap_err(),
        AppError::NotFound(_)
    ));
    assert!(matches!(
        coordinator.cancel(missing).await.unwrap_err(),
        AppError::NotFound(_)
    ));
    assert!(matches!(
        coordinator.submit_user_response(missing, "hi").await.unwrap_err(),
        AppError::NotFound(_)
    ));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_empty_objective_is_rejected() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::repeating(answer("x")))]);
    let err = engine
        .coordinator
        .create_objective("research", "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    engine.coordinator.shutdown().await;
}

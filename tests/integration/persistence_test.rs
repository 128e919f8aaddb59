//! Workspace Persistence Integration Tests
//!
//! Verifies save/load across coordinator restarts:
//! - A workspace saved mid-conversation reloads with the same steps
//! - Running objectives come back Pending and resume after interruption
//! - Finished objectives reload unchanged and are not restarted

use std::sync::Arc;

use pixlie_core::{ConversationStatus, StepStatus, StepType, TerminalReason};
use pixlie_engine::models::objective::ObjectiveStatus;
use pixlie_engine::utils::paths::workspace_db_path;
use pixlie_llm::ScriptedPlanner;

use crate::support::{answer, ask, count_authors, wait_for_status, wait_until_terminal, TestEngine};

#[tokio::test]
async fn test_mid_conversation_save_and_resume() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::new(vec![
        count_authors(),
        ask("Which year?"),
    ]))]);
    let coordinator = &engine.coordinator;

    let id = coordinator
        .create_objective("research", "How many authors posted in a given year?")
        .await
        .unwrap();
    let saved = wait_for_status(coordinator, id, ConversationStatus::AwaitingUser).await;
    coordinator.save_workspace("research").await.unwrap();
    assert!(workspace_db_path(&engine.workspaces_dir().join("research")).exists());
    coordinator.shutdown().await;

    let reopened = engine.restart(vec![Arc::new(ScriptedPlanner::new(vec![answer(
        "42 authors in 2024",
    )]))]);
    let name = reopened
        .open_workspace(&engine.workspaces_dir().join("research"))
        .await
        .unwrap();
    assert_eq!(name, "research");

    let loaded = reopened.conversation(id).await.unwrap();
    assert_eq!(loaded.steps(), saved.steps());
    assert_eq!(loaded.user_query(), saved.user_query());
    assert_eq!(loaded.status(), ConversationStatus::AwaitingUser);
    assert_eq!(
        reopened.objective(id).await.unwrap().status,
        ObjectiveStatus::Pending
    );

    assert_eq!(reopened.resume_pending("research").await.unwrap(), vec![id]);
    let finished = wait_until_terminal(&reopened, id).await;

    assert_eq!(finished.terminal_reason(), Some(TerminalReason::Answered));
    let steps = finished.steps();
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].step_type(), StepType::ToolExecution);
    assert_eq!(steps[0].status(), StepStatus::Completed);
    assert_eq!(steps[1].status(), StepStatus::Failed);
    assert_eq!(steps[1].results().unwrap().data["interrupted"], true);
    assert_eq!(steps[2].step_type(), StepType::Synthesis);
    assert_eq!(steps[2].results().unwrap().summary, "42 authors in 2024");

    reopened.shutdown().await;
}

#[tokio::test]
async fn test_finished_objectives_reload_unchanged() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::new(vec![
        count_authors(),
        answer("42 authors"),
    ]))]);
    let coordinator = &engine.coordinator;

    let id = coordinator.create_objective("research", "q").await.unwrap();
    let finished = wait_until_terminal(coordinator, id).await;
    coordinator.shutdown().await;

    let reopened = engine.restart(vec![Arc::new(ScriptedPlanner::new(vec![]))]);
    reopened
        .open_workspace(&engine.workspaces_dir().join("research"))
        .await
        .unwrap();

    assert_eq!(reopened.conversation(id).await.unwrap(), finished);
    assert_eq!(
        reopened.objective(id).await.unwrap().status,
        ObjectiveStatus::Completed
    );
    assert!(reopened.resume_pending("research").await.unwrap().is_empty());

    let summaries = reopened.list_objectives(Some("research")).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].step_count, 2);
    assert!(!summaries[0].unsaved);

    reopened.shutdown().await;
}

#[tokio::test]
async fn test_objective_in_existing_workspace_extends_it() {
    let engine = TestEngine::new(vec![Arc::new(ScriptedPlanner::repeating(answer(
        "42 authors",
    )))]);
    let first = engine
        .coordinator
        .create_objective("research", "first")
        .await
        .unwrap();
    wait_until_terminal(&engine.coordinator, first).await;
    engine.coordinator.shutdown().await;

    let reopened = engine.restart(vec![Arc::new(ScriptedPlanner::repeating(answer(
        "still 42",
    )))]);
    let second = reopened.create_objective("research", "second").await.unwrap();
    wait_until_terminal(&reopened, second).await;

    let ids: Vec<_> = reopened
        .list_objectives(Some("research"))
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![first, second]);

    reopened.shutdown().await;
}

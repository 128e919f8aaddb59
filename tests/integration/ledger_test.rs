//! Ledger Integration Tests
//!
//! Verifies the conversation ledger contract:
//! - Step status only moves forward (Pending -> InProgress -> Completed/Failed)
//! - Finished steps reject further writes
//! - Every tool execution carries exactly one of result or error
//! - Terminal conversations accept no new steps

use serde_json::json;
use uuid::Uuid;

use pixlie_core::{
    Conversation, ConversationStatus, StepResult, StepStatus, StepType, TerminalReason,
    ToolExecution,
};

// ============================================================================
// Helpers
// ============================================================================

fn conversation() -> Conversation {
    Conversation::new(Uuid::new_v4(), "How many distinct authors posted stories?")
}

const ALL_STATUSES: [StepStatus; 4] = [
    StepStatus::Pending,
    StepStatus::InProgress,
    StepStatus::Completed,
    StepStatus::Failed,
];

// ============================================================================
// Step Status Tests
// ============================================================================

#[test]
fn test_status_transitions_are_forward_only() {
    for from in ALL_STATUSES {
        for to in ALL_STATUSES {
            let expected = matches!(
                (from, to),
                (StepStatus::Pending, StepStatus::InProgress)
                    | (StepStatus::Pending, StepStatus::Completed)
                    | (StepStatus::Pending, StepStatus::Failed)
                    | (StepStatus::InProgress, StepStatus::Completed)
                    | (StepStatus::InProgress, StepStatus::Failed)
            );
            assert_eq!(
                from.can_transition_to(to),
                expected,
                "{} -> {}",
                from,
                to
            );
        }
    }
}

#[test]
fn test_finished_step_rejects_writes() {
    let mut conv = conversation();
    let id = conv.begin_step(StepType::ToolExecution).unwrap();
    conv.start_step(id).unwrap();
    conv.complete_step(id, Some(StepResult::new(json!({}), "done")))
        .unwrap();

    assert!(conv.start_step(id).is_err());
    assert!(conv
        .fail_step(id, StepResult::new(json!({}), "late failure"))
        .is_err());
    assert!(conv.set_step_type(id, StepType::Synthesis).is_err());
    assert!(conv
        .record_tool_execution(
            id,
            ToolExecution::success("query_sql", json!({}), json!({"rows": []}), 1)
        )
        .is_err());
    assert_eq!(conv.step(id).unwrap().status(), StepStatus::Completed);
}

#[test]
fn test_step_ids_are_sequential_and_status_recorded() {
    let mut conv = conversation();
    let first = conv.begin_step(StepType::Planning).unwrap();
    conv.start_step(first).unwrap();
    conv.fail_step(first, StepResult::new(json!({}), "no plan"))
        .unwrap();
    let second = conv.begin_step(StepType::Planning).unwrap();

    assert_eq!((first, second), (1, 2));
    assert_eq!(conv.steps()[0].status(), StepStatus::Failed);
    assert_eq!(conv.steps()[1].status(), StepStatus::Pending);
}

#[test]
fn test_terminal_conversation_accepts_no_steps() {
    let mut conv = conversation();
    let id = conv.begin_step(StepType::Synthesis).unwrap();
    conv.start_step(id).unwrap();
    conv.complete_step(id, Some(StepResult::new(json!({}), "42 authors")))
        .unwrap();
    conv.finish(TerminalReason::Answered).unwrap();

    assert_eq!(conv.status(), ConversationStatus::Answered);
    assert!(conv.begin_step(StepType::Planning).is_err());
    assert!(conv.finish(TerminalReason::UserCancelled).is_err());
    assert!(conv.set_status(ConversationStatus::Active).is_err());
}

// ============================================================================
// Tool Execution Tests
// ============================================================================

#[test]
fn test_tool_execution_outcome_is_exclusive() {
    let ok = ToolExecution::success("query_sql", json!({"query": "SELECT 1"}), json!({"rows": [[1]]}), 3);
    let failed = ToolExecution::failure("query_sql", json!({"query": "DROP"}), "only SELECT", 1);

    assert!(ok.result().is_some() && ok.error().is_none());
    assert!(failed.result().is_none() && failed.error().is_some());

    let ok_json = serde_json::to_value(&ok).unwrap();
    assert!(ok_json.get("result").is_some());
    assert!(ok_json.get("error").is_none());
    let failed_json = serde_json::to_value(&failed).unwrap();
    assert!(failed_json.get("result").is_none());
    assert_eq!(failed_json["error"], "only SELECT");
}

#[test]
fn test_ambiguous_tool_execution_is_rejected() {
    let both = json!({
        "tool_name": "query_sql",
        "parameters": {},
        "result": {"rows": []},
        "error": "boom",
        "execution_time_ms": 1
    });
    let neither = json!({
        "tool_name": "query_sql",
        "parameters": {},
        "execution_time_ms": 1
    });

    assert!(serde_json::from_value::<ToolExecution>(both).is_err());
    assert!(serde_json::from_value::<ToolExecution>(neither).is_err());
}

#[test]
fn test_conversation_json_round_trip_keeps_steps() {
    let mut conv = conversation();
    let id = conv.begin_step(StepType::ToolExecution).unwrap();
    conv.start_step(id).unwrap();
    conv.record_tool_execution(
        id,
        ToolExecution::failure("search_items", json!({"query": ""}), "empty query", 0),
    )
    .unwrap();
    conv.complete_step(id, None).unwrap();

    let restored: Conversation =
        serde_json::from_str(&serde_json::to_string(&conv).unwrap()).unwrap();
    assert_eq!(restored, conv);
    assert_eq!(restored.steps()[0].tool_calls()[0].error(), Some("empty query"));
}

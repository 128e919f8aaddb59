//! Provider Fallback Integration Tests
//!
//! Verifies how the provider chain shows up in the ledger:
//! - Every provider is tried in order, each with its retry budget
//! - A fully failed chain ends the objective with ProviderError
//! - A healthy provider later in the chain answers the objective

use std::sync::Arc;

use pixlie_core::{ConversationStatus, StepStatus, TerminalReason};
use pixlie_engine::models::settings::AnalysisConfig;
use pixlie_llm::{FailingPlanner, LlmError, Planner, ScriptedPlanner};

use crate::support::{answer, no_delay_fallback, wait_until_terminal, TestEngine};

// ============================================================================
// Helpers
// ============================================================================

fn server_error() -> LlmError {
    LlmError::ServerError {
        message: "overloaded".into(),
        status: Some(529),
    }
}

fn failing(name: &str) -> Arc<FailingPlanner> {
    Arc::new(FailingPlanner::new(name, server_error()))
}

async fn run_failing_chain(retries_per_provider: u32) -> (Vec<Arc<FailingPlanner>>, u32, serde_json::Value) {
    let planners = vec![failing("primary"), failing("secondary"), failing("tertiary")];
    let chain: Vec<Arc<dyn Planner>> = planners.iter().map(|p| p.clone() as Arc<dyn Planner>).collect();
    let engine = TestEngine::with_config(
        chain,
        no_delay_fallback(retries_per_provider),
        AnalysisConfig::default(),
    );
    let coordinator = &engine.coordinator;

    let id = coordinator.create_objective("research", "q").await.unwrap();
    let conversation = wait_until_terminal(coordinator, id).await;

    assert_eq!(conversation.status(), ConversationStatus::Failed);
    assert_eq!(conversation.terminal_reason(), Some(TerminalReason::ProviderError));
    assert_eq!(conversation.steps().len(), 1);

    let step = &conversation.steps()[0];
    assert_eq!(step.status(), StepStatus::Failed);
    assert_eq!(step.terminal_reason(), Some("provider_error"));
    let usage_attempts = step.llm_usage.as_ref().unwrap().attempts;
    let attempts = step.results().unwrap().data["attempts"].clone();

    coordinator.shutdown().await;
    (planners, usage_attempts, attempts)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_all_providers_fail_without_retries() {
    let (planners, usage_attempts, attempts) = run_failing_chain(0).await;

    assert_eq!(usage_attempts, 3);
    let providers: Vec<&str> = attempts
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["provider"].as_str().unwrap())
        .collect();
    assert_eq!(providers, vec!["primary", "secondary", "tertiary"]);
    assert!(planners.iter().all(|p| p.calls() == 1));
}

#[tokio::test]
async fn test_default_retry_doubles_attempts() {
    let (planners, usage_attempts, attempts) = run_failing_chain(1).await;

    assert_eq!(usage_attempts, 6);
    assert_eq!(attempts.as_array().unwrap().len(), 6);
    assert!(planners.iter().all(|p| p.calls() == 2));
}

#[tokio::test]
async fn test_later_provider_answers() {
    let primary = failing("primary");
    let backup = Arc::new(ScriptedPlanner::new(vec![answer("42 authors")]).with_name("backup"));
    let engine = TestEngine::new(vec![primary.clone() as Arc<dyn Planner>, backup.clone()]);
    let coordinator = &engine.coordinator;

    let id = coordinator.create_objective("research", "q").await.unwrap();
    let conversation = wait_until_terminal(coordinator, id).await;

    assert_eq!(conversation.status(), ConversationStatus::Answered);
    let usage = conversation.steps()[0].llm_usage.as_ref().unwrap();
    assert_eq!(usage.provider, "backup");
    assert_eq!(usage.attempts, 2);
    assert_eq!(primary.calls(), 1);
    assert_eq!(backup.calls(), 1);

    coordinator.shutdown().await;
}

//! Planning Interface
//!
//! The analysis loop talks to language models only through `Planner`:
//!
//! - `PlanRequest` - objective, bounded history view, tools, iteration counters
//! - `PlanDecision` - what the loop should do next
//! - `PlanOutcome` - the decision plus the raw exchange and usage

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::LlmResult;
use crate::types::{ToolDefinition, UsageStats};
use pixlie_core::streaming::ProviderEvent;

// ============================================================================
// Decisions
// ============================================================================

/// The next action chosen by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanDecision {
    /// Run a registered tool with the given parameters
    InvokeTool { name: String, params: Value },
    /// Suspend and ask the user a clarifying question
    AskUser { prompt: String },
    /// Finish the objective with an answer
    FinalAnswer {
        text: String,
        #[serde(default)]
        data: Value,
    },
    /// Keep going without calling a tool this iteration
    NeedMoreIterations { reason: String },
}

impl PlanDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            PlanDecision::InvokeTool { .. } => "invoke_tool",
            PlanDecision::AskUser { .. } => "ask_user",
            PlanDecision::FinalAnswer { .. } => "final_answer",
            PlanDecision::NeedMoreIterations { .. } => "need_more_iterations",
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// One entry of the conversation as shown to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    /// A tool call and what came back
    ToolCall {
        step_id: u32,
        tool_name: String,
        parameters: Value,
        /// Result payload, possibly summarized
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Text the assistant produced (questions, reasoning notes)
    AssistantNote { step_id: u32, text: String },
    /// Text the user sent (answers, follow-ups)
    UserMessage { step_id: u32, text: String },
}

impl HistoryEntry {
    pub fn step_id(&self) -> u32 {
        match self {
            HistoryEntry::ToolCall { step_id, .. }
            | HistoryEntry::AssistantNote { step_id, .. }
            | HistoryEntry::UserMessage { step_id, .. } => *step_id,
        }
    }
}

/// Everything a planner needs for one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    /// Workspace the objective belongs to; keys rate limiting
    pub workspace: String,
    pub objective: String,
    /// Folded description of steps outside the window
    pub earlier_summary: Option<String>,
    /// Most recent steps in order
    pub history: Vec<HistoryEntry>,
    pub tools: Vec<ToolDefinition>,
    /// 1-based index of this planning call
    pub iteration: u32,
    pub max_iterations: u32,
}

impl PlanRequest {
    pub fn new(
        workspace: impl Into<String>,
        objective: impl Into<String>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            objective: objective.into(),
            earlier_summary: None,
            history: Vec::new(),
            tools,
            iteration: 1,
            max_iterations: 10,
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    pub fn with_iteration(mut self, iteration: u32, max_iterations: u32) -> Self {
        self.iteration = iteration;
        self.max_iterations = max_iterations;
        self
    }

    /// Opening text of the prompt: objective plus folded history.
    pub fn prompt_text(&self) -> String {
        let mut text = format!("Objective: {}", self.objective);
        if let Some(summary) = &self.earlier_summary {
            text.push_str("\n\nEarlier steps (summarized):\n");
            text.push_str(summary);
        }
        text
    }

    /// Iteration budget line appended after the history.
    pub fn budget_text(&self) -> String {
        let remaining = self.max_iterations.saturating_sub(self.iteration);
        format!(
            "Planning call {} of {} ({} remaining after this one).",
            self.iteration, self.max_iterations, remaining
        )
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// A decision together with the exchange that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub decision: PlanDecision,
    /// Raw text returned by the model, if any
    pub response_text: Option<String>,
    pub usage: UsageStats,
    /// Planner that produced the decision
    pub provider: String,
    /// Attempts spent, including retries and fallbacks
    pub attempts: u32,
}

impl PlanOutcome {
    pub fn new(decision: PlanDecision, provider: impl Into<String>) -> Self {
        Self {
            decision,
            response_text: None,
            usage: UsageStats::default(),
            provider: provider.into(),
            attempts: 1,
        }
    }
}

// ============================================================================
// Planner Trait
// ============================================================================

/// Anything that can choose the next loop action.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Name used in logs and attempt records.
    fn name(&self) -> &str;

    /// Produce the next decision.
    async fn plan(&self, request: &PlanRequest) -> LlmResult<PlanOutcome>;

    /// Produce the next decision while streaming text.
    ///
    /// Sends `TextDelta` events followed by exactly one `Complete` marker on
    /// success. The sender is dropped when the call returns.
    async fn plan_stream(
        &self,
        request: &PlanRequest,
        tx: mpsc::Sender<ProviderEvent>,
    ) -> LlmResult<PlanOutcome>;
}

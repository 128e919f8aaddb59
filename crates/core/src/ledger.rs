//! Conversation Ledger
//!
//! Append-only record of every step an analysis loop takes for one objective:
//!
//! - `Conversation` - ledger root; owns the ordered steps
//! - `ConversationStep` - one plan→act→observe iteration
//! - `ToolExecution` - one immutable tool invocation record
//! - `StepStatus` - forward-only lifecycle (Pending → InProgress → Completed | Failed)
//!
//! All mutation goes through `Conversation` so that step ids stay monotonic and
//! step status never regresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

// ============================================================================
// Enums
// ============================================================================

/// Kind of work a step represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Planning,
    ToolExecution,
    Synthesis,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Planning => "planning",
            StepType::ToolExecution => "tool_execution",
            StepType::Synthesis => "synthesis",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    fn rank(&self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::InProgress => 1,
            StepStatus::Completed | StepStatus::Failed => 2,
        }
    }

    /// Whether the step has reached Completed or Failed.
    pub fn is_finished(&self) -> bool {
        self.rank() == 2
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall status of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    AwaitingUser,
    Answered,
    Failed,
    Cancelled,
}

impl ConversationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversationStatus::Answered | ConversationStatus::Failed | ConversationStatus::Cancelled
        )
    }
}

/// Named reason recorded when a loop reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The planner produced a final answer
    Answered,
    /// The iteration cap was reached
    MaxIterationsExceeded,
    /// Every configured provider failed
    ProviderError,
    /// The same tool failed too many times in a row
    ToolFailureLimit,
    /// No user reply arrived before the configured timeout
    AskUserTimeout,
    /// The objective was cancelled
    UserCancelled,
    /// Unexpected engine failure
    Internal,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::Answered => "answered",
            TerminalReason::MaxIterationsExceeded => "max_iterations_exceeded",
            TerminalReason::ProviderError => "provider_error",
            TerminalReason::ToolFailureLimit => "tool_failure_limit",
            TerminalReason::AskUserTimeout => "ask_user_timeout",
            TerminalReason::UserCancelled => "user_cancelled",
            TerminalReason::Internal => "internal",
        }
    }

    /// Conversation status this reason terminates in.
    pub fn conversation_status(&self) -> ConversationStatus {
        match self {
            TerminalReason::Answered => ConversationStatus::Answered,
            TerminalReason::UserCancelled => ConversationStatus::Cancelled,
            _ => ConversationStatus::Failed,
        }
    }
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ToolExecution
// ============================================================================

/// Outcome of a tool invocation. Exactly one of result or error.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
}

/// One tool invocation inside a step. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ToolExecutionRecord", into = "ToolExecutionRecord")]
pub struct ToolExecution {
    tool_name: String,
    parameters: Value,
    outcome: ToolOutcome,
    execution_time_ms: u64,
}

/// Wire shape of `ToolExecution`: `result` and `error` as sibling optionals.
#[derive(Serialize, Deserialize)]
struct ToolExecutionRecord {
    tool_name: String,
    parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    execution_time_ms: u64,
}

impl TryFrom<ToolExecutionRecord> for ToolExecution {
    type Error = String;

    fn try_from(record: ToolExecutionRecord) -> Result<Self, Self::Error> {
        let outcome = match (record.result, record.error) {
            (Some(result), None) => ToolOutcome::Success(result),
            (None, Some(error)) => ToolOutcome::Failure(error),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "tool execution '{}' has both result and error",
                    record.tool_name
                ))
            }
            (None, None) => {
                return Err(format!(
                    "tool execution '{}' has neither result nor error",
                    record.tool_name
                ))
            }
        };
        Ok(Self {
            tool_name: record.tool_name,
            parameters: record.parameters,
            outcome,
            execution_time_ms: record.execution_time_ms,
        })
    }
}

impl From<ToolExecution> for ToolExecutionRecord {
    fn from(exec: ToolExecution) -> Self {
        let (result, error) = match exec.outcome {
            ToolOutcome::Success(v) => (Some(v), None),
            ToolOutcome::Failure(e) => (None, Some(e)),
        };
        Self {
            tool_name: exec.tool_name,
            parameters: exec.parameters,
            result,
            error,
            execution_time_ms: exec.execution_time_ms,
        }
    }
}

impl ToolExecution {
    /// Record a successful invocation. A JSON `null` result is stored as `{}`
    /// so the serialized record always carries a non-null `result`.
    pub fn success(
        tool_name: impl Into<String>,
        parameters: Value,
        result: Value,
        execution_time_ms: u64,
    ) -> Self {
        let result = if result.is_null() {
            Value::Object(Default::default())
        } else {
            result
        };
        Self {
            tool_name: tool_name.into(),
            parameters,
            outcome: ToolOutcome::Success(result),
            execution_time_ms,
        }
    }

    /// Record a failed invocation.
    pub fn failure(
        tool_name: impl Into<String>,
        parameters: Value,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            outcome: ToolOutcome::Failure(error.into()),
            execution_time_ms,
        }
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn outcome(&self) -> &ToolOutcome {
        &self.outcome
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Success(v) => Some(v),
            ToolOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Success(_) => None,
            ToolOutcome::Failure(e) => Some(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.execution_time_ms
    }
}

// ============================================================================
// ConversationStep
// ============================================================================

/// Structured outcome of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub data: Value,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
}

impl StepResult {
    pub fn new(data: Value, summary: impl Into<String>) -> Self {
        Self {
            data,
            summary: summary.into(),
            next_action: None,
        }
    }

    pub fn with_next_action(mut self, action: impl Into<String>) -> Self {
        self.next_action = Some(action.into());
        self
    }

    /// Result of a terminal step: `data = {"reason": .., "message": ..}`.
    pub fn terminal(reason: TerminalReason, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            data: serde_json::json!({
                "reason": reason.as_str(),
                "message": message,
            }),
            summary: message,
            next_action: Some("terminate".to_string()),
        }
    }
}

/// Token accounting for the provider call made in a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Provider that answered (after any fallback)
    pub provider: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Number of provider attempts spent, including retries
    pub attempts: u32,
}

/// One iteration of the analysis loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStep {
    step_id: u32,
    step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_usage: Option<LlmUsage>,
    #[serde(default)]
    tool_calls: Vec<ToolExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    results: Option<StepResult>,
    status: StepStatus,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl ConversationStep {
    fn new(step_id: u32, step_type: StepType) -> Self {
        Self {
            step_id,
            step_type,
            llm_request: None,
            llm_response: None,
            llm_usage: None,
            tool_calls: Vec::new(),
            results: None,
            status: StepStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn step_id(&self) -> u32 {
        self.step_id
    }

    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn tool_calls(&self) -> &[ToolExecution] {
        &self.tool_calls
    }

    pub fn results(&self) -> Option<&StepResult> {
        self.results.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Terminal reason recorded in this step's result, if any.
    pub fn terminal_reason(&self) -> Option<&str> {
        self.results
            .as_ref()
            .and_then(|r| r.data.get("reason"))
            .and_then(|v| v.as_str())
    }

    fn transition(&mut self, next: StepStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::invalid_state(format!(
                "step {} cannot move from {} to {}",
                self.step_id, self.status, next
            )));
        }
        self.status = next;
        if next.is_finished() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Ledger root for one objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: Uuid,
    objective_id: Uuid,
    user_query: String,
    status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    terminal_reason: Option<TerminalReason>,
    steps: Vec<ConversationStep>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(objective_id: Uuid, user_query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            objective_id,
            user_query: user_query.into(),
            status: ConversationStatus::Active,
            terminal_reason: None,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a conversation from persisted parts. Steps are sorted by id.
    pub fn restore(
        id: Uuid,
        objective_id: Uuid,
        user_query: String,
        status: ConversationStatus,
        terminal_reason: Option<TerminalReason>,
        mut steps: Vec<ConversationStep>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> CoreResult<Self> {
        steps.sort_by_key(|s| s.step_id);
        if steps.windows(2).any(|w| w[0].step_id == w[1].step_id) {
            return Err(CoreError::validation(format!(
                "conversation {} has duplicate step ids",
                id
            )));
        }
        Ok(Self {
            id,
            objective_id,
            user_query,
            status,
            terminal_reason,
            steps,
            created_at,
            updated_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn objective_id(&self) -> Uuid {
        self.objective_id
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        self.terminal_reason
    }

    pub fn steps(&self) -> &[ConversationStep] {
        &self.steps
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn step(&self, step_id: u32) -> Option<&ConversationStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn last_step(&self) -> Option<&ConversationStep> {
        self.steps.last()
    }

    /// Id the next appended step will receive.
    pub fn next_step_id(&self) -> u32 {
        self.steps.last().map(|s| s.step_id + 1).unwrap_or(1)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_terminal() {
            return Err(CoreError::invalid_state(format!(
                "conversation {} is already {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    fn step_mut(&mut self, step_id: u32) -> CoreResult<&mut ConversationStep> {
        self.steps
            .iter_mut()
            .find(|s| s.step_id == step_id)
            .ok_or_else(|| CoreError::not_found(format!("Step not found: {}", step_id)))
    }

    /// Append a new `Pending` step and return its id.
    pub fn begin_step(&mut self, step_type: StepType) -> CoreResult<u32> {
        self.ensure_open()?;
        let step_id = self.next_step_id();
        self.steps.push(ConversationStep::new(step_id, step_type));
        self.touch();
        Ok(step_id)
    }

    /// Move a step from `Pending` to `InProgress`.
    pub fn start_step(&mut self, step_id: u32) -> CoreResult<()> {
        self.step_mut(step_id)?.transition(StepStatus::InProgress)?;
        self.touch();
        Ok(())
    }

    /// Re-classify a step that has not finished yet.
    pub fn set_step_type(&mut self, step_id: u32, step_type: StepType) -> CoreResult<()> {
        let step = self.step_mut(step_id)?;
        if step.status.is_finished() {
            return Err(CoreError::invalid_state(format!(
                "step {} is already {}",
                step_id, step.status
            )));
        }
        step.step_type = step_type;
        Ok(())
    }

    /// Record the text exchanged with the provider for a step.
    pub fn set_llm_exchange(
        &mut self,
        step_id: u32,
        request: Option<String>,
        response: Option<String>,
    ) -> CoreResult<()> {
        let step = self.step_mut(step_id)?;
        if step.status.is_finished() {
            return Err(CoreError::invalid_state(format!(
                "step {} is already {}",
                step_id, step.status
            )));
        }
        step.llm_request = request;
        step.llm_response = response;
        self.touch();
        Ok(())
    }

    /// Attach token usage for the step's provider call.
    pub fn set_llm_usage(&mut self, step_id: u32, usage: LlmUsage) -> CoreResult<()> {
        let step = self.step_mut(step_id)?;
        if step.status.is_finished() {
            return Err(CoreError::invalid_state(format!(
                "step {} is already {}",
                step_id, step.status
            )));
        }
        step.llm_usage = Some(usage);
        self.touch();
        Ok(())
    }

    /// Append a tool execution record to an in-progress step.
    pub fn record_tool_execution(&mut self, step_id: u32, exec: ToolExecution) -> CoreResult<()> {
        let step = self.step_mut(step_id)?;
        if step.status != StepStatus::InProgress {
            return Err(CoreError::invalid_state(format!(
                "step {} is {}, tool executions require in_progress",
                step_id, step.status
            )));
        }
        step.tool_calls.push(exec);
        self.touch();
        Ok(())
    }

    /// Mark a step `Completed`, optionally attaching its result.
    pub fn complete_step(
        &mut self,
        step_id: u32,
        result: Option<StepResult>,
    ) -> CoreResult<ConversationStep> {
        let step = self.step_mut(step_id)?;
        step.transition(StepStatus::Completed)?;
        if result.is_some() {
            step.results = result;
        }
        let snapshot = step.clone();
        self.touch();
        Ok(snapshot)
    }

    /// Mark a step `Failed` with an explanatory result.
    pub fn fail_step(&mut self, step_id: u32, result: StepResult) -> CoreResult<ConversationStep> {
        let step = self.step_mut(step_id)?;
        step.transition(StepStatus::Failed)?;
        step.results = Some(result);
        let snapshot = step.clone();
        self.touch();
        Ok(snapshot)
    }

    /// Switch between the non-terminal statuses (`Active`, `AwaitingUser`).
    pub fn set_status(&mut self, status: ConversationStatus) -> CoreResult<()> {
        self.ensure_open()?;
        if status.is_terminal() {
            return Err(CoreError::invalid_state(
                "terminal status must be set through finish()",
            ));
        }
        self.status = status;
        self.touch();
        Ok(())
    }

    /// Close the conversation with a terminal reason. Only allowed once.
    pub fn finish(&mut self, reason: TerminalReason) -> CoreResult<()> {
        self.ensure_open()?;
        self.status = reason.conversation_status();
        self.terminal_reason = Some(reason);
        self.touch();
        Ok(())
    }

    /// Fail every step left unfinished (e.g. after a restart) and reopen the
    /// conversation for replanning. Returns the ids of the interrupted steps.
    pub fn interrupt_unfinished(&mut self, message: &str) -> CoreResult<Vec<u32>> {
        self.ensure_open()?;
        let mut interrupted = Vec::new();
        for step in self.steps.iter_mut().filter(|s| !s.status.is_finished()) {
            step.transition(StepStatus::Failed)?;
            step.results = Some(StepResult::new(
                serde_json::json!({ "interrupted": true }),
                message,
            ));
            interrupted.push(step.step_id);
        }
        self.status = ConversationStatus::Active;
        self.touch();
        Ok(interrupted)
    }
}

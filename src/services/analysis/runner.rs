//! Analysis Loop
//!
//! Drives one objective through Planning, ToolExecution and Synthesis until a
//! terminal state. Every planning call produces exactly one step:
//!
//! - `InvokeTool` - the step becomes a `ToolExecution` step carrying both the
//!   LLM exchange and the tool record
//! - `NeedMoreIterations` - the Planning step completes and the loop continues
//! - `AskUser` - the step stays `InProgress` while the loop waits for a reply
//! - `FinalAnswer` - the step becomes the completed `Synthesis` step
//!
//! Terminal failures (iteration cap, provider exhaustion, repeated tool
//! failures, AskUser timeout, cancellation) are written as a `Failed` step
//! whose result data is `{"reason", "message"}`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pixlie_core::{
    ConversationStatus, CoreResult, LlmUsage, StepResult, StepType, TerminalReason, ToolContext,
    ProviderEvent,
};
use pixlie_llm::{
    ChainError, FallbackExecutionLog, PlanDecision, PlanOutcome, PlanRequest, ProviderChain,
    ToolDefinition,
};
use pixlie_tools::ToolSandbox;

use super::context_window::{ContextWindow, DECISION_KEY, USER_MESSAGES_KEY};
use super::state::{LedgerState, SharedObjective};
use crate::models::objective::ObjectiveStatus;
use crate::models::settings::AnalysisConfig;
use crate::services::persistence::AutosaveHandle;
use crate::utils::error::AppResult;

/// Capacity of the planner text channel
const PLAN_STREAM_CAPACITY: usize = 64;

/// Collaborators shared by every loop of a coordinator.
pub struct LoopServices {
    pub chain: Arc<ProviderChain>,
    pub sandbox: Arc<ToolSandbox>,
    pub config: AnalysisConfig,
}

/// Signals the coordinator holds the other end of.
pub struct LoopControl {
    /// User cancellation
    pub cancel: CancellationToken,
    /// Engine shutdown: stop without writing a terminal step
    pub halt: CancellationToken,
    /// User replies and follow-ups
    pub inbox: mpsc::UnboundedReceiver<String>,
}

/// How a loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Terminal(TerminalReason),
    /// Stopped by shutdown; the objective resumes on next open
    Halted,
}

/// One objective's loop. Consumed by [`AnalysisLoop::run`].
pub struct AnalysisLoop {
    services: Arc<LoopServices>,
    shared: Arc<SharedObjective>,
    objective_id: Uuid,
    workspace: String,
    text: String,
    control: LoopControl,
    autosave: AutosaveHandle,
    window: ContextWindow,
}

enum Planned {
    Outcome {
        outcome: PlanOutcome,
        streamed: bool,
    },
    Failed(ChainError),
    Cancelled,
    Halted,
}

impl AnalysisLoop {
    pub async fn new(
        services: Arc<LoopServices>,
        shared: Arc<SharedObjective>,
        control: LoopControl,
        autosave: AutosaveHandle,
    ) -> Self {
        let (objective_id, workspace, text) = {
            let objective = shared.objective.read().await;
            (objective.id, objective.workspace.clone(), objective.text.clone())
        };
        let window = ContextWindow::new(services.config.context_window_steps);
        Self {
            services,
            shared,
            objective_id,
            workspace,
            text,
            control,
            autosave,
            window,
        }
    }

    /// Run to a terminal state or until halted.
    pub async fn run(mut self) -> LoopExit {
        info!(objective = %self.objective_id, workspace = %self.workspace, "analysis loop started");
        self.shared.objective.write().await.status = ObjectiveStatus::Active;

        let exit = match self.drive().await {
            Ok(exit) => exit,
            Err(e) => {
                error!(objective = %self.objective_id, error = %e, "analysis loop failed");
                if let Err(e) = self
                    .terminate(None, TerminalReason::Internal, e.to_string(), &[])
                    .await
                {
                    error!(objective = %self.objective_id, error = %e, "could not record internal failure");
                }
                LoopExit::Terminal(TerminalReason::Internal)
            }
        };

        self.shared.detach_events().await;
        self.autosave.save_now(&self.workspace);
        info!(objective = %self.objective_id, exit = ?exit, "analysis loop finished");
        exit
    }

    async fn drive(&mut self) -> AppResult<LoopExit> {
        let max_iterations = self.services.config.max_iterations;
        let max_failures = self.services.config.max_consecutive_tool_failures.max(1);
        let mut planned = {
            let ledger = self.shared.ledger.read().await;
            ledger
                .conversation
                .steps()
                .iter()
                .filter(|s| s.llm_usage.is_some())
                .count() as u32
        };
        let mut failure_streak: Option<(String, u32)> = None;

        loop {
            if self.control.halt.is_cancelled() {
                return Ok(LoopExit::Halted);
            }
            if self.control.cancel.is_cancelled() {
                return self
                    .terminate(None, TerminalReason::UserCancelled, "Cancelled by user", &[])
                    .await;
            }
            if planned >= max_iterations {
                warn!(objective = %self.objective_id, max_iterations, "iteration limit reached");
                let message = format!("Stopped after {} planning iterations", max_iterations);
                return self
                    .terminate(None, TerminalReason::MaxIterationsExceeded, message, &[])
                    .await;
            }

            let consumed = self.drain_inbox();
            planned += 1;

            let step_id = self
                .mutate(|ledger| {
                    let id = ledger.conversation.begin_step(StepType::Planning)?;
                    ledger.conversation.start_step(id)?;
                    Ok(id)
                })
                .await?;

            let request = self.plan_request(step_id, planned, &consumed).await;
            debug!(objective = %self.objective_id, step_id, iteration = planned, "planning");

            let (outcome, streamed) = match self.plan(&request).await {
                Planned::Outcome { outcome, streamed } => (outcome, streamed),
                Planned::Halted => return Ok(LoopExit::Halted),
                Planned::Cancelled => {
                    return self
                        .terminate(Some(step_id), TerminalReason::UserCancelled, "Cancelled by user", &consumed)
                        .await;
                }
                Planned::Failed(ChainError::Cancelled { .. }) => {
                    return self
                        .terminate(Some(step_id), TerminalReason::UserCancelled, "Planning cancelled", &consumed)
                        .await;
                }
                Planned::Failed(err) => {
                    return self.provider_failure(step_id, &request, err, &consumed).await;
                }
            };

            let usage = LlmUsage {
                provider: outcome.provider.clone(),
                input_tokens: outcome.usage.input_tokens,
                output_tokens: outcome.usage.output_tokens,
                attempts: outcome.attempts,
            };
            let prompt = request.prompt_text();
            let response = outcome.response_text.clone();
            self.mutate(|ledger| {
                ledger
                    .conversation
                    .set_llm_exchange(step_id, Some(prompt), response)?;
                ledger.conversation.set_llm_usage(step_id, usage)
            })
            .await?;
            debug!(
                objective = %self.objective_id,
                step_id,
                decision = outcome.decision.kind(),
                provider = %outcome.provider,
                "planner decided"
            );

            match outcome.decision {
                PlanDecision::InvokeTool { name, params } => {
                    let Some(success) = self.invoke_tool(step_id, &name, params, &consumed).await?
                    else {
                        return self.interrupted_tool(step_id, &consumed).await;
                    };
                    if success {
                        failure_streak = None;
                        continue;
                    }
                    let count = match &failure_streak {
                        Some((tool, n)) if *tool == name => n + 1,
                        _ => 1,
                    };
                    failure_streak = Some((name.clone(), count));
                    if count >= max_failures {
                        let message = format!("Tool {} failed {} times in a row", name, count);
                        return self
                            .terminate(None, TerminalReason::ToolFailureLimit, message, &[])
                            .await;
                    }
                }
                PlanDecision::NeedMoreIterations { reason } => {
                    let data = with_messages(
                        json!({ DECISION_KEY: "need_more_iterations", "reason": reason }),
                        &consumed,
                    );
                    self.complete(step_id, StepResult::new(data, reason)).await?;
                }
                PlanDecision::AskUser { prompt } => {
                    if let Some(exit) = self.ask_user(step_id, prompt, streamed, &consumed).await? {
                        return Ok(exit);
                    }
                }
                PlanDecision::FinalAnswer { text, data } => {
                    let data = match data {
                        Value::Null if !consumed.is_empty() => with_messages(json!({}), &consumed),
                        other => with_messages(other, &consumed),
                    };
                    self.mutate(|ledger| {
                        ledger.conversation.set_step_type(step_id, StepType::Synthesis)?;
                        let result = StepResult::new(data, text).with_next_action("terminate");
                        let step = ledger.conversation.complete_step(step_id, Some(result))?;
                        ledger.publish_step(step);
                        ledger.conversation.finish(TerminalReason::Answered)
                    })
                    .await?;
                    self.shared.objective.write().await.status = ObjectiveStatus::Completed;
                    info!(objective = %self.objective_id, step_id, "objective answered");
                    return Ok(LoopExit::Terminal(TerminalReason::Answered));
                }
            }
        }
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn plan_request(&self, step_id: u32, iteration: u32, consumed: &[String]) -> PlanRequest {
        let context = {
            let ledger = self.shared.ledger.read().await;
            self.window.build(&ledger.conversation, step_id, consumed)
        };
        let tools: Vec<ToolDefinition> = self
            .services
            .sandbox
            .descriptors()
            .iter()
            .map(ToolDefinition::from)
            .collect();

        let mut request = PlanRequest::new(&self.workspace, &self.text, tools)
            .with_history(context.history)
            .with_iteration(iteration, self.services.config.max_iterations);
        request.earlier_summary = context.earlier_summary;
        request
    }

    /// Call the provider chain, forwarding streamed text to subscribers.
    async fn plan(&self, request: &PlanRequest) -> Planned {
        let cancel = self.control.cancel.clone();
        let halt = self.control.halt.clone();

        let call = async {
            if !self.services.config.stream_synthesis {
                return (self.services.chain.run(request, None).await, false);
            }
            let (tx, mut rx) = mpsc::channel(PLAN_STREAM_CAPACITY);
            let shared = self.shared.clone();
            let forward = async move {
                let mut streamed = false;
                while let Some(event) = rx.recv().await {
                    if let ProviderEvent::TextDelta { content } = event {
                        if content.is_empty() {
                            continue;
                        }
                        shared.ledger.read().await.publish_content(content);
                        streamed = true;
                    }
                }
                streamed
            };
            tokio::join!(self.services.chain.run(request, Some(tx)), forward)
        };

        tokio::select! {
            biased;
            _ = halt.cancelled() => Planned::Halted,
            _ = cancel.cancelled() => Planned::Cancelled,
            (result, streamed) = call => match result {
                Ok((outcome, log)) => {
                    log_attempts(&log);
                    Planned::Outcome { outcome, streamed }
                }
                Err(err) => Planned::Failed(err),
            },
        }
    }

    /// Run a tool and record it. `None` when the loop must stop instead of
    /// planning again.
    ///
    /// A cancel lets the call run to completion or its timeout and records
    /// it on the step; a halt drops the call, which aborts the handler.
    async fn invoke_tool(
        &self,
        step_id: u32,
        name: &str,
        params: Value,
        consumed: &[String],
    ) -> AppResult<Option<bool>> {
        self.mutate(|ledger| {
            ledger
                .conversation
                .set_step_type(step_id, StepType::ToolExecution)
        })
        .await?;

        let ctx = ToolContext::new(
            self.objective_id.to_string(),
            &self.workspace,
            step_id,
            format!("step_{}", step_id),
        );
        let execution = tokio::select! {
            biased;
            _ = self.control.halt.cancelled() => return Ok(None),
            execution = self.services.sandbox.execute(name, params, ctx) => execution,
        };

        if self.control.cancel.is_cancelled() {
            self.mutate(|ledger| ledger.conversation.record_tool_execution(step_id, execution))
                .await?;
            return Ok(None);
        }

        let success = execution.is_success();
        let summary = match execution.error() {
            None => format!("Called {}", name),
            Some(error) => format!("{} failed: {}", name, error),
        };
        if !success {
            warn!(objective = %self.objective_id, step_id, tool = name, "tool call failed");
        }
        let data = with_messages(
            json!({ DECISION_KEY: "invoke_tool", "tool": name, "success": success }),
            consumed,
        );
        self.mutate(|ledger| {
            ledger.conversation.record_tool_execution(step_id, execution)?;
            let step = ledger
                .conversation
                .complete_step(step_id, Some(StepResult::new(data, summary)))?;
            ledger.publish_step(step);
            Ok(())
        })
        .await?;
        Ok(Some(success))
    }

    async fn interrupted_tool(&mut self, step_id: u32, consumed: &[String]) -> AppResult<LoopExit> {
        if self.control.halt.is_cancelled() {
            return Ok(LoopExit::Halted);
        }
        self.terminate(
            Some(step_id),
            TerminalReason::UserCancelled,
            "Cancelled by user during tool execution",
            consumed,
        )
        .await
    }

    /// Suspend until the user replies. `Some` when the loop must stop.
    async fn ask_user(
        &mut self,
        step_id: u32,
        prompt: String,
        streamed: bool,
        consumed: &[String],
    ) -> AppResult<Option<LoopExit>> {
        {
            let mut ledger = self.shared.ledger.write().await;
            ledger.conversation.set_status(ConversationStatus::AwaitingUser)?;
            if !streamed {
                ledger.publish_content(prompt.clone());
            }
        }
        self.autosave.save_now(&self.workspace);
        info!(objective = %self.objective_id, step_id, "waiting for user reply");

        let timeout = self.services.config.ask_user_timeout_secs;
        let expired = async {
            match timeout {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };

        let reply = tokio::select! {
            biased;
            _ = self.control.halt.cancelled() => return Ok(Some(LoopExit::Halted)),
            _ = self.control.cancel.cancelled() => None,
            reply = self.control.inbox.recv() => reply,
            _ = expired => {
                let message = format!(
                    "No reply within {} seconds",
                    timeout.unwrap_or_default()
                );
                let exit = self
                    .terminate(Some(step_id), TerminalReason::AskUserTimeout, message, consumed)
                    .await?;
                return Ok(Some(exit));
            }
        };

        let Some(answer) = reply else {
            let exit = self
                .terminate(Some(step_id), TerminalReason::UserCancelled, "Cancelled while waiting for the user", consumed)
                .await?;
            return Ok(Some(exit));
        };

        let data = with_messages(
            json!({ DECISION_KEY: "ask_user", "question": prompt, "answer": answer }),
            consumed,
        );
        self.mutate(|ledger| {
            ledger.conversation.set_status(ConversationStatus::Active)?;
            let step = ledger
                .conversation
                .complete_step(step_id, Some(StepResult::new(data, "User answered")))?;
            ledger.publish_step(step);
            Ok(())
        })
        .await?;
        Ok(None)
    }

    async fn provider_failure(
        &mut self,
        step_id: u32,
        request: &PlanRequest,
        err: ChainError,
        consumed: &[String],
    ) -> AppResult<LoopExit> {
        error!(objective = %self.objective_id, step_id, error = %err, "all providers failed");
        let provider = err
            .log()
            .and_then(|log| log.attempts.last())
            .map(|a| a.provider.clone())
            .unwrap_or_else(|| "none".to_string());
        let attempts = err
            .log()
            .and_then(|log| serde_json::to_value(&log.attempts).ok())
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let usage = LlmUsage {
            provider,
            input_tokens: 0,
            output_tokens: 0,
            attempts: err.attempts() as u32,
        };
        let prompt = request.prompt_text();

        self.mutate(|ledger| {
            ledger.conversation.set_step_type(step_id, StepType::Synthesis)?;
            ledger.conversation.set_llm_exchange(step_id, Some(prompt), None)?;
            ledger.conversation.set_llm_usage(step_id, usage)
        })
        .await?;

        let mut result = StepResult::terminal(TerminalReason::ProviderError, err.to_string());
        if let Value::Object(map) = &mut result.data {
            map.insert("attempts".to_string(), attempts);
        }
        self.finish(Some(step_id), TerminalReason::ProviderError, with_messages_result(result, consumed))
            .await
    }

    // ========================================================================
    // Ledger writes
    // ========================================================================

    /// Apply a ledger mutation under the write lock and mark the workspace dirty.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> CoreResult<T>,
    ) -> AppResult<T> {
        let out = {
            let mut ledger = self.shared.ledger.write().await;
            f(&mut *ledger)?
        };
        self.autosave.mark_dirty(&self.workspace);
        Ok(out)
    }

    async fn complete(&self, step_id: u32, result: StepResult) -> AppResult<()> {
        self.mutate(|ledger| {
            let step = ledger.conversation.complete_step(step_id, Some(result))?;
            ledger.publish_step(step);
            Ok(())
        })
        .await
    }

    async fn terminate(
        &mut self,
        open_step: Option<u32>,
        reason: TerminalReason,
        message: impl Into<String>,
        consumed: &[String],
    ) -> AppResult<LoopExit> {
        let result = with_messages_result(StepResult::terminal(reason, message), consumed);
        self.finish(open_step, reason, result).await
    }

    /// Fail the open step (or a new Synthesis step) and close the conversation.
    async fn finish(
        &mut self,
        open_step: Option<u32>,
        reason: TerminalReason,
        result: StepResult,
    ) -> AppResult<LoopExit> {
        self.mutate(|ledger| {
            let step_id = match open_step {
                Some(id) => id,
                None => {
                    let id = ledger.conversation.begin_step(StepType::Synthesis)?;
                    ledger.conversation.start_step(id)?;
                    id
                }
            };
            let step = ledger.conversation.fail_step(step_id, result)?;
            ledger.publish_step(step);
            ledger.conversation.finish(reason)
        })
        .await?;
        self.shared.objective.write().await.status = ObjectiveStatus::from_terminal(reason);
        info!(objective = %self.objective_id, reason = %reason, "objective terminated");
        Ok(LoopExit::Terminal(reason))
    }

    fn drain_inbox(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(message) = self.control.inbox.try_recv() {
            messages.push(message);
        }
        if !messages.is_empty() {
            debug!(objective = %self.objective_id, count = messages.len(), "consumed follow-ups");
        }
        messages
    }
}

fn with_messages(mut data: Value, messages: &[String]) -> Value {
    if !messages.is_empty() {
        if let Value::Object(map) = &mut data {
            map.insert(USER_MESSAGES_KEY.to_string(), json!(messages));
        }
    }
    data
}

fn with_messages_result(mut result: StepResult, messages: &[String]) -> StepResult {
    result.data = with_messages(result.data, messages);
    result
}

fn log_attempts(log: &FallbackExecutionLog) {
    if log.attempts.len() > 1 {
        warn!(
            attempts = log.attempts.len(),
            provider = ?log.successful_provider,
            "planning succeeded after fallback"
        );
    }
}

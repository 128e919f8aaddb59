//! LLM Planner
//!
//! Turns any `LlmProvider` into a `Planner`. Native tool calls become
//! `InvokeTool`; the other decisions are read from a small JSON control
//! object, and plain text is taken as the final answer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::plan::{HistoryEntry, PlanDecision, PlanOutcome, PlanRequest, Planner};
use crate::provider::LlmProvider;
use crate::error::{LlmError, LlmResult};
use crate::types::{LlmResponse, Message, MessageContent, MessageRole};
use pixlie_core::streaming::ProviderEvent;

/// Capacity of the provider-to-planner event channel.
const PROVIDER_CHANNEL_CAPACITY: usize = 64;

const SYSTEM_PROMPT: &str = "You are a data analyst answering questions about a \
read-only Hacker News dataset (tables hn_items, entities, entity_relations). \
Work step by step: call exactly one of the provided tools when you need data. \
When you need clarification from the user, reply with only the JSON object \
{\"action\":\"ask_user\",\"prompt\":\"...\"}. When you need another round \
without a tool call, reply with {\"action\":\"need_more_iterations\",\"reason\":\"...\"}. \
When you can answer, reply with the answer as plain text, or with \
{\"action\":\"final_answer\",\"text\":\"...\",\"data\":{...}} to attach structured data. \
Never invent numbers that did not come from a tool result.";

/// JSON control object a model may reply with instead of prose.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ControlReply {
    AskUser {
        prompt: String,
    },
    FinalAnswer {
        text: String,
        #[serde(default)]
        data: Value,
    },
    NeedMoreIterations {
        #[serde(default)]
        reason: String,
    },
}

/// Planner backed by a single LLM provider.
pub struct LlmPlanner {
    provider: Arc<dyn LlmProvider>,
    label: String,
    system_prompt: String,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        let label = format!("{}:{}", provider.name(), provider.model());
        Self {
            provider,
            label,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the default system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn outcome(&self, response: LlmResponse) -> LlmResult<PlanOutcome> {
        let decision = decide(&response)?;
        Ok(PlanOutcome {
            decision,
            response_text: response.content,
            usage: response.usage,
            provider: self.label.clone(),
            attempts: 1,
        })
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    fn name(&self) -> &str {
        &self.label
    }

    async fn plan(&self, request: &PlanRequest) -> LlmResult<PlanOutcome> {
        let response = self
            .provider
            .send_message(
                build_messages(request),
                Some(self.system_prompt.clone()),
                request.tools.clone(),
            )
            .await?;
        self.outcome(response)
    }

    async fn plan_stream(
        &self,
        request: &PlanRequest,
        tx: mpsc::Sender<ProviderEvent>,
    ) -> LlmResult<PlanOutcome> {
        let (inner_tx, mut inner_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);

        let call = self.provider.stream_message(
            build_messages(request),
            Some(self.system_prompt.clone()),
            request.tools.clone(),
            inner_tx,
        );
        let forward = async {
            let mut gate = TextGate::default();
            while let Some(event) = inner_rx.recv().await {
                if let ProviderEvent::TextDelta { content } = event {
                    if let Some(text) = gate.push(&content) {
                        let _ = tx.send(ProviderEvent::TextDelta { content: text }).await;
                    }
                }
            }
            gate
        };

        let (result, gate) = tokio::join!(call, forward);
        let outcome = self.outcome(result?)?;

        // Held-back text is only released when it turns out to be the answer.
        if gate.held_back() {
            if let PlanDecision::FinalAnswer { text, .. } = &outcome.decision {
                if !text.is_empty() {
                    let _ = tx
                        .send(ProviderEvent::TextDelta {
                            content: text.clone(),
                        })
                        .await;
                }
            }
        }
        let _ = tx
            .send(ProviderEvent::Complete {
                stop_reason: Some(outcome.decision.kind().to_string()),
            })
            .await;

        Ok(outcome)
    }
}

// ============================================================================
// Prompt Construction
// ============================================================================

/// Render a plan request as provider messages.
///
/// Tool calls are replayed as native tool-use/tool-result pairs so every
/// provider sees them in its own format. Adjacent same-role turns are merged.
pub fn build_messages(request: &PlanRequest) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    push_content(
        &mut messages,
        MessageRole::User,
        MessageContent::Text {
            text: request.prompt_text(),
        },
    );

    for entry in &request.history {
        match entry {
            HistoryEntry::ToolCall {
                step_id,
                tool_name,
                parameters,
                output,
                error,
            } => {
                let call_id = format!("step_{}", step_id);
                push_content(
                    &mut messages,
                    MessageRole::Assistant,
                    MessageContent::ToolUse {
                        id: call_id.clone(),
                        name: tool_name.clone(),
                        input: parameters.clone(),
                    },
                );
                let (content, is_error) = match (output, error) {
                    (_, Some(err)) => (format!("Error: {}", err), Some(true)),
                    (Some(out), None) => (out.to_string(), None),
                    (None, None) => ("(no output)".to_string(), None),
                };
                push_content(
                    &mut messages,
                    MessageRole::User,
                    MessageContent::ToolResult {
                        tool_use_id: call_id,
                        content,
                        is_error,
                    },
                );
            }
            HistoryEntry::AssistantNote { text, .. } => push_content(
                &mut messages,
                MessageRole::Assistant,
                MessageContent::Text { text: text.clone() },
            ),
            HistoryEntry::UserMessage { text, .. } => push_content(
                &mut messages,
                MessageRole::User,
                MessageContent::Text { text: text.clone() },
            ),
        }
    }

    push_content(
        &mut messages,
        MessageRole::User,
        MessageContent::Text {
            text: request.budget_text(),
        },
    );
    messages
}

fn push_content(messages: &mut Vec<Message>, role: MessageRole, content: MessageContent) {
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.push(content),
        _ => messages.push(Message {
            role,
            content: vec![content],
        }),
    }
}

// ============================================================================
// Response Interpretation
// ============================================================================

/// Map a provider response onto a decision.
pub fn decide(response: &LlmResponse) -> LlmResult<PlanDecision> {
    if let Some(call) = response.tool_calls.first() {
        let params = match &call.arguments {
            Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        return Ok(PlanDecision::InvokeTool {
            name: call.name.clone(),
            params,
        });
    }

    let raw = response.content.as_deref().unwrap_or_default();
    if raw.trim().is_empty() {
        return Err(LlmError::parse("Model returned neither text nor a tool call"));
    }

    if let Some(control) = parse_control(raw) {
        return Ok(match control {
            ControlReply::AskUser { prompt } => PlanDecision::AskUser { prompt },
            ControlReply::FinalAnswer { text, data } => PlanDecision::FinalAnswer { text, data },
            ControlReply::NeedMoreIterations { reason } => {
                PlanDecision::NeedMoreIterations { reason }
            }
        });
    }

    Ok(PlanDecision::FinalAnswer {
        text: raw.to_string(),
        data: Value::Null,
    })
}

fn parse_control(raw: &str) -> Option<ControlReply> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    if !body.starts_with('{') {
        return None;
    }
    serde_json::from_str(body).ok()
}

/// Decides whether streamed text is forwarded live or held back because it
/// looks like a JSON control object.
#[derive(Debug, Default)]
struct TextGate {
    mode: GateMode,
    pending: String,
}

#[derive(Debug, Default, PartialEq)]
enum GateMode {
    #[default]
    Undecided,
    Forward,
    Hold,
}

impl TextGate {
    fn push(&mut self, chunk: &str) -> Option<String> {
        match self.mode {
            GateMode::Forward => Some(chunk.to_string()),
            GateMode::Hold => {
                self.pending.push_str(chunk);
                None
            }
            GateMode::Undecided => {
                self.pending.push_str(chunk);
                match self.pending.trim_start().chars().next() {
                    None => None,
                    Some('{') | Some('`') => {
                        self.mode = GateMode::Hold;
                        None
                    }
                    Some(_) => {
                        self.mode = GateMode::Forward;
                        Some(std::mem::take(&mut self.pending))
                    }
                }
            }
        }
    }

    fn held_back(&self) -> bool {
        self.mode != GateMode::Forward && !self.pending.is_empty()
    }
}

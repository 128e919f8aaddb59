//! Planning Context Window
//!
//! Turns a conversation into what the planner sees: the most recent steps in
//! full (large tool payloads summarized) and one summary line for every older
//! step. Nothing is dropped silently.

use serde_json::Value;

use pixlie_core::{Conversation, ConversationStep, StepStatus};
use pixlie_llm::HistoryEntry;
use pixlie_tools::truncation::truncate_result;

/// Result-data key holding user messages consumed by a step
pub const USER_MESSAGES_KEY: &str = "user_messages";
/// Result-data key naming the planner decision behind a step
pub const DECISION_KEY: &str = "decision";

/// Tool output above this size is summarized before it reaches the planner
pub const DEFAULT_PAYLOAD_BYTES: usize = 4 * 1024;

const SUMMARY_PARAMS_CHARS: usize = 160;

/// Planner-facing view of a conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanningContext {
    pub earlier_summary: Option<String>,
    pub history: Vec<HistoryEntry>,
}

/// Bounded window over prior steps.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    window_steps: usize,
    max_payload_bytes: usize,
}

impl ContextWindow {
    pub fn new(window_steps: usize) -> Self {
        Self {
            window_steps: window_steps.max(1),
            max_payload_bytes: DEFAULT_PAYLOAD_BYTES,
        }
    }

    pub fn with_payload_limit(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Build the context for a planning call made by step `current_step`.
    ///
    /// `pending_messages` are user follow-ups not yet written to the ledger;
    /// they are shown last.
    pub fn build(
        &self,
        conversation: &Conversation,
        current_step: u32,
        pending_messages: &[String],
    ) -> PlanningContext {
        let prior: Vec<&ConversationStep> = conversation
            .steps()
            .iter()
            .filter(|s| s.step_id() != current_step)
            .collect();

        let split = prior.len().saturating_sub(self.window_steps);
        let (older, recent) = prior.split_at(split);

        let earlier_summary = if older.is_empty() {
            None
        } else {
            Some(
                older
                    .iter()
                    .map(|s| summarize_step(s))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        };

        let mut history: Vec<HistoryEntry> = recent
            .iter()
            .flat_map(|s| self.step_entries(s))
            .collect();
        history.extend(pending_messages.iter().map(|text| HistoryEntry::UserMessage {
            step_id: current_step,
            text: text.clone(),
        }));

        PlanningContext {
            earlier_summary,
            history,
        }
    }

    fn step_entries(&self, step: &ConversationStep) -> Vec<HistoryEntry> {
        let step_id = step.step_id();
        let data = step.results().map(|r| &r.data);
        let mut entries = Vec::new();

        if let Some(messages) = data
            .and_then(|d| d.get(USER_MESSAGES_KEY))
            .and_then(Value::as_array)
        {
            entries.extend(messages.iter().filter_map(Value::as_str).map(|text| {
                HistoryEntry::UserMessage {
                    step_id,
                    text: text.to_string(),
                }
            }));
        }

        for call in step.tool_calls() {
            let output = call.result().map(|value| {
                let (value, _) = truncate_result(value.clone(), self.max_payload_bytes);
                value
            });
            entries.push(HistoryEntry::ToolCall {
                step_id,
                tool_name: call.tool_name().to_string(),
                parameters: call.parameters().clone(),
                output,
                error: call.error().map(str::to_string),
            });
        }

        match data.and_then(|d| d.get(DECISION_KEY)).and_then(Value::as_str) {
            Some("ask_user") => {
                if let Some(question) = data.and_then(|d| d.get("question")).and_then(Value::as_str) {
                    entries.push(HistoryEntry::AssistantNote {
                        step_id,
                        text: question.to_string(),
                    });
                }
                if let Some(answer) = data.and_then(|d| d.get("answer")).and_then(Value::as_str) {
                    entries.push(HistoryEntry::UserMessage {
                        step_id,
                        text: answer.to_string(),
                    });
                }
            }
            Some("invoke_tool") => {}
            _ if step.tool_calls().is_empty() => {
                if let Some(result) = step.results() {
                    let text = if step.status() == StepStatus::Failed {
                        format!("Step {} failed: {}", step_id, result.summary)
                    } else {
                        result.summary.clone()
                    };
                    if !text.is_empty() {
                        entries.push(HistoryEntry::AssistantNote { step_id, text });
                    }
                }
            }
            _ => {}
        }

        entries
    }
}

/// One line describing a step outside the window.
pub fn summarize_step(step: &ConversationStep) -> String {
    let step_id = step.step_id();

    if let Some(call) = step.tool_calls().first() {
        let mut params = compact(call.parameters());
        if params.chars().count() > SUMMARY_PARAMS_CHARS {
            params = params.chars().take(SUMMARY_PARAMS_CHARS).collect::<String>() + "...";
        }
        let outcome = match (call.result(), call.error()) {
            (Some(result), _) => format!("ok, {}", describe_shape(result)),
            (None, Some(error)) => format!("failed: {}", error),
            (None, None) => "no outcome".to_string(),
        };
        return format!("Step {}: {}({}) -> {}", step_id, call.tool_name(), params, outcome);
    }

    let data = step.results().map(|r| &r.data);
    if data.and_then(|d| d.get(DECISION_KEY)).and_then(Value::as_str) == Some("ask_user") {
        let question = data
            .and_then(|d| d.get("question"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let answer = data
            .and_then(|d| d.get("answer"))
            .and_then(Value::as_str)
            .unwrap_or("(no answer)");
        return format!(
            "Step {}: asked the user \"{}\", answer: \"{}\"",
            step_id, question, answer
        );
    }

    let summary = step.results().map(|r| r.summary.as_str()).unwrap_or("");
    format!("Step {} ({}, {}): {}", step_id, step.step_type(), step.status(), summary)
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

fn describe_shape(value: &Value) -> String {
    if let Some(rows) = value.get("row_count").and_then(Value::as_u64) {
        return format!("{} rows", rows);
    }
    if let Some(count) = value
        .get("count")
        .or_else(|| value.get("total_count"))
        .and_then(Value::as_u64)
    {
        return format!("{} matches", count);
    }
    match value {
        Value::Array(items) => format!("{} items", items.len()),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).take(6).collect();
            format!("fields [{}]", keys.join(", "))
        }
        other => compact(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixlie_core::{StepResult, StepType, ToolExecution};
    use serde_json::json;
    use uuid::Uuid;

    fn tool_step(conv: &mut Conversation, rows: usize) -> u32 {
        let id = conv.begin_step(StepType::ToolExecution).unwrap();
        conv.start_step(id).unwrap();
        let rows: Vec<Value> = (0..rows).map(|i| json!([i, "x".repeat(40)])).collect();
        conv.record_tool_execution(
            id,
            ToolExecution::success(
                "query_sql",
                json!({"query": "SELECT id, title FROM hn_items"}),
                json!({"columns": ["id", "title"], "rows": rows, "row_count": rows.len()}),
                2,
            ),
        )
        .unwrap();
        conv.complete_step(
            id,
            Some(StepResult::new(json!({"decision": "invoke_tool"}), "Called query_sql")),
        )
        .unwrap();
        id
    }

    #[test]
    fn test_short_conversation_fits_window() {
        let mut conv = Conversation::new(Uuid::new_v4(), "q");
        tool_step(&mut conv, 2);
        let current = conv.begin_step(StepType::Planning).unwrap();

        let ctx = ContextWindow::new(6).build(&conv, current, &[]);
        assert!(ctx.earlier_summary.is_none());
        assert_eq!(ctx.history.len(), 1);
        assert!(matches!(
            &ctx.history[0],
            HistoryEntry::ToolCall { step_id: 1, error: None, .. }
        ));
    }

    #[test]
    fn test_older_steps_are_folded_not_dropped() {
        let mut conv = Conversation::new(Uuid::new_v4(), "q");
        for _ in 0..5 {
            tool_step(&mut conv, 3);
        }
        let current = conv.begin_step(StepType::Planning).unwrap();

        let ctx = ContextWindow::new(2).build(&conv, current, &[]);
        let summary = ctx.earlier_summary.unwrap();
        assert_eq!(summary.lines().count(), 3);
        assert!(summary.starts_with("Step 1: query_sql("));
        assert!(summary.contains("ok, 3 rows"));
        let ids: Vec<u32> = ctx.history.iter().map(|e| e.step_id()).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_large_outputs_are_summarized() {
        let mut conv = Conversation::new(Uuid::new_v4(), "q");
        tool_step(&mut conv, 400);
        let current = conv.begin_step(StepType::Planning).unwrap();

        let ctx = ContextWindow::new(4)
            .with_payload_limit(1024)
            .build(&conv, current, &[]);
        let HistoryEntry::ToolCall { output: Some(output), .. } = &ctx.history[0] else {
            panic!("expected a tool call entry");
        };
        assert_eq!(output["truncated"], true);
        assert!(serde_json::to_string(output).unwrap().len() <= 1024);
    }

    #[test]
    fn test_ask_user_and_followups() {
        let mut conv = Conversation::new(Uuid::new_v4(), "q");
        let ask = conv.begin_step(StepType::Planning).unwrap();
        conv.start_step(ask).unwrap();
        conv.complete_step(
            ask,
            Some(StepResult::new(
                json!({"decision": "ask_user", "question": "Which year?", "answer": "2024",
                       "user_messages": ["also count jobs"]}),
                "User answered",
            )),
        )
        .unwrap();
        let current = conv.begin_step(StepType::Planning).unwrap();

        let ctx = ContextWindow::new(4).build(&conv, current, &["only stories".to_string()]);
        assert_eq!(
            ctx.history,
            vec![
                HistoryEntry::UserMessage { step_id: 1, text: "also count jobs".into() },
                HistoryEntry::AssistantNote { step_id: 1, text: "Which year?".into() },
                HistoryEntry::UserMessage { step_id: 1, text: "2024".into() },
                HistoryEntry::UserMessage { step_id: 2, text: "only stories".into() },
            ]
        );
        assert_eq!(
            summarize_step(&conv.steps()[0]),
            "Step 1: asked the user \"Which year?\", answer: \"2024\""
        );
    }

    #[test]
    fn test_failed_tool_summary() {
        let mut conv = Conversation::new(Uuid::new_v4(), "q");
        let id = conv.begin_step(StepType::ToolExecution).unwrap();
        conv.start_step(id).unwrap();
        conv.record_tool_execution(
            id,
            ToolExecution::failure("query_sql", json!({"query": "DROP"}), "Validation error: only SELECT", 1),
        )
        .unwrap();
        conv.complete_step(id, None).unwrap();

        assert_eq!(
            summarize_step(&conv.steps()[0]),
            "Step 1: query_sql({\"query\":\"DROP\"}) -> failed: Validation error: only SELECT"
        );
    }
}

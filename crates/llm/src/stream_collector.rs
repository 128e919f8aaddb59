//! Stream Collector
//!
//! Drives a provider's HTTP byte stream through its `LineDecoder`, forwards
//! text deltas to the caller and assembles the final `LlmResponse`.

use futures_util::StreamExt;
use tokio::sync::mpsc;

use pixlie_core::streaming::{LineDecoder, ProviderEvent};

use crate::provider::map_transport_error;
use crate::error::{LlmError, LlmResult};
use crate::types::{LlmResponse, StopReason, ToolCall, UsageStats};

/// Accumulates unified events into a response.
#[derive(Debug, Default)]
pub(crate) struct ResponseAccumulator {
    content: String,
    tool_calls: Vec<ToolCall>,
    usage: UsageStats,
    stop_reason: Option<StopReason>,
}

impl ResponseAccumulator {
    /// Apply one event. Returns an error for in-band provider errors.
    pub(crate) fn apply(&mut self, event: &ProviderEvent) -> LlmResult<()> {
        match event {
            ProviderEvent::TextDelta { content } => self.content.push_str(content),
            ProviderEvent::ToolComplete {
                tool_id,
                tool_name,
                arguments,
            } => self
                .tool_calls
                .push(ToolCall::from_raw(tool_id.as_str(), tool_name.as_str(), arguments)?),
            ProviderEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                if *input_tokens > 0 {
                    self.usage.input_tokens = *input_tokens;
                }
                self.usage.output_tokens += *output_tokens;
            }
            ProviderEvent::Complete { stop_reason } => {
                self.stop_reason = Some(
                    stop_reason
                        .as_deref()
                        .map(StopReason::from)
                        .unwrap_or(StopReason::EndTurn),
                );
            }
            ProviderEvent::Error { message, code } => {
                return Err(LlmError::ServerError {
                    message: match code {
                        Some(code) => format!("{}: {}", code, message),
                        None => message.clone(),
                    },
                    status: None,
                });
            }
            ProviderEvent::ToolStart { .. } => {}
        }
        Ok(())
    }

    pub(crate) fn finish(self, model: &str) -> LlmResponse {
        let stop_reason = match self.stop_reason {
            Some(reason) => reason,
            None if !self.tool_calls.is_empty() => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };
        LlmResponse {
            content: if self.content.is_empty() {
                None
            } else {
                Some(self.content)
            },
            tool_calls: self.tool_calls,
            stop_reason,
            usage: self.usage,
            model: model.to_string(),
        }
    }
}

/// Read a streaming HTTP response line by line.
///
/// Only text deltas are forwarded; tool lifecycle, usage and completion
/// signals stay internal because the planner emits its own.
pub(crate) async fn collect_stream(
    response: reqwest::Response,
    mut decoder: impl LineDecoder,
    tx: &mpsc::Sender<ProviderEvent>,
    provider: &str,
    model: &str,
) -> LlmResult<LlmResponse> {
    let mut accumulator = ResponseAccumulator::default();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| map_transport_error(e, provider))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(line_end) = buffer.find('\n') {
            let line: String = buffer.drain(..=line_end).collect();
            process_line(&mut decoder, &line, &mut accumulator, tx).await?;
        }
    }

    if !buffer.trim().is_empty() {
        process_line(&mut decoder, &buffer, &mut accumulator, tx).await?;
    }

    Ok(accumulator.finish(model))
}

async fn process_line(
    decoder: &mut impl LineDecoder,
    line: &str,
    accumulator: &mut ResponseAccumulator,
    tx: &mpsc::Sender<ProviderEvent>,
) -> LlmResult<()> {
    if line.trim().is_empty() {
        return Ok(());
    }
    let events = match decoder.decode(line) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(provider = decoder.provider(), error = %e, "skipping unparseable stream line");
            return Ok(());
        }
    };
    for event in events {
        accumulator.apply(&event)?;
        if matches!(event, ProviderEvent::TextDelta { .. }) {
            let _ = tx.send(event).await;
        }
    }
    Ok(())
}

//! Ollama chat stream.
//!
//! Ollama streams newline-delimited JSON objects from `/api/chat`. Tool calls
//! arrive whole inside a message rather than as argument fragments.

use pixlie_core::streaming::{DecodeError, LineDecoder, ProviderEvent};
use serde::Deserialize;

use super::PendingTool;

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    function: ChunkFunction,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct OllamaDecoder {
    /// Ollama assigns no call ids; calls are numbered per stream.
    calls_seen: usize,
}

impl OllamaDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LineDecoder for OllamaDecoder {
    fn provider(&self) -> &'static str {
        "ollama"
    }

    fn decode(&mut self, line: &str) -> Result<Vec<ProviderEvent>, DecodeError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(vec![]);
        }

        let chunk: OllamaChunk =
            serde_json::from_str(trimmed).map_err(DecodeError::json)?;

        if let Some(message) = chunk.error {
            return Ok(vec![ProviderEvent::Error {
                message,
                code: None,
            }]);
        }

        let mut events = vec![];

        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                events.push(ProviderEvent::TextDelta {
                    content: message.content,
                });
            }
            for call in message.tool_calls {
                self.calls_seen += 1;
                let id = format!("ollama_call_{}", self.calls_seen);
                let (mut pending, started) = PendingTool::open(id, call.function.name);
                match call.function.arguments {
                    serde_json::Value::Null => pending.append("{}"),
                    arguments => pending.append(&arguments.to_string()),
                }
                events.push(started);
                events.push(pending.close());
            }
        }

        if chunk.done {
            if chunk.prompt_eval_count.is_some() || chunk.eval_count.is_some() {
                events.push(ProviderEvent::Usage {
                    input_tokens: chunk.prompt_eval_count.unwrap_or(0),
                    output_tokens: chunk.eval_count.unwrap_or(0),
                });
            }
            events.push(ProviderEvent::Complete {
                stop_reason: chunk.done_reason,
            });
        }

        Ok(events)
    }
}

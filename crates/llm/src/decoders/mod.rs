//! Vendor Stream Decoders
//!
//! One `LineDecoder` per wire format. Each turns a single line of a streamed
//! response body into zero or more `ProviderEvent`s.
//!
//! Anthropic and OpenAI both speak server-sent events and build tool calls
//! from argument fragments, so the SSE framing and fragment buffering live
//! here. Ollama streams newline-delimited JSON.

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicDecoder;
pub use ollama::OllamaDecoder;
pub use openai::OpenAiDecoder;

use pixlie_core::streaming::ProviderEvent;

/// Classification of one SSE line.
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine<'a> {
    /// JSON payload of a `data:` field, or a bare JSON object.
    Json(&'a str),
    /// The `[DONE]` sentinel.
    Done,
    /// Blank lines, comments and the `event:`, `id:` and `retry:` fields.
    Ignored,
}

pub(crate) fn classify_sse(line: &str) -> SseLine<'_> {
    let line = line.trim();
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None if line.starts_with('{') => line,
        None => return SseLine::Ignored,
    };
    match payload {
        "" => SseLine::Ignored,
        "[DONE]" => SseLine::Done,
        json => SseLine::Json(json),
    }
}

/// A tool call whose argument JSON is still arriving in fragments.
#[derive(Debug)]
pub(crate) struct PendingTool {
    id: String,
    name: String,
    arguments: String,
}

impl PendingTool {
    /// Open a call and return the matching `ToolStart` event.
    pub(crate) fn open(id: String, name: String) -> (Self, ProviderEvent) {
        let started = ProviderEvent::ToolStart {
            tool_id: id.clone(),
            tool_name: name.clone(),
        };
        let pending = Self {
            id,
            name,
            arguments: String::new(),
        };
        (pending, started)
    }

    pub(crate) fn append(&mut self, fragment: &str) {
        self.arguments.push_str(fragment);
    }

    pub(crate) fn close(self) -> ProviderEvent {
        ProviderEvent::ToolComplete {
            tool_id: self.id,
            tool_name: self.name,
            arguments: self.arguments,
        }
    }
}

//! Provider Stream Events
//!
//! Vendors stream responses in different wire formats. A [`LineDecoder`]
//! reads one line of such a body and yields [`ProviderEvent`]s, which the LLM
//! crate folds into a response and the analysis loop forwards as content
//! chunks to subscribers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Vendor-neutral event decoded from a streamed model response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    TextDelta { content: String },

    /// A tool call block opened; arguments follow.
    ToolStart { tool_id: String, tool_name: String },

    /// A tool call block closed. `arguments` is the raw JSON text.
    ToolComplete {
        tool_id: String,
        tool_name: String,
        arguments: String,
    },

    Usage { input_tokens: u32, output_tokens: u32 },

    /// In-band failure reported by the vendor mid-stream.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// End of the stream. Planners emit exactly one, last.
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
}

impl ProviderEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self, ProviderEvent::Complete { .. })
    }

    /// Text carried by a delta, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            ProviderEvent::TextDelta { content } => Some(content),
            _ => None,
        }
    }
}

/// A stream line a decoder could not turn into events.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed stream line: {0}")]
    Malformed(String),

    #[error("unexpected event: {0}")]
    Unexpected(String),
}

impl DecodeError {
    pub fn json(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Stateful per-stream decoder. Build a fresh one for every response.
pub trait LineDecoder: Send {
    /// Vendor label used in log fields.
    fn provider(&self) -> &'static str;

    fn decode(&mut self, line: &str) -> Result<Vec<ProviderEvent>, DecodeError>;
}

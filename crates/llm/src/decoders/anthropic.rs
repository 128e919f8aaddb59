//! Anthropic Messages stream.
//!
//! Text arrives as `content_block_delta` events. A `tool_use` block opens
//! with `content_block_start`, carries its input as `input_json_delta`
//! fragments and closes with `content_block_stop`. The stop reason comes in
//! `message_delta` and is reported when `message_stop` ends the stream.

use pixlie_core::streaming::{DecodeError, LineDecoder, ProviderEvent};
use serde::Deserialize;

use super::{classify_sse, PendingTool, SseLine};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    MessageStart {
        message: StartedMessage,
    },
    ContentBlockStart {
        content_block: Block,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    ContentBlockStop,
    MessageDelta {
        delta: StopInfo,
        #[serde(default)]
        usage: Option<OutputUsage>,
    },
    MessageStop,
    Error {
        error: VendorError,
    },
    /// `ping` and anything newer than this decoder.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartedMessage {
    #[serde(default)]
    usage: Option<InputUsage>,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StopInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VendorError {
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Default)]
pub struct AnthropicDecoder {
    tool: Option<PendingTool>,
    stop_reason: Option<String>,
}

impl AnthropicDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&mut self, frame: Frame) -> Result<Vec<ProviderEvent>, DecodeError> {
        let event = match frame {
            Frame::MessageStart { message } => message.usage.map(|u| ProviderEvent::Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            Frame::ContentBlockStart {
                content_block: Block::ToolUse { id, name },
            } => {
                let (pending, started) = PendingTool::open(id, name);
                self.tool = Some(pending);
                Some(started)
            }
            Frame::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
            } => Some(ProviderEvent::TextDelta { content: text }),
            Frame::ContentBlockDelta {
                delta: BlockDelta::InputJsonDelta { partial_json },
            } => {
                let pending = self.tool.as_mut().ok_or_else(|| {
                    DecodeError::Unexpected("input_json_delta outside a tool_use block".into())
                })?;
                pending.append(&partial_json);
                None
            }
            // Text blocks close too; only a tool block yields an event.
            Frame::ContentBlockStop => self.tool.take().map(PendingTool::close),
            Frame::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                usage.map(|u| ProviderEvent::Usage {
                    input_tokens: 0,
                    output_tokens: u.output_tokens,
                })
            }
            Frame::MessageStop => Some(ProviderEvent::Complete {
                stop_reason: self.stop_reason.take(),
            }),
            Frame::Error { error } => Some(ProviderEvent::Error {
                message: error.message,
                code: error.kind,
            }),
            Frame::ContentBlockStart { .. } | Frame::ContentBlockDelta { .. } | Frame::Other => None,
        };
        Ok(event.into_iter().collect())
    }
}

impl LineDecoder for AnthropicDecoder {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    fn decode(&mut self, line: &str) -> Result<Vec<ProviderEvent>, DecodeError> {
        match classify_sse(line) {
            SseLine::Json(json) => {
                let frame: Frame = serde_json::from_str(json).map_err(DecodeError::json)?;
                self.apply(frame)
            }
            SseLine::Done | SseLine::Ignored => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut AnthropicDecoder, lines: &[&str]) -> Vec<ProviderEvent> {
        lines
            .iter()
            .flat_map(|line| decoder.decode(line).unwrap())
            .collect()
    }

    #[test]
    fn test_text_stream() {
        let mut decoder = AnthropicDecoder::new();
        let events = feed(
            &mut decoder,
            &[
                "event: message_start",
                r#"data: {"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":25,"output_tokens":1}}}"#,
                r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
                r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"42 "}}"#,
                r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"authors"}}"#,
                r#"data: {"type":"content_block_stop","index":0}"#,
                r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":9}}"#,
                r#"data: {"type":"message_stop"}"#,
            ],
        );

        let text: String = events.iter().filter_map(ProviderEvent::text).collect();
        assert_eq!(text, "42 authors");
        assert_eq!(
            events.first(),
            Some(&ProviderEvent::Usage {
                input_tokens: 25,
                output_tokens: 1
            })
        );
        assert_eq!(
            events.last(),
            Some(&ProviderEvent::Complete {
                stop_reason: Some("end_turn".into())
            })
        );
    }

    #[test]
    fn test_tool_use_block() {
        let mut decoder = AnthropicDecoder::new();
        let events = feed(
            &mut decoder,
            &[
                r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"query_sql","input":{}}}"#,
                r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"query\":"}}"#,
                r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":" \"SELECT 1\"}"}}"#,
                r#"data: {"type":"content_block_stop","index":1}"#,
            ],
        );

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ProviderEvent::ToolStart { tool_name, .. } if tool_name == "query_sql"));
        assert_eq!(
            events[1],
            ProviderEvent::ToolComplete {
                tool_id: "toolu_1".into(),
                tool_name: "query_sql".into(),
                arguments: r#"{"query": "SELECT 1"}"#.into(),
            }
        );
    }

    #[test]
    fn test_stray_argument_fragment_is_rejected() {
        let mut decoder = AnthropicDecoder::new();
        let err = decoder
            .decode(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Unexpected(_)));
    }

    #[test]
    fn test_in_band_error() {
        let mut decoder = AnthropicDecoder::new();
        let events = decoder
            .decode(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap();
        assert_eq!(
            events,
            vec![ProviderEvent::Error {
                message: "Overloaded".into(),
                code: Some("overloaded_error".into()),
            }]
        );
    }

    #[test]
    fn test_noise_and_garbage() {
        let mut decoder = AnthropicDecoder::new();
        assert!(feed(&mut decoder, &["", "event: ping", r#"data: {"type":"ping"}"#, "data: [DONE]"]).is_empty());
        assert!(matches!(
            decoder.decode("data: {not json"),
            Err(DecodeError::Malformed(_))
        ));
    }
}

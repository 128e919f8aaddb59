//! OpenAI Chat Completions stream.
//!
//! Each chunk carries a `choices[].delta`. Tool calls are split across chunks:
//! the first fragment has the call id and function name, later ones only
//! argument text. A call is closed when the next one starts, when a
//! `finish_reason` arrives, or at `[DONE]`.

use pixlie_core::streaming::{DecodeError, LineDecoder, ProviderEvent};
use serde::Deserialize;

use super::{classify_sse, PendingTool, SseLine};

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: ChoiceDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolFragment>,
}

#[derive(Debug, Deserialize)]
struct ToolFragment {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: FunctionFragment,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Default)]
pub struct OpenAiDecoder {
    tool: Option<PendingTool>,
}

impl OpenAiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn close_tool(&mut self, events: &mut Vec<ProviderEvent>) {
        if let Some(pending) = self.tool.take() {
            events.push(pending.close());
        }
    }

    fn apply(&mut self, chunk: Chunk) -> Result<Vec<ProviderEvent>, DecodeError> {
        let mut events = Vec::new();

        if let Some(usage) = chunk.usage {
            events.push(ProviderEvent::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                events.push(ProviderEvent::TextDelta { content });
            }

            for fragment in choice.delta.tool_calls {
                if let Some(id) = fragment.id {
                    self.close_tool(&mut events);
                    let name = fragment.function.name.clone().unwrap_or_default();
                    let (pending, started) = PendingTool::open(id, name);
                    self.tool = Some(pending);
                    events.push(started);
                }
                if let Some(arguments) = fragment.function.arguments {
                    let pending = self.tool.as_mut().ok_or_else(|| {
                        DecodeError::Unexpected("tool arguments before a tool call id".into())
                    })?;
                    pending.append(&arguments);
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.close_tool(&mut events);
                events.push(ProviderEvent::Complete {
                    stop_reason: Some(reason),
                });
            }
        }

        Ok(events)
    }
}

impl LineDecoder for OpenAiDecoder {
    fn provider(&self) -> &'static str {
        "openai"
    }

    fn decode(&mut self, line: &str) -> Result<Vec<ProviderEvent>, DecodeError> {
        match classify_sse(line) {
            SseLine::Json(json) => {
                let chunk: Chunk = serde_json::from_str(json).map_err(DecodeError::json)?;
                self.apply(chunk)
            }
            SseLine::Done => {
                let mut events = Vec::new();
                self.close_tool(&mut events);
                Ok(events)
            }
            SseLine::Ignored => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_finish() {
        let mut decoder = OpenAiDecoder::new();
        let mut events = decoder
            .decode(r#"data: {"choices":[{"delta":{"role":"assistant","content":"42 authors"}}]}"#)
            .unwrap();
        events.extend(
            decoder
                .decode(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#)
                .unwrap(),
        );

        assert_eq!(
            events,
            vec![
                ProviderEvent::TextDelta {
                    content: "42 authors".into()
                },
                ProviderEvent::Complete {
                    stop_reason: Some("stop".into())
                },
            ]
        );
    }

    #[test]
    fn test_tool_call_split_across_chunks() {
        let mut decoder = OpenAiDecoder::new();

        let events = decoder
            .decode(r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"search_items","arguments":""}}]}}]}"#)
            .unwrap();
        assert!(matches!(&events[..], [ProviderEvent::ToolStart { tool_id, .. }] if tool_id == "call_1"));

        let events = decoder
            .decode(r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":\"rust\"}"}}]}}]}"#)
            .unwrap();
        assert!(events.is_empty());

        let events = decoder
            .decode(r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ProviderEvent::ToolComplete {
                tool_id: "call_1".into(),
                tool_name: "search_items".into(),
                arguments: r#"{"query":"rust"}"#.into(),
            }
        );
        assert!(events[1].is_complete());
    }

    #[test]
    fn test_second_call_closes_the_first() {
        let mut decoder = OpenAiDecoder::new();
        decoder
            .decode(r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"query_sql","arguments":"{}"}}]}}]}"#)
            .unwrap();
        let events = decoder
            .decode(r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"search_items"}}]}}]}"#)
            .unwrap();
        assert!(matches!(&events[0], ProviderEvent::ToolComplete { tool_id, .. } if tool_id == "a"));
        assert!(matches!(&events[1], ProviderEvent::ToolStart { tool_id, .. } if tool_id == "b"));

        let events = decoder.decode("data: [DONE]").unwrap();
        assert!(matches!(&events[..], [ProviderEvent::ToolComplete { tool_id, .. }] if tool_id == "b"));
    }

    #[test]
    fn test_usage_chunk_and_noise() {
        let mut decoder = OpenAiDecoder::new();
        let events = decoder
            .decode(r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":3}}"#)
            .unwrap();
        assert_eq!(
            events,
            vec![ProviderEvent::Usage {
                input_tokens: 10,
                output_tokens: 3
            }]
        );
        assert!(decoder.decode(": keep-alive").unwrap().is_empty());
        assert!(decoder.decode("data: [DONE]").unwrap().is_empty());
    }
}

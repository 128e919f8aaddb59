//! OpenAI Chat Completions API and compatible endpoints.
//!
//! Chat Completions has no content blocks: tool calls ride on the assistant
//! message, and every tool result becomes its own `tool` role message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::ProviderConfig;
use crate::decoders::OpenAiDecoder;
use crate::error::{LlmError, LlmResult};
use crate::http_client::{build_http_client, read_json, send_checked};
use crate::provider::{missing_api_key_error, LlmProvider};
use crate::stream_collector::collect_stream;
use crate::types::{
    LlmResponse, Message, MessageContent, MessageRole, StopReason, ToolCall, ToolDefinition,
    UsageStats,
};
use pixlie_core::streaming::ProviderEvent;

const PROVIDER: &str = "openai";
const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Function-calling tool entry. Ollama accepts the same shape.
#[derive(Debug, Serialize)]
pub(crate) struct FunctionTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a ToolDefinition> for FunctionTool<'a> {
    fn from(tool: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: FunctionSpec {
                name: &tool.name,
                description: &tool.description,
                parameters: &tool.input_schema,
            },
        }
    }
}

pub(crate) fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool<'a>>,
}

/// One of our messages as Chat Completions messages.
fn chat_messages(message: &Message) -> Vec<Value> {
    let mut text = Vec::new();
    let mut calls = Vec::new();
    let mut results = Vec::new();
    for block in &message.content {
        match block {
            MessageContent::Text { text: part } => text.push(part.as_str()),
            MessageContent::ToolUse { id, name, input } => calls.push(json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": input.to_string()},
            })),
            MessageContent::ToolResult {
                tool_use_id,
                content,
                ..
            } => results.push(json!({
                "role": "tool",
                "tool_call_id": tool_use_id,
                "content": content,
            })),
        }
    }
    let text = text.join("\n");

    if !results.is_empty() {
        if !text.is_empty() {
            results.push(json!({"role": "user", "content": text}));
        }
        return results;
    }

    let role = role_name(message.role);
    if calls.is_empty() {
        return vec![json!({"role": role, "content": text})];
    }
    let content = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    vec![json!({"role": role, "content": content, "tool_calls": calls})]
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    choices: Vec<ReplyChoice>,
    model: String,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

#[derive(Debug, Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ReplyToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ReplyToolCall {
    id: String,
    function: ReplyFunction,
}

#[derive(Debug, Deserialize)]
struct ReplyFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ReplyUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl TryFrom<ChatReply> for LlmResponse {
    type Error = LlmError;

    /// Only the first choice is used.
    fn try_from(reply: ChatReply) -> LlmResult<Self> {
        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::parse("reply has no choices"))?;
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall::from_raw(call.id, call.function.name, &call.function.arguments))
            .collect::<LlmResult<Vec<_>>>()?;
        let usage = reply
            .usage
            .map(|u| UsageStats {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            stop_reason: choice
                .finish_reason
                .as_deref()
                .map_or(StopReason::EndTurn, StopReason::from),
            usage,
            model: reply.model,
        })
    }
}

pub struct OpenAiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(COMPLETIONS_URL)
    }

    fn request<'a>(
        &'a self,
        messages: &[Message],
        system: Option<&str>,
        tools: &'a [ToolDefinition],
        stream: bool,
    ) -> ChatRequest<'a> {
        let mut chat = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system {
            chat.push(json!({"role": "system", "content": system}));
        }
        chat.extend(messages.iter().flat_map(chat_messages));

        ChatRequest {
            model: &self.config.model,
            messages: chat,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
            // usage is only reported in streams when asked for
            stream_options: stream.then(|| json!({"include_usage": true})),
            tools: tools.iter().map(FunctionTool::from).collect(),
        }
    }

    async fn post(&self, body: &ChatRequest<'_>) -> LlmResult<reqwest::Response> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| missing_api_key_error(PROVIDER))?;
        let request = self.client.post(self.endpoint()).bearer_auth(api_key).json(body);
        send_checked(request, PROVIDER).await
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
    ) -> LlmResult<LlmResponse> {
        let body = self.request(&messages, system.as_deref(), &tools, false);
        let response = self.post(&body).await?;
        let reply: ChatReply = read_json(response, PROVIDER).await?;
        reply.try_into()
    }

    async fn stream_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<ProviderEvent>,
    ) -> LlmResult<LlmResponse> {
        let body = self.request(&messages, system.as_deref(), &tools, true);
        let response = self.post(&body).await?;
        collect_stream(response, OpenAiDecoder::new(), &tx, PROVIDER, &self.config.model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn provider() -> OpenAiProvider {
        let mut config = ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o");
        config.api_key = Some("test-key".to_string());
        OpenAiProvider::new(config).unwrap()
    }

    #[test]
    fn test_identity() {
        let provider = provider();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-4o");
        assert_eq!(provider.endpoint(), COMPLETIONS_URL);
    }

    #[test]
    fn test_message_mapping() {
        let user = chat_messages(&Message::user("Hello"));
        assert_eq!(user, vec![json!({"role": "user", "content": "Hello"})]);

        let call = chat_messages(&Message::tool_use("call_1", "query_sql", json!({"query": "SELECT 1"})));
        assert_eq!(call[0]["role"], "assistant");
        assert!(call[0]["content"].is_null());
        assert_eq!(call[0]["tool_calls"][0]["function"]["arguments"], r#"{"query":"SELECT 1"}"#);

        let result = chat_messages(&Message::tool_result("call_1", "ok", false));
        assert_eq!(result, vec![json!({"role": "tool", "tool_call_id": "call_1", "content": "ok"})]);
    }

    #[test]
    fn test_request_shape() {
        let provider = provider();
        let tools = vec![ToolDefinition {
            name: "search_items".to_string(),
            description: "Search stories".to_string(),
            input_schema: json!({"type": "object"}),
        }];

        let body = serde_json::to_value(provider.request(&[Message::user("q")], Some("sys"), &tools, true)).unwrap();
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "sys"}));
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");

        let body = serde_json::to_value(provider.request(&[Message::user("q")], None, &[], false)).unwrap();
        assert!(body.get("stream_options").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_reply_with_tool_call() {
        let reply: ChatReply = serde_json::from_value(json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "query_sql", "arguments": "{\"query\":\"SELECT 1\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2}
        }))
        .unwrap();

        let response = LlmResponse::try_from(reply).unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls[0].arguments["query"], "SELECT 1");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage.total_tokens(), 7);
    }

    #[test]
    fn test_reply_without_choices() {
        let reply: ChatReply = serde_json::from_value(json!({"model": "gpt-4o", "choices": []})).unwrap();
        assert!(matches!(
            LlmResponse::try_from(reply),
            Err(LlmError::ParseError { .. })
        ));
    }
}

//! Ollama `/api/chat` on a local server.
//!
//! No API key. Tool calls carry their arguments as JSON objects rather than
//! text, and tool results are plain `tool` messages without call ids.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::ProviderConfig;
use crate::decoders::OllamaDecoder;
use crate::error::{LlmError, LlmResult};
use crate::http_client::{build_http_client, send_checked};
use crate::openai::{role_name, FunctionTool};
use crate::provider::{map_transport_error, LlmProvider};
use crate::stream_collector::{collect_stream, ResponseAccumulator};
use crate::types::{LlmResponse, Message, MessageContent, ToolDefinition};
use pixlie_core::streaming::{LineDecoder, ProviderEvent};

const PROVIDER: &str = "ollama";
const LOCAL_SERVER: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    stream: bool,
    options: SamplingOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool<'a>>,
}

#[derive(Debug, Serialize)]
struct SamplingOptions {
    temperature: f32,
    num_predict: u32,
}

fn chat_messages(message: &Message) -> Vec<Value> {
    let mut calls = Vec::new();
    let mut results = Vec::new();
    for block in &message.content {
        match block {
            MessageContent::ToolUse { name, input, .. } => {
                calls.push(json!({"function": {"name": name, "arguments": input}}))
            }
            MessageContent::ToolResult { content, .. } => {
                results.push(json!({"role": "tool", "content": content}))
            }
            MessageContent::Text { .. } => {}
        }
    }
    let text = message.text_content();

    if !results.is_empty() {
        if !text.is_empty() {
            results.push(json!({"role": "user", "content": text}));
        }
        return results;
    }

    let mut turn = json!({"role": role_name(message.role), "content": text});
    if !calls.is_empty() {
        turn["tool_calls"] = Value::Array(calls);
    }
    vec![turn]
}

pub struct OllamaProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    fn server(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(LOCAL_SERVER)
            .trim_end_matches('/')
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
            stream,
            options: SamplingOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
            tools: tools.iter().map(FunctionTool::from).collect(),
        }
    }

    async fn post(&self, body: &ChatRequest<'_>) -> LlmResult<reqwest::Response> {
        let url = format!("{}/api/chat", self.server());
        send_checked(self.client.post(url).json(body), PROVIDER).await
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
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
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, PROVIDER))?;

        // A non-streamed reply is one final stream chunk.
        let events = OllamaDecoder::new()
            .decode(&text)
            .map_err(|e| LlmError::parse(format!("unexpected ollama response body: {}", e)))?;
        let mut accumulator = ResponseAccumulator::default();
        for event in &events {
            accumulator.apply(event)?;
        }
        Ok(accumulator.finish(&self.config.model))
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
        collect_stream(response, OllamaDecoder::new(), &tx, PROVIDER, &self.config.model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn provider(base_url: Option<&str>) -> OllamaProvider {
        let mut config = ProviderConfig::new(ProviderKind::Ollama, "llama3.1");
        config.base_url = base_url.map(str::to_string);
        OllamaProvider::new(config).unwrap()
    }

    #[test]
    fn test_server_url() {
        assert_eq!(provider(Some("http://127.0.0.1:11434/")).server(), "http://127.0.0.1:11434");
        assert_eq!(provider(None).server(), LOCAL_SERVER);
    }

    #[test]
    fn test_request_shape() {
        let provider = provider(None);
        let tools = vec![ToolDefinition {
            name: "query_sql".to_string(),
            description: "Run a query".to_string(),
            input_schema: json!({"type": "object"}),
        }];
        let messages = vec![
            Message::user("count authors"),
            Message::tool_use("c1", "query_sql", json!({"query": "SELECT 1"})),
            Message::tool_result("c1", "[[42]]", false),
        ];

        let body = serde_json::to_value(provider.request(&messages, Some("sys"), &tools, false)).unwrap();
        let chat = body["messages"].as_array().unwrap();
        assert_eq!(chat.len(), 4);
        assert_eq!(chat[0]["role"], "system");
        assert_eq!(chat[2]["tool_calls"][0]["function"]["arguments"]["query"], "SELECT 1");
        assert_eq!(chat[3], json!({"role": "tool", "content": "[[42]]"}));
        assert_eq!(body["tools"][0]["function"]["name"], "query_sql");
        assert_eq!(body["options"]["num_predict"], 4096);
        assert_eq!(body["stream"], false);
    }
}

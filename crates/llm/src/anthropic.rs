//! Anthropic Messages API.
//!
//! Our `MessageContent` blocks and `ToolDefinition`s already have the shape
//! the Messages API expects, so requests borrow them directly. System-role
//! messages are dropped from the turn list; the system prompt travels in its
//! own field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::ProviderConfig;
use crate::decoders::AnthropicDecoder;
use crate::error::LlmResult;
use crate::http_client::{build_http_client, read_json, send_checked};
use crate::provider::{missing_api_key_error, LlmProvider};
use crate::stream_collector::collect_stream;
use crate::types::{
    LlmResponse, Message, MessageContent, MessageRole, StopReason, ToolCall, ToolDefinition,
    UsageStats,
};
use pixlie_core::streaming::ProviderEvent;

const PROVIDER: &str = "anthropic";
const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Turn<'a>>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a [MessageContent],
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ReplyBlock>,
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ReplyUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ReplyUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl From<MessagesReply> for LlmResponse {
    fn from(reply: MessagesReply) -> Self {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in reply.content {
            match block {
                ReplyBlock::Text { text: part } => text.push_str(&part),
                ReplyBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ReplyBlock::Other => {}
            }
        }
        LlmResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            stop_reason: reply
                .stop_reason
                .as_deref()
                .map_or(StopReason::EndTurn, StopReason::from),
            usage: UsageStats {
                input_tokens: reply.usage.input_tokens,
                output_tokens: reply.usage.output_tokens,
            },
            model: reply.model,
        }
    }
}

pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(MESSAGES_URL)
    }

    fn request<'a>(
        &'a self,
        messages: &'a [Message],
        system: Option<&'a str>,
        tools: &'a [ToolDefinition],
        stream: bool,
    ) -> MessagesRequest<'a> {
        let turns = messages
            .iter()
            .filter_map(|message| {
                let role = match message.role {
                    MessageRole::System => return None,
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                };
                Some(Turn {
                    role,
                    content: &message.content,
                })
            })
            .collect();
        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
            system,
            messages: turns,
            tools,
        }
    }

    async fn post(&self, body: &MessagesRequest<'_>) -> LlmResult<reqwest::Response> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| missing_api_key_error(PROVIDER))?;
        let request = self
            .client
            .post(self.endpoint())
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(body);
        send_checked(request, PROVIDER).await
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
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
        let reply: MessagesReply = read_json(response, PROVIDER).await?;
        Ok(reply.into())
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
        collect_stream(response, AnthropicDecoder::new(), &tx, PROVIDER, &self.config.model).await
    }
}

use std::collections::HashMap;

use anthropic_ai_sdk::client::AnthropicClient;
use anthropic_ai_sdk::types::message::{
    ContentBlock as WireBlock, ContentBlockDelta, CreateMessageParams, CreateMessageResponse,
    Message, MessageClient, MessageError, RequiredMessageParams, Role as WireRole, StreamEvent,
    Thinking, ThinkingType, Tool, ToolChoice,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use crate::error::BackendError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelDelta, ModelRequest, ModelStream, ModelToolCall,
    ModelToolChoice, ModelUsage,
};
use crate::message::{ContentBlock, ConversationMessage, Role};
use crate::tools::format;

#[derive(Debug, Clone)]
/// Runtime configuration for [`AnthropicModel`].
pub struct AnthropicModelConfig {
    pub api_key: String,
    /// Model id used when an agent does not name one (for example `claude-sonnet-4-5`).
    pub default_model: String,
    /// Anthropic API version header value.
    pub api_version: String,
    /// Optional base URL override for proxies or compatible endpoints.
    pub api_base_url: Option<String>,
    /// Output token cap when the agent's inference params leave it unset.
    pub default_max_tokens: u32,
}

impl AnthropicModelConfig {
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            default_model: default_model.into(),
            api_version: AnthropicClient::DEFAULT_API_VERSION.to_string(),
            api_base_url: None,
            default_max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone)]
/// Anthropic Messages backend. One client can serve many agents: model id and
/// sampling parameters come from each call's [`ModelRequest`].
pub struct AnthropicModel {
    client: AnthropicClient,
    config: AnthropicModelConfig,
}

impl AnthropicModel {
    pub fn new(config: AnthropicModelConfig) -> Result<Self, BackendError> {
        let mut builder =
            AnthropicClient::builder(config.api_key.clone(), config.api_version.clone());
        if let Some(url) = &config.api_base_url {
            builder = builder.with_api_base_url(url.clone());
        }

        let client = builder
            .build::<MessageError>()
            .map_err(|err| BackendError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    /// Reads `ANTHROPIC_API_KEY` from the environment.
    pub fn from_env(default_model: impl Into<String>) -> Result<Self, BackendError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| BackendError::Auth("ANTHROPIC_API_KEY is not set".to_string()))?;
        Self::new(AnthropicModelConfig::new(api_key, default_model))
    }

    fn build_params(&self, request: &ModelRequest<'_>) -> Result<CreateMessageParams, BackendError> {
        let required = RequiredMessageParams {
            model: request
                .model_id
                .unwrap_or(&self.config.default_model)
                .to_string(),
            messages: to_wire_messages(request.messages),
            max_tokens: request
                .params
                .max_tokens
                .unwrap_or(self.config.default_max_tokens),
        };

        let mut params = CreateMessageParams::new(required).with_stream(false);

        if let Some(system_prompt) = request.system_prompt {
            params = params.with_system(system_prompt.to_string());
        }
        if let Some(temperature) = request.params.temperature {
            params = params.with_temperature(temperature);
        }
        if let Some(top_p) = request.params.top_p {
            params = params.with_top_p(top_p);
        }
        if let Some(budget_tokens) = request.params.thinking_budget_tokens {
            params = params.with_thinking(Thinking {
                budget_tokens: budget_tokens as usize,
                type_: ThinkingType::Enabled,
            });
        }

        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(to_wire_tool)
                .collect::<Result<Vec<_>, _>>()?;
            params = params.with_tools(tools);
            params = params.with_tool_choice(match request.tool_choice.clone() {
                ModelToolChoice::Auto => ToolChoice::Auto,
                ModelToolChoice::None => ToolChoice::None,
                ModelToolChoice::Tool(name) => ToolChoice::Tool { name },
            });
        }

        Ok(params)
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, BackendError> {
        let params = self.build_params(request)?;

        let response = self
            .client
            .create_message(Some(&params))
            .await
            .map_err(classify_error)?;

        Ok(normalize_response(&response))
    }

    /// Opens the event stream before returning, so connection and HTTP failures
    /// surface here where the caller's retry policy applies.
    async fn invoke_stream(&self, request: &ModelRequest<'_>) -> Result<ModelStream, BackendError> {
        let params = self.build_params(request)?.with_stream(true);
        let client = self.client.clone();

        let mut deltas: ModelStream = Box::pin(event_deltas(client, params));

        match deltas.next().await {
            Some(Err(err)) => Err(err),
            Some(Ok(first)) => Ok(Box::pin(
                futures_util::stream::iter([Ok(first)]).chain(deltas),
            )),
            None => Ok(deltas),
        }
    }

    fn tool_format(&self) -> &str {
        format::ANTHROPIC
    }
}

fn event_deltas(
    client: AnthropicClient,
    params: CreateMessageParams,
) -> impl Stream<Item = Result<ModelDelta, BackendError>> + Send {
    try_stream! {
        let events = client
            .create_message_streaming(&params)
            .await
            .map_err(classify_error)?;
        let mut events = std::pin::pin!(events);
        let mut decoder = StreamDecoder::default();
        while let Some(event) = events.next().await {
            for delta in decoder.decode(event.map_err(classify_error)?)? {
                yield delta;
            }
        }
    }
}

/// API failures carry the response body, whose `error.type` names the failure
/// class. Anything else never reached the API.
fn classify_error(err: MessageError) -> BackendError {
    match err {
        MessageError::RequestFailed(message) => BackendError::Request(message),
        MessageError::ApiError(body) => {
            let kind = serde_json::from_str::<Value>(&body).ok().and_then(|value| {
                value
                    .pointer("/error/type")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            match kind {
                Some(kind) => error_kind(&kind, body),
                None if body.starts_with("JSON parsing error") => BackendError::Response(body),
                None => BackendError::Request(body),
            }
        }
    }
}

fn error_kind(kind: &str, message: String) -> BackendError {
    match kind {
        "authentication_error" | "permission_error" => BackendError::Auth(message),
        "rate_limit_error" | "overloaded_error" => BackendError::RateLimited(message),
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            BackendError::Rejected(message)
        }
        _ => BackendError::Request(message),
    }
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input: Value,
    partial_json: String,
}

impl PendingToolUse {
    fn finish(self) -> Result<ModelToolCall, BackendError> {
        let arguments = if self.partial_json.trim().is_empty() {
            self.input
        } else {
            serde_json::from_str(&self.partial_json).map_err(|err| {
                BackendError::Response(format!("tool {} input is not valid JSON: {err}", self.name))
            })?
        };
        Ok(ModelToolCall {
            id: self.id,
            name: self.name,
            arguments,
        })
    }
}

/// Folds stream events into deltas. Tool input arrives as JSON fragments and is
/// surfaced as one call when its block stops.
#[derive(Debug, Default)]
struct StreamDecoder {
    pending_tools: HashMap<usize, PendingToolUse>,
    usage: ModelUsage,
}

impl StreamDecoder {
    fn decode(&mut self, event: StreamEvent) -> Result<Vec<ModelDelta>, BackendError> {
        let deltas = match event {
            StreamEvent::MessageStart { message } => {
                self.usage = ModelUsage {
                    input_tokens: message.usage.input_tokens,
                    output_tokens: message.usage.output_tokens,
                };
                Vec::new()
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                WireBlock::ToolUse { id, name, input } => {
                    self.pending_tools.insert(
                        index,
                        PendingToolUse {
                            id,
                            name,
                            input,
                            partial_json: String::new(),
                        },
                    );
                    Vec::new()
                }
                WireBlock::Text { text } if !text.is_empty() => vec![ModelDelta::Text(text)],
                WireBlock::Thinking {
                    thinking,
                    signature,
                } => {
                    let mut deltas = Vec::new();
                    if !thinking.is_empty() {
                        deltas.push(ModelDelta::Thinking(thinking));
                    }
                    if !signature.is_empty() {
                        deltas.push(ModelDelta::ThinkingSignature(signature));
                    }
                    deltas
                }
                WireBlock::RedactedThinking { data } => vec![ModelDelta::RedactedThinking(data)],
                _ => Vec::new(),
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDelta::TextDelta { text } => vec![ModelDelta::Text(text)],
                ContentBlockDelta::ThinkingDelta { thinking } => vec![ModelDelta::Thinking(thinking)],
                ContentBlockDelta::SignatureDelta { signature } => {
                    vec![ModelDelta::ThinkingSignature(signature)]
                }
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    let pending = self.pending_tools.get_mut(&index).ok_or_else(|| {
                        BackendError::Response(format!(
                            "input_json_delta for block {index} without tool_use start"
                        ))
                    })?;
                    pending.partial_json.push_str(&partial_json);
                    Vec::new()
                }
            },
            StreamEvent::ContentBlockStop { index } => match self.pending_tools.remove(&index) {
                Some(pending) => vec![ModelDelta::ToolCall(pending.finish()?)],
                None => Vec::new(),
            },
            StreamEvent::MessageDelta { usage, .. } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                    if usage.input_tokens > 0 {
                        self.usage.input_tokens = usage.input_tokens;
                    }
                }
                Vec::new()
            }
            StreamEvent::MessageStop => vec![ModelDelta::Usage(self.usage.clone())],
            StreamEvent::Ping => Vec::new(),
            StreamEvent::Error { error } => return Err(error_kind(&error.type_, error.message)),
        };
        Ok(deltas)
    }
}

fn to_wire_tool(descriptor: &Value) -> Result<Tool, BackendError> {
    let name = descriptor
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::Request(format!("tool descriptor without name: {descriptor}")))?;

    Ok(Tool {
        name: name.to_string(),
        description: descriptor
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        input_schema: descriptor
            .get("input_schema")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
    })
}

fn to_wire_messages(messages: &[ConversationMessage]) -> Vec<Message> {
    messages
        .iter()
        .filter_map(|message| {
            let blocks = message
                .content()
                .iter()
                .filter_map(to_wire_block)
                .collect::<Vec<_>>();
            if blocks.is_empty() {
                return None;
            }
            let role = match message.role() {
                Role::User => WireRole::User,
                Role::Assistant => WireRole::Assistant,
            };
            Some(Message::new_blocks(role, blocks))
        })
        .collect()
}

fn to_wire_block(block: &ContentBlock) -> Option<WireBlock> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(WireBlock::Text { text: text.clone() }),
        ContentBlock::Reasoning {
            text,
            signature: Some(signature),
        } => Some(WireBlock::Thinking {
            thinking: text.clone(),
            signature: signature.clone(),
        }),
        // Unsigned reasoning cannot be replayed.
        ContentBlock::Reasoning { .. } => None,
        ContentBlock::RedactedReasoning { data } => {
            Some(WireBlock::RedactedThinking { data: data.clone() })
        }
        ContentBlock::ToolUse {
            id,
            name,
            arguments,
        } => Some(WireBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: arguments.clone(),
        }),
        ContentBlock::ToolResult { id, payload, .. } => Some(WireBlock::ToolResult {
            tool_use_id: id.clone(),
            content: match payload {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            },
        }),
    }
}

fn normalize_response(response: &CreateMessageResponse) -> ModelCompletion {
    let mut text_parts = Vec::new();
    let mut thinking_parts = Vec::new();
    let mut thinking_signature = None;
    let mut redacted_thinking = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            WireBlock::Text { text } => text_parts.push(text.clone()),
            WireBlock::ToolUse { id, name, input } => tool_calls.push(ModelToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            WireBlock::Thinking {
                thinking,
                signature,
            } => {
                thinking_parts.push(thinking.clone());
                thinking_signature = Some(signature.clone());
            }
            WireBlock::RedactedThinking { data } => redacted_thinking.push(data.clone()),
            _ => {}
        }
    }

    ModelCompletion {
        text: (!text_parts.is_empty()).then(|| text_parts.join("\n")),
        thinking: (!thinking_parts.is_empty()).then(|| thinking_parts.join("\n")),
        thinking_signature,
        redacted_thinking,
        tool_calls,
        usage: Some(ModelUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        }),
    }
}

#[cfg(test)]
mod tests {
    use anthropic_ai_sdk::types::message::{MessageContent, StopReason};
    use serde_json::json;

    use super::*;

    fn response(content: Vec<WireBlock>) -> CreateMessageResponse {
        CreateMessageResponse {
            content,
            id: "msg_1".to_string(),
            model: "claude-test".to_string(),
            role: WireRole::Assistant,
            stop_reason: Some(StopReason::EndTurn),
            stop_sequence: None,
            type_: "message".to_string(),
            usage: anthropic_ai_sdk::types::message::Usage {
                input_tokens: 3,
                output_tokens: 5,
            },
        }
    }

    #[test]
    fn normalize_response_extracts_tool_calls_and_text() {
        let completion = normalize_response(&response(vec![
            WireBlock::Text {
                text: "Looking up".to_string(),
            },
            WireBlock::ToolUse {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({"city": "Paris"}),
            },
        ]));

        assert_eq!(completion.text.as_deref(), Some("Looking up"));
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "get_weather");
        assert_eq!(
            completion.usage,
            Some(ModelUsage {
                input_tokens: 3,
                output_tokens: 5
            })
        );
    }

    #[test]
    fn normalize_response_handles_thinking_without_text() {
        let completion = normalize_response(&response(vec![WireBlock::Thinking {
            thinking: "I should call a tool".to_string(),
            signature: "sig".to_string(),
        }]));

        assert!(completion.text.is_none());
        assert_eq!(completion.thinking.as_deref(), Some("I should call a tool"));
    }

    fn assistant_tool_turn(signature: Option<&str>) -> ConversationMessage {
        ConversationMessage::new(
            Role::Assistant,
            vec![
                ContentBlock::Reasoning {
                    text: "call the tool".to_string(),
                    signature: signature.map(str::to_string),
                },
                ContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: json!({"city": "Paris"}),
                },
            ],
        )
        .expect("valid message")
    }

    #[test]
    fn history_serializes_tool_results_and_drops_unsigned_reasoning() {
        let history = vec![
            ConversationMessage::user_text("weather in Paris?"),
            assistant_tool_turn(None),
            ConversationMessage::new(
                Role::User,
                vec![ContentBlock::ToolResult {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    payload: json!({"condition": "sunny"}),
                }],
            )
            .expect("valid message"),
        ];

        let messages = to_wire_messages(&history);
        assert_eq!(messages.len(), 3);

        let MessageContent::Blocks { content } = &messages[1].content else {
            panic!("expected blocks")
        };
        assert_eq!(content.len(), 1);
        assert!(matches!(&content[0], WireBlock::ToolUse { name, .. } if name == "get_weather"));

        let MessageContent::Blocks { content } = &messages[2].content else {
            panic!("expected blocks")
        };
        assert_eq!(
            content[0],
            WireBlock::ToolResult {
                tool_use_id: "call_1".to_string(),
                content: r#"{"condition":"sunny"}"#.to_string(),
            }
        );
    }

    #[test]
    fn signed_reasoning_leads_the_replayed_tool_turn() {
        let mut blocks = assistant_tool_turn(Some("sig-abc")).content().to_vec();
        blocks.insert(
            1,
            ContentBlock::RedactedReasoning {
                data: "opaque".to_string(),
            },
        );
        let turn = ConversationMessage::new(Role::Assistant, blocks).expect("valid message");

        let messages = to_wire_messages(&[turn]);
        let wire = serde_json::to_value(&messages[0]).expect("serializes");

        assert_eq!(wire["content"][0]["type"], "thinking");
        assert_eq!(wire["content"][0]["thinking"], "call the tool");
        assert_eq!(wire["content"][0]["signature"], "sig-abc");
        assert_eq!(wire["content"][1]["type"], "redacted_thinking");
        assert_eq!(wire["content"][1]["data"], "opaque");
        assert_eq!(wire["content"][2]["type"], "tool_use");
    }

    #[test]
    fn normalize_response_keeps_thinking_signature_and_redacted_data() {
        let completion = normalize_response(&response(vec![
            WireBlock::Thinking {
                thinking: "weather needs a lookup".to_string(),
                signature: "sig-abc".to_string(),
            },
            WireBlock::RedactedThinking {
                data: "opaque".to_string(),
            },
            WireBlock::ToolUse {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({"city": "Paris"}),
            },
        ]));

        assert_eq!(completion.thinking_signature.as_deref(), Some("sig-abc"));
        assert_eq!(completion.redacted_thinking, vec!["opaque".to_string()]);
    }

    fn recorded(events: Vec<Value>) -> Vec<StreamEvent> {
        events
            .into_iter()
            .map(|event| serde_json::from_value(event).expect("recorded event parses"))
            .collect()
    }

    fn decode_all(events: Vec<StreamEvent>) -> Result<Vec<ModelDelta>, BackendError> {
        let mut decoder = StreamDecoder::default();
        let mut deltas = Vec::new();
        for event in events {
            deltas.extend(decoder.decode(event)?);
        }
        Ok(deltas)
    }

    #[test]
    fn stream_events_decode_into_ordered_deltas() {
        let events = recorded(vec![
            json!({"type": "message_start", "message": {
                "id": "msg_1", "type": "message", "role": "assistant", "content": [],
                "model": "claude-test", "stop_reason": null, "stop_sequence": null,
                "usage": {"input_tokens": 12, "output_tokens": 1}
            }}),
            json!({"type": "content_block_start", "index": 0,
                   "content_block": {"type": "thinking", "thinking": "", "signature": ""}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "thinking_delta", "thinking": "Paris needs "}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "thinking_delta", "thinking": "a lookup"}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "signature_delta", "signature": "sig-abc"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1,
                   "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 1,
                   "delta": {"type": "text_delta", "text": "Checking"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "content_block_start", "index": 2, "content_block": {
                "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}
            }}),
            json!({"type": "content_block_delta", "index": 2,
                   "delta": {"type": "input_json_delta", "partial_json": "{\"city\": "}}),
            json!({"type": "ping"}),
            json!({"type": "content_block_delta", "index": 2,
                   "delta": {"type": "input_json_delta", "partial_json": "\"Paris\"}"}}),
            json!({"type": "content_block_stop", "index": 2}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use", "stop_sequence": null},
                   "usage": {"output_tokens": 40}}),
            json!({"type": "message_stop"}),
        ]);

        let deltas = decode_all(events).expect("decodes");

        assert_eq!(
            deltas,
            vec![
                ModelDelta::Thinking("Paris needs ".to_string()),
                ModelDelta::Thinking("a lookup".to_string()),
                ModelDelta::ThinkingSignature("sig-abc".to_string()),
                ModelDelta::Text("Checking".to_string()),
                ModelDelta::ToolCall(ModelToolCall {
                    id: "toolu_1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: json!({"city": "Paris"}),
                }),
                ModelDelta::Usage(ModelUsage {
                    input_tokens: 12,
                    output_tokens: 40,
                }),
            ]
        );
    }

    #[test]
    fn stream_error_event_and_broken_tool_json_fail() {
        let overloaded = recorded(vec![json!({"type": "error", "error": {
            "type": "overloaded_error", "message": "Overloaded"
        }})]);
        assert!(matches!(
            decode_all(overloaded),
            Err(BackendError::RateLimited(message)) if message == "Overloaded"
        ));

        let broken = recorded(vec![
            json!({"type": "content_block_start", "index": 0, "content_block": {
                "type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}
            }}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "input_json_delta", "partial_json": "{\"city\": "}}),
            json!({"type": "content_block_stop", "index": 0}),
        ]);
        assert!(matches!(decode_all(broken), Err(BackendError::Response(_))));
    }

    #[test]
    fn rendered_descriptor_becomes_wire_tool() {
        let tool = to_wire_tool(&json!({
            "name": "get_weather",
            "description": "Current weather",
            "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
        }))
        .expect("valid descriptor");

        assert_eq!(tool.name, "get_weather");
        assert_eq!(tool.description.as_deref(), Some("Current weather"));
        assert_eq!(tool.input_schema["properties"]["city"]["type"], "string");

        assert!(to_wire_tool(&json!({"description": "nameless"})).is_err());
    }

    #[test]
    fn api_error_type_maps_to_backend_error_kind() {
        let api_error = |kind: &str| {
            classify_error(MessageError::ApiError(
                json!({"type": "error", "error": {"type": kind, "message": "request 4291 failed"}})
                    .to_string(),
            ))
        };

        assert!(matches!(api_error("authentication_error"), BackendError::Auth(_)));
        assert!(matches!(api_error("permission_error"), BackendError::Auth(_)));
        assert!(matches!(api_error("rate_limit_error"), BackendError::RateLimited(_)));
        assert!(matches!(api_error("overloaded_error"), BackendError::RateLimited(_)));
        assert!(matches!(api_error("api_error"), BackendError::Request(_)));
        for kind in ["invalid_request_error", "not_found_error", "request_too_large"] {
            let err = api_error(kind);
            assert!(matches!(err, BackendError::Rejected(_)), "{kind}");
            assert!(!err.is_retryable(), "{kind}");
        }
    }

    #[test]
    fn numbers_in_unstructured_errors_do_not_pick_the_kind() {
        assert!(matches!(
            classify_error(MessageError::RequestFailed(
                "connection reset after 401 bytes".to_string()
            )),
            BackendError::Request(_)
        ));
        assert!(matches!(
            classify_error(MessageError::ApiError("upstream 403 proxy hiccup".to_string())),
            BackendError::Request(_)
        ));
        assert!(matches!(
            classify_error(MessageError::ApiError(
                "JSON parsing error: missing field `id`. Response body: {}".to_string()
            )),
            BackendError::Response(_)
        ));
    }
}

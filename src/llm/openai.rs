use std::collections::BTreeMap;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::BackendError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelDelta, ModelRequest, ModelStream, ModelToolCall,
    ModelToolChoice, ModelUsage,
};
use crate::message::{ContentBlock, ConversationMessage, Role};
use crate::tools::format;

const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
const EMPTY_USER_CONTENT_FALLBACK: &str = " ";

#[derive(Debug, Clone)]
pub struct OpenAiCompatModelConfig {
    pub api_key: String,
    pub default_model: String,
    pub api_base_url: Option<String>,
}

impl OpenAiCompatModelConfig {
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            default_model: default_model.into(),
            api_base_url: None,
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }
}

/// Any backend speaking the OpenAI chat-completions dialect (OpenAI, xAI, vLLM, ...).
#[derive(Debug, Clone)]
pub struct OpenAiCompatModel {
    client: Client,
    config: OpenAiCompatModelConfig,
}

impl OpenAiCompatModel {
    pub fn new(config: OpenAiCompatModelConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|err| BackendError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    /// Reads `OPENAI_API_KEY`, and `OPENAI_BASE_URL` when set.
    pub fn from_env(default_model: impl Into<String>) -> Result<Self, BackendError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| BackendError::Auth("OPENAI_API_KEY is not set".to_string()))?;

        let mut config = OpenAiCompatModelConfig::new(api_key, default_model);
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config = config.with_api_base_url(url);
        }
        Self::new(config)
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response, BackendError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|err| BackendError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = extract_api_error(response).await;
            return Err(status_error(status, message));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, BackendError> {
        let body = build_request(request, &self.config.default_model);

        let payload = self
            .send(&body)
            .await?
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| BackendError::Response(err.to_string()))?;

        normalize_response(payload)
    }

    /// Server-sent events. The HTTP status is checked before returning, so a refused
    /// request goes through the caller's retry policy.
    async fn invoke_stream(&self, request: &ModelRequest<'_>) -> Result<ModelStream, BackendError> {
        let mut body = build_request(request, &self.config.default_model);
        body.stream = true;
        body.stream_options = Some(json!({"include_usage": true}));

        let response = self.send(&body).await?;
        Ok(Box::pin(sse_deltas(response.bytes_stream())))
    }

    fn tool_format(&self) -> &str {
        format::OPENAI
    }
}

pub(super) fn status_error(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited(message),
        status if status.is_client_error() => BackendError::Rejected(message),
        _ => BackendError::Request(message),
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<RequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum RequestMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<WireToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    function: WireToolCallFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<AssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    type_: Option<String>,
}

fn build_request(request: &ModelRequest<'_>, default_model: &str) -> ChatCompletionRequest {
    let mut messages = Vec::new();
    if let Some(system_prompt) = request.system_prompt.filter(|text| !text.is_empty()) {
        messages.push(RequestMessage::System {
            content: system_prompt.to_string(),
        });
    }
    for message in request.messages {
        append_wire_messages(message, &mut messages);
    }
    if !messages
        .iter()
        .any(|message| !matches!(message, RequestMessage::System { .. }))
    {
        messages.push(RequestMessage::User {
            content: EMPTY_USER_CONTENT_FALLBACK.to_string(),
        });
    }

    let (tools, tool_choice) = if request.tools.is_empty() {
        (None, None)
    } else {
        let choice = match &request.tool_choice {
            ModelToolChoice::Auto => json!("auto"),
            ModelToolChoice::None => json!("none"),
            ModelToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
        };
        (Some(request.tools.to_vec()), Some(choice))
    };

    ChatCompletionRequest {
        model: request.model_id.unwrap_or(default_model).to_string(),
        messages,
        tools,
        tool_choice,
        temperature: request.params.temperature,
        top_p: request.params.top_p,
        max_tokens: request.params.max_tokens,
        stream: false,
        stream_options: None,
    }
}

fn append_wire_messages(message: &ConversationMessage, out: &mut Vec<RequestMessage>) {
    match message.role() {
        Role::Assistant => {
            let tool_calls = message
                .tool_uses()
                .map(|(id, name, arguments)| WireToolCall {
                    id: id.to_string(),
                    type_: "function".to_string(),
                    function: WireToolCallFunction {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                })
                .collect::<Vec<_>>();
            let text = message.text();
            if text.is_empty() && tool_calls.is_empty() {
                return;
            }
            out.push(RequestMessage::Assistant {
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            });
        }
        Role::User => {
            for block in message.content() {
                match block {
                    ContentBlock::ToolResult { id, payload, .. } => out.push(RequestMessage::Tool {
                        tool_call_id: id.clone(),
                        content: match payload {
                            Value::String(text) => text.clone(),
                            other => other.to_string(),
                        },
                    }),
                    ContentBlock::Text { text } if !text.is_empty() => {
                        out.push(RequestMessage::User {
                            content: text.clone(),
                        })
                    }
                    _ => {}
                }
            }
        }
    }
}

fn normalize_response(response: ChatCompletionResponse) -> Result<ModelCompletion, BackendError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Response("response missing choices".to_string()))?;

    let message = choice
        .message
        .ok_or_else(|| BackendError::Response("response missing choice message".to_string()))?;

    let mut tool_calls = Vec::new();
    for tool_call in message.tool_calls {
        let arguments = parse_arguments(&tool_call.function.name, &tool_call.function.arguments)?;
        tool_calls.push(ModelToolCall {
            id: tool_call.id,
            name: tool_call.function.name,
            arguments,
        });
    }

    Ok(ModelCompletion {
        text: message.content.filter(|text| !text.is_empty()),
        thinking: message.reasoning_content.filter(|text| !text.is_empty()),
        tool_calls,
        usage: response.usage.map(|usage| ModelUsage {
            input_tokens: usage.prompt_tokens.unwrap_or(0),
            output_tokens: usage.completion_tokens.unwrap_or(0),
        }),
        ..ModelCompletion::default()
    })
}

fn parse_arguments(name: &str, arguments: &str) -> Result<Value, BackendError> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str::<Value>(arguments).map_err(|err| {
        BackendError::Response(format!(
            "tool call arguments for '{name}' are not valid JSON: {err}"
        ))
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Splits the byte stream into `data:` lines and turns chunks into deltas.
///
/// Tool call fragments are keyed by their `index` and surface as one
/// [`ModelDelta::ToolCall`] each once the choice finishes.
#[derive(Debug, Default)]
struct ChunkDecoder {
    buffer: Vec<u8>,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    usage: Option<ModelUsage>,
    done: bool,
}

impl ChunkDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ModelDelta>, BackendError> {
        self.buffer.extend_from_slice(bytes);

        let mut deltas = Vec::new();
        while let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=end).collect::<Vec<_>>();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                deltas.extend(self.finish()?);
                continue;
            }

            let chunk = serde_json::from_str::<ChatCompletionChunk>(data)
                .map_err(|err| BackendError::Response(format!("malformed stream chunk: {err}")))?;
            self.apply(chunk, &mut deltas)?;
        }
        Ok(deltas)
    }

    fn apply(
        &mut self,
        chunk: ChatCompletionChunk,
        deltas: &mut Vec<ModelDelta>,
    ) -> Result<(), BackendError> {
        if let Some(error) = chunk.error {
            return Err(BackendError::Request(
                error
                    .message
                    .unwrap_or_else(|| "stream aborted by the server".to_string()),
            ));
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(ModelUsage {
                input_tokens: usage.prompt_tokens.unwrap_or(0),
                output_tokens: usage.completion_tokens.unwrap_or(0),
            });
        }

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(thinking) = delta.reasoning_content.filter(|text| !text.is_empty()) {
                    deltas.push(ModelDelta::Thinking(thinking));
                }
                if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
                    deltas.push(ModelDelta::Text(text));
                }
                for call in delta.tool_calls {
                    let pending = self.tool_calls.entry(call.index).or_default();
                    if let Some(id) = call.id {
                        pending.id = id;
                    }
                    if let Some(function) = call.function {
                        if let Some(name) = function.name.filter(|name| !name.is_empty()) {
                            pending.name = name;
                        }
                        if let Some(arguments) = function.arguments {
                            pending.arguments.push_str(&arguments);
                        }
                    }
                }
            }
            if choice.finish_reason.is_some() {
                deltas.extend(self.flush_tool_calls()?);
            }
        }
        Ok(())
    }

    fn flush_tool_calls(&mut self) -> Result<Vec<ModelDelta>, BackendError> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|call| {
                let arguments = parse_arguments(&call.name, &call.arguments)?;
                Ok(ModelDelta::ToolCall(ModelToolCall {
                    id: call.id,
                    name: call.name,
                    arguments,
                }))
            })
            .collect()
    }

    /// Called on `[DONE]` and again when the body ends; only the first call emits.
    fn finish(&mut self) -> Result<Vec<ModelDelta>, BackendError> {
        if self.done {
            return Ok(Vec::new());
        }
        self.done = true;

        let mut deltas = self.flush_tool_calls()?;
        deltas.extend(self.usage.take().map(ModelDelta::Usage));
        Ok(deltas)
    }
}

fn sse_deltas<S, B>(bytes: S) -> impl Stream<Item = Result<ModelDelta, BackendError>> + Send
where
    S: Stream<Item = reqwest::Result<B>> + Send,
    B: AsRef<[u8]> + Send,
{
    try_stream! {
        let mut decoder = ChunkDecoder::default();
        let mut bytes = std::pin::pin!(bytes);
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|err| BackendError::Request(err.to_string()))?;
            for delta in decoder.feed(chunk.as_ref())? {
                yield delta;
            }
        }
        for delta in decoder.finish()? {
            yield delta;
        }
    }
}

async fn extract_api_error(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let error_type = parsed
            .error
            .type_
            .unwrap_or_else(|| status.to_string().to_uppercase());
        let message = parsed
            .error
            .message
            .unwrap_or_else(|| "unknown api error".to_string());
        return format!("api error {} {error_type}: {message}", status.as_u16());
    }

    if body.is_empty() {
        format!("api request failed ({status})")
    } else {
        format!("api request failed ({status}): {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::InferenceParams;
    use crate::message::Request;

    fn serialize(
        messages: &[ConversationMessage],
        tools: &[Value],
        tool_choice: ModelToolChoice,
        params: &InferenceParams,
    ) -> Value {
        let request = Request::new("unused", "u", "s", Default::default());
        let model_request = ModelRequest {
            model_id: None,
            system_prompt: Some("You are helpful"),
            messages,
            tools,
            tool_choice,
            params,
            request: &request,
        };
        serde_json::to_value(build_request(&model_request, "gpt-4o-mini")).expect("serializes")
    }

    #[test]
    fn build_request_serializes_history_tools_and_choice() {
        let messages = vec![
            ConversationMessage::user_text("Weather in Paris?"),
            ConversationMessage::new(
                Role::Assistant,
                vec![
                    ContentBlock::Text {
                        text: "Calling tool".to_string(),
                    },
                    ContentBlock::ToolUse {
                        id: "call_1".to_string(),
                        name: "get_weather".to_string(),
                        arguments: json!({"city": "Paris"}),
                    },
                ],
            )
            .expect("valid message"),
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
        let tools = vec![json!({
            "type": "function",
            "function": {"name": "get_weather", "description": "Weather", "parameters": {"type": "object"}}
        })];
        let params = InferenceParams {
            temperature: Some(0.2),
            max_tokens: Some(512),
            ..InferenceParams::default()
        };

        let value = serialize(
            &messages,
            &tools,
            ModelToolChoice::Tool("get_weather".to_string()),
            &params,
        );

        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][2]["role"], "assistant");
        assert_eq!(
            value["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"city\":\"Paris\"}"
        );
        assert_eq!(value["messages"][3]["role"], "tool");
        assert_eq!(value["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(value["messages"][3]["content"], "{\"condition\":\"sunny\"}");
        assert_eq!(value["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(value["tool_choice"]["function"]["name"], "get_weather");
        assert_eq!(value["max_tokens"], 512);
    }

    #[test]
    fn build_request_adds_fallback_user_message() {
        let value = serialize(&[], &[], ModelToolChoice::Auto, &InferenceParams::default());

        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], " ");
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn every_tool_choice_has_a_wire_form() {
        let tools = vec![json!({"type": "function", "function": {"name": "get_weather"}})];
        let params = InferenceParams::default();
        let choice = |tool_choice| serialize(&[], &tools, tool_choice, &params)["tool_choice"].clone();

        assert_eq!(choice(ModelToolChoice::Auto), json!("auto"));
        assert_eq!(choice(ModelToolChoice::None), json!("none"));
        assert_eq!(
            choice(ModelToolChoice::Tool("get_weather".to_string())),
            json!({"type": "function", "function": {"name": "get_weather"}})
        );
    }

    #[test]
    fn normalize_response_extracts_text_thinking_and_tool_calls() {
        let response = ChatCompletionResponse {
            choices: vec![Choice {
                message: Some(AssistantMessage {
                    content: Some("answer".to_string()),
                    tool_calls: vec![WireToolCall {
                        id: "call_x".to_string(),
                        type_: "function".to_string(),
                        function: WireToolCallFunction {
                            name: "get_weather".to_string(),
                            arguments: "{\"city\":\"Oslo\"}".to_string(),
                        },
                    }],
                    reasoning_content: Some("reasoning".to_string()),
                }),
            }],
            usage: Some(Usage {
                prompt_tokens: Some(11),
                completion_tokens: Some(7),
            }),
        };

        let completion = normalize_response(response).expect("normalizes");

        assert_eq!(completion.text.as_deref(), Some("answer"));
        assert_eq!(completion.thinking.as_deref(), Some("reasoning"));
        assert_eq!(completion.tool_calls[0].arguments, json!({"city": "Oslo"}));
        assert_eq!(
            completion.usage,
            Some(ModelUsage {
                input_tokens: 11,
                output_tokens: 7,
            })
        );
    }

    #[test]
    fn normalize_response_rejects_missing_choices_and_bad_arguments() {
        let err = normalize_response(ChatCompletionResponse {
            choices: Vec::new(),
            usage: None,
        })
        .expect_err("should fail");
        assert!(matches!(err, BackendError::Response(message) if message.contains("missing choices")));

        let err = normalize_response(ChatCompletionResponse {
            choices: vec![Choice {
                message: Some(AssistantMessage {
                    content: None,
                    tool_calls: vec![WireToolCall {
                        id: "call_x".to_string(),
                        type_: "function".to_string(),
                        function: WireToolCallFunction {
                            name: "get_weather".to_string(),
                            arguments: "{not json}".to_string(),
                        },
                    }],
                    reasoning_content: None,
                }),
            }],
            usage: None,
        })
        .expect_err("should fail");
        assert!(matches!(err, BackendError::Response(message) if message.contains("not valid JSON")));
    }

    #[test]
    fn http_status_maps_to_error_kind() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            BackendError::Auth(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new()),
            BackendError::Request(_)
        ));
    }

    #[test]
    fn permanent_client_errors_are_not_retryable() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            let err = status_error(status, "invalid model".to_string());
            assert!(matches!(err, BackendError::Rejected(_)), "{status}");
            assert!(!err.is_retryable(), "{status}");
        }
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_retryable());
    }

    const RECORDED_STREAM: &str = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"reasoning_content\":\"needs a lookup\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Checking Zürich\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",",
        "\"type\":\"function\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,",
        "\"function\":{\"arguments\":\"{\\\"city\\\": \"}}]}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,",
        "\"function\":{\"arguments\":\"\\\"Zürich\\\"}\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":21,\"completion_tokens\":9}}\n\n",
        "data: [DONE]\n\n",
    );

    fn expected_stream_deltas() -> Vec<ModelDelta> {
        vec![
            ModelDelta::Thinking("needs a lookup".to_string()),
            ModelDelta::Text("Checking Zürich".to_string()),
            ModelDelta::ToolCall(ModelToolCall {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: json!({"city": "Zürich"}),
            }),
            ModelDelta::Usage(ModelUsage {
                input_tokens: 21,
                output_tokens: 9,
            }),
        ]
    }

    #[tokio::test]
    async fn event_stream_assembles_fragments_across_byte_boundaries() {
        // Seven-byte reads split lines, JSON strings and the multi-byte 'ü'.
        let pieces = RECORDED_STREAM
            .as_bytes()
            .chunks(7)
            .map(|piece| Ok::<_, reqwest::Error>(piece.to_vec()))
            .collect::<Vec<_>>();

        let deltas = sse_deltas(futures_util::stream::iter(pieces))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .expect("stream decodes");

        assert_eq!(deltas, expected_stream_deltas());
    }

    #[test]
    fn body_ending_without_done_marker_still_flushes() {
        let mut decoder = ChunkDecoder::default();
        let body = RECORDED_STREAM.trim_end_matches("data: [DONE]\n\n");

        let mut deltas = decoder.feed(body.as_bytes()).expect("feeds");
        deltas.extend(decoder.finish().expect("finishes"));

        assert_eq!(deltas, expected_stream_deltas());
        assert!(decoder.finish().expect("idempotent").is_empty());
    }

    #[test]
    fn error_chunk_and_broken_arguments_fail_the_stream() {
        let mut decoder = ChunkDecoder::default();
        let err = decoder
            .feed(b"data: {\"error\":{\"message\":\"upstream timeout\",\"type\":\"server_error\"}}\n\n")
            .expect_err("error chunk");
        assert!(matches!(err, BackendError::Request(message) if message == "upstream timeout"));

        let mut decoder = ChunkDecoder::default();
        let err = decoder
            .feed(concat!(
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",",
                "\"function\":{\"name\":\"get_weather\",\"arguments\":\"{\\\"city\"}}]}}]}\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n",
            ).as_bytes())
            .expect_err("truncated arguments");
        assert!(matches!(err, BackendError::Response(_)));
    }

    #[test]
    fn streaming_request_asks_for_usage() {
        let request = Request::new("unused", "u", "s", Default::default());
        let params = InferenceParams::default();
        let mut body = build_request(
            &ModelRequest {
                model_id: None,
                system_prompt: None,
                messages: &[ConversationMessage::user_text("hi")],
                tools: &[],
                tool_choice: ModelToolChoice::Auto,
                params: &params,
                request: &request,
            },
            "gpt-4o-mini",
        );
        assert!(serde_json::to_value(&body).expect("serializes").get("stream").is_none());

        body.stream = true;
        body.stream_options = Some(json!({"include_usage": true}));
        let value = serde_json::to_value(&body).expect("serializes");

        assert_eq!(value["stream"], true);
        assert_eq!(value["stream_options"]["include_usage"], true);
    }
}

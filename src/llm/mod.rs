mod anthropic;
mod codec;
mod openai;

#[cfg(test)]
pub(crate) mod testing;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;
use crate::message::{ConversationMessage, Request};
use crate::tools::format;

pub use anthropic::{AnthropicModel, AnthropicModelConfig};
pub use codec::{CodecModel, FnCodec, HttpTransport, JsonCodec, PayloadCodec, PayloadTransport};
pub use openai::{OpenAiCompatModel, OpenAiCompatModelConfig};

/// Sampling parameters forwarded to the backend on every call of a turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub thinking_budget_tokens: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelToolChoice {
    Auto,
    None,
    Tool(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelCompletion {
    pub text: Option<String>,
    pub thinking: Option<String>,
    /// Signature over `thinking`, echoed back when the reasoning is replayed.
    pub thinking_signature: Option<String>,
    pub redacted_thinking: Vec<String>,
    pub tool_calls: Vec<ModelToolCall>,
    pub usage: Option<ModelUsage>,
}

impl ModelCompletion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Replays a one-shot completion in the order a streaming backend emits it.
    pub fn into_deltas(self) -> Vec<ModelDelta> {
        let mut deltas = Vec::new();
        if let Some(thinking) = self.thinking.filter(|text| !text.is_empty()) {
            deltas.push(ModelDelta::Thinking(thinking));
        }
        if let Some(signature) = self.thinking_signature {
            deltas.push(ModelDelta::ThinkingSignature(signature));
        }
        deltas.extend(
            self.redacted_thinking
                .into_iter()
                .map(ModelDelta::RedactedThinking),
        );
        if let Some(text) = self.text.filter(|text| !text.is_empty()) {
            deltas.push(ModelDelta::Text(text));
        }
        deltas.extend(self.tool_calls.into_iter().map(ModelDelta::ToolCall));
        if let Some(usage) = self.usage {
            deltas.push(ModelDelta::Usage(usage));
        }
        deltas
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One piece of backend output. Tool calls arrive whole: partial argument JSON is
/// assembled by the backend adapter before it is surfaced.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelDelta {
    Thinking(String),
    ThinkingSignature(String),
    RedactedThinking(String),
    Text(String),
    ToolCall(ModelToolCall),
    Usage(ModelUsage),
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelDelta, BackendError>> + Send>>;

/// Everything a backend needs for a single call.
///
/// `tools` are already rendered in the schema named by [`ChatModel::tool_format`].
/// `request` carries the original utterance and identity for backends that encode
/// their own wire payload.
#[derive(Clone, Debug)]
pub struct ModelRequest<'a> {
    pub model_id: Option<&'a str>,
    pub system_prompt: Option<&'a str>,
    pub messages: &'a [ConversationMessage],
    pub tools: &'a [Value],
    pub tool_choice: ModelToolChoice,
    pub params: &'a InferenceParams,
    pub request: &'a Request,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, BackendError>;

    /// Streams one call. Backends without native streaming replay [`ChatModel::invoke`].
    async fn invoke_stream(&self, request: &ModelRequest<'_>) -> Result<ModelStream, BackendError> {
        let completion = self.invoke(request).await?;
        let deltas = completion.into_deltas().into_iter().map(Ok);
        Ok(Box::pin(futures_util::stream::iter(deltas)))
    }

    /// Target id of the tool renderer this backend expects.
    fn tool_format(&self) -> &str {
        format::ANTHROPIC
    }

    fn supports_tools(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        initial_backoff: Duration::ZERO,
    };

    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are spent. Backoff doubles after each failed attempt.
pub async fn with_retry<F, Fut, T>(
    policy: RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BackendError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "backend call failed, retrying"
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

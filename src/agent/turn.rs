//! The tool-call loop that drives one agent turn.
//!
//! A turn is a lazy [`TurnStream`]: nothing reaches the backend until the stream is
//! polled, and dropping it stops the turn at its next suspension point.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::{stream, try_stream};
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::callbacks::{AgentCallbacks, CallbackContext, observe};
use crate::error::AgentError;
use crate::llm::{
    ChatModel, ModelDelta, ModelRequest, ModelStream, ModelToolCall, ModelToolChoice,
    ModelUsage, RetryPolicy, with_retry,
};
use crate::message::{ContentBlock, ConversationMessage, Request, Role};
use crate::tools::{ToolContext, ToolRegistry};

use super::AgentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingModel,
    ExecutingTool,
    Done,
    DepthExceeded,
}

/// Per-turn bookkeeping of the tool-call loop.
#[derive(Debug, Clone)]
pub struct RecursionState {
    depth: u32,
    accumulated_messages: Vec<ConversationMessage>,
    state: TurnState,
}

impl RecursionState {
    pub fn new(messages: Vec<ConversationMessage>) -> Self {
        Self {
            depth: 0,
            accumulated_messages: messages,
            state: TurnState::AwaitingModel,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.accumulated_messages
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.accumulated_messages.push(message);
    }

    /// Enters a tool round, or fails when one more round would pass `max_depth`.
    pub fn begin_tool_round(&mut self, max_depth: u32) -> Result<(), AgentError> {
        if self.depth >= max_depth {
            self.transition(TurnState::DepthExceeded);
            return Err(AgentError::ToolRecursionLimitExceeded { max_depth });
        }
        self.depth += 1;
        self.transition(TurnState::ExecutingTool);
        Ok(())
    }

    pub fn resume(&mut self) {
        self.transition(TurnState::AwaitingModel);
    }

    pub fn finish(&mut self) {
        self.transition(TurnState::Done);
    }

    fn transition(&mut self, next: TurnState) {
        tracing::trace!(from = ?self.state, to = ?next, depth = self.depth, "turn state");
        self.state = next;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamIncrement {
    ThinkingDelta(String),
    TextDelta(String),
    ToolCallDelta {
        id: String,
        name: String,
        arguments: Value,
    },
    EndOfTurn {
        depth: u32,
    },
}

pub type TurnStream = Pin<Box<dyn Stream<Item = Result<StreamIncrement, AgentError>> + Send>>;

#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub stream: bool,
    pub cancellation: CancellationToken,
    pub callback_context: CallbackContext,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            stream: false,
            cancellation: CancellationToken::new(),
            callback_context: CallbackContext::default(),
        }
    }
}

impl TurnOptions {
    pub fn streaming() -> Self {
        Self {
            stream: true,
            ..Self::default()
        }
    }
}

pub struct TurnHandle {
    agent_name: String,
    streaming: bool,
    stream: TurnStream,
    depth: u32,
}

impl std::fmt::Debug for TurnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnHandle")
            .field("agent_name", &self.agent_name)
            .field("streaming", &self.streaming)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl TurnHandle {
    pub(crate) fn new(agent_name: String, streaming: bool, stream: TurnStream) -> Self {
        Self {
            agent_name,
            streaming,
            stream,
            depth: 0,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Tool rounds completed, known once `EndOfTurn` has been read.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub async fn next_increment(&mut self) -> Option<Result<StreamIncrement, AgentError>> {
        let item = self.stream.next().await;
        if let Some(Ok(StreamIncrement::EndOfTurn { depth })) = &item {
            self.depth = *depth;
        }
        item
    }

    pub async fn await_result(mut self) -> Result<ConversationMessage, AgentError> {
        let mut assembler = MessageAssembler::default();
        while let Some(increment) = self.next_increment().await {
            assembler.push(&increment?);
        }
        assembler.finish()
    }

    pub fn into_stream(self) -> TurnStream {
        self.stream
    }
}

/// Folds increments back into the final assistant message.
#[derive(Debug, Default)]
pub(crate) struct MessageAssembler {
    thinking: String,
    text: String,
    finished: bool,
}

impl MessageAssembler {
    pub(crate) fn push(&mut self, increment: &StreamIncrement) {
        match increment {
            StreamIncrement::ThinkingDelta(text) => self.thinking.push_str(text),
            StreamIncrement::TextDelta(text) => self.text.push_str(text),
            StreamIncrement::ToolCallDelta { .. } => {}
            StreamIncrement::EndOfTurn { .. } => self.finished = true,
        }
    }

    pub(crate) fn finish(self) -> Result<ConversationMessage, AgentError> {
        if !self.finished {
            return Err(AgentError::MissingFinalResponse);
        }
        let mut blocks = Vec::new();
        if !self.thinking.is_empty() {
            blocks.push(ContentBlock::Reasoning {
                text: self.thinking,
                signature: None,
            });
        }
        blocks.push(ContentBlock::Text { text: self.text });
        ConversationMessage::new(Role::Assistant, blocks)
    }
}

pub(crate) struct TurnSetup {
    pub(crate) agent_name: String,
    pub(crate) model: Arc<dyn ChatModel>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) use_tools: bool,
    pub(crate) callbacks: Arc<dyn AgentCallbacks>,
    pub(crate) config: AgentConfig,
    pub(crate) request: Request,
    pub(crate) messages: Vec<ConversationMessage>,
    pub(crate) streaming: bool,
    pub(crate) cancellation: CancellationToken,
    pub(crate) ctx: CallbackContext,
}

/// Output of one backend call, gathered while its deltas are forwarded.
#[derive(Debug, Default)]
struct ModelRound {
    thinking: String,
    signature: Option<String>,
    redacted: Vec<String>,
    text: String,
    tool_calls: Vec<ModelToolCall>,
    usage: Option<ModelUsage>,
}

impl ModelRound {
    fn to_message(&self) -> Result<ConversationMessage, AgentError> {
        let mut blocks = Vec::new();
        if !self.thinking.is_empty() {
            blocks.push(ContentBlock::Reasoning {
                text: self.thinking.clone(),
                signature: self.signature.clone(),
            });
        }
        blocks.extend(
            self.redacted
                .iter()
                .map(|data| ContentBlock::RedactedReasoning { data: data.clone() }),
        );
        if !self.text.is_empty() || self.tool_calls.is_empty() {
            blocks.push(ContentBlock::Text {
                text: self.text.clone(),
            });
        }
        blocks.extend(self.tool_calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }));
        ConversationMessage::new(Role::Assistant, blocks)
    }

    fn summary(&self) -> Value {
        json!({
            "text": self.text,
            "thinking": self.thinking,
            "tool_calls": self.tool_calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>(),
            "usage": self.usage.as_ref().map(|usage| json!({
                "input_tokens": usage.input_tokens,
                "output_tokens": usage.output_tokens,
            })),
        })
    }
}

async fn cancellable<T, E, F>(token: &CancellationToken, fut: F) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<AgentError>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(AgentError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}

pub(crate) fn run_turn(setup: TurnSetup) -> TurnStream {
    Box::pin(observe_turn_end(setup))
}

/// State and error reported to `on_turn_end` when a turn fails.
fn failure_summary(err: &AgentError) -> Value {
    let state = match err {
        AgentError::ToolRecursionLimitExceeded { .. } => format!("{:?}", TurnState::DepthExceeded),
        AgentError::Cancelled => "Cancelled".to_string(),
        _ => "Failed".to_string(),
    };
    json!({"state": state, "error": err.to_string()})
}

/// Fires `on_turn_end` on every terminal item, success or failure. A turn dropped
/// before it finishes reports nothing.
fn observe_turn_end(
    setup: TurnSetup,
) -> impl Stream<Item = Result<StreamIncrement, AgentError>> + Send {
    let agent_name = setup.agent_name.clone();
    let callbacks = Arc::clone(&setup.callbacks);
    let ctx = setup.ctx.clone();
    let mut rounds = Box::pin(turn_rounds(setup));

    stream! {
        while let Some(item) = rounds.next().await {
            let summary = match &item {
                Ok(StreamIncrement::EndOfTurn { depth }) => Some(json!({
                    "depth": depth,
                    "state": format!("{:?}", TurnState::Done),
                })),
                Ok(_) => None,
                Err(err) => Some(failure_summary(err)),
            };
            let terminal = summary.is_some();
            if let Some(summary) = summary {
                observe(
                    "on_turn_end",
                    &ctx,
                    callbacks.on_turn_end(&agent_name, &summary, &ctx),
                )
                .await;
            }
            yield item;
            if terminal {
                break;
            }
        }
    }
}

fn turn_rounds(setup: TurnSetup) -> impl Stream<Item = Result<StreamIncrement, AgentError>> + Send {
    let TurnSetup {
        agent_name,
        model,
        tools,
        use_tools,
        callbacks,
        config,
        request,
        messages,
        streaming,
        cancellation,
        ctx,
    } = setup;

    try_stream! {
        let tool_descriptors = if use_tools {
            tools.render(model.tool_format())?
        } else {
            Vec::new()
        };
        let tool_choice = if tool_descriptors.is_empty() {
            ModelToolChoice::None
        } else {
            ModelToolChoice::Auto
        };
        let retry = RetryPolicy::new(
            config.backend_retries,
            Duration::from_millis(config.backend_retry_backoff_ms),
        );
        let mut state = RecursionState::new(messages);

        tracing::debug!(
            agent = %agent_name,
            streaming,
            tools = tool_descriptors.len(),
            max_depth = config.max_tool_depth,
            "turn started"
        );
        observe(
            "on_turn_start",
            &ctx,
            callbacks.on_turn_start(&agent_name, &json!({"utterance": request.utterance()}), &ctx),
        )
        .await;

        loop {
            if cancellation.is_cancelled() {
                Err::<(), AgentError>(AgentError::Cancelled)?;
            }

            observe(
                "on_model_call_start",
                &ctx,
                callbacks.on_model_call_start(
                    &agent_name,
                    &json!({"messages": state.messages().len(), "depth": state.depth()}),
                    &ctx,
                ),
            )
            .await;

            let model_request = ModelRequest {
                model_id: config.model_id.as_deref(),
                system_prompt: config.system_prompt.as_deref(),
                messages: state.messages(),
                tools: &tool_descriptors,
                tool_choice: tool_choice.clone(),
                params: &config.inference,
                request: &request,
            };

            let mut deltas: ModelStream = if streaming {
                cancellable(
                    &cancellation,
                    with_retry(retry, &agent_name, || model.invoke_stream(&model_request)),
                )
                .await?
            } else {
                let completion = cancellable(
                    &cancellation,
                    with_retry(retry, &agent_name, || model.invoke(&model_request)),
                )
                .await?;
                Box::pin(futures_util::stream::iter(
                    completion.into_deltas().into_iter().map(Ok),
                ))
            };

            let mut round = ModelRound::default();
            while let Some(delta) =
                cancellable(&cancellation, async { deltas.next().await.transpose() }).await?
            {
                match delta {
                    ModelDelta::Thinking(text) => {
                        if !text.is_empty() {
                            round.thinking.push_str(&text);
                            yield StreamIncrement::ThinkingDelta(text);
                        }
                    }
                    ModelDelta::ThinkingSignature(signature) => round.signature = Some(signature),
                    ModelDelta::RedactedThinking(data) => round.redacted.push(data),
                    ModelDelta::Text(text) => {
                        if !text.is_empty() {
                            round.text.push_str(&text);
                            yield StreamIncrement::TextDelta(text);
                        }
                    }
                    ModelDelta::ToolCall(call) => round.tool_calls.push(call),
                    ModelDelta::Usage(usage) => round.usage = Some(usage),
                }
            }

            observe(
                "on_model_call_end",
                &ctx,
                callbacks.on_model_call_end(&agent_name, &round.summary(), &ctx),
            )
            .await;

            if !use_tools && !round.tool_calls.is_empty() {
                tracing::warn!(
                    agent = %agent_name,
                    calls = round.tool_calls.len(),
                    "backend requested tools on an agent without tools, ignoring"
                );
                round.tool_calls.clear();
            }

            state.push(round.to_message()?);

            if round.tool_calls.is_empty() {
                state.finish();
                break;
            }

            state.begin_tool_round(config.max_tool_depth)?;
            tracing::debug!(
                agent = %agent_name,
                depth = state.depth(),
                calls = round.tool_calls.len(),
                "executing tool round"
            );

            let mut results = Vec::with_capacity(round.tool_calls.len());
            for call in round.tool_calls {
                yield StreamIncrement::ToolCallDelta {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                };

                observe(
                    "on_tool_call_start",
                    &ctx,
                    callbacks.on_tool_call_start(&call.name, &call.arguments, &ctx),
                )
                .await;

                let context = ToolContext {
                    call_id: call.id.clone(),
                    agent_name: agent_name.clone(),
                    user_id: request.user_id().to_string(),
                    session_id: request.session_id().to_string(),
                };
                let result = cancellable(
                    &cancellation,
                    tools.invoke(&call.name, call.arguments, context),
                )
                .await?;

                observe(
                    "on_tool_call_end",
                    &ctx,
                    callbacks.on_tool_call_end(&call.name, &result.payload, &ctx),
                )
                .await;
                results.push(ContentBlock::from(result));
            }

            state.push(ConversationMessage::new(Role::User, results)?);
            state.resume();
        }

        tracing::debug!(agent = %agent_name, depth = state.depth(), "turn finished");

        yield StreamIncrement::EndOfTurn {
            depth: state.depth(),
        };
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BackendError;
use crate::llm::{ChatModel, ModelCompletion, ModelDelta, ModelRequest, ModelStream};
use crate::message::ConversationMessage;
use crate::tools::format;

/// Replays queued responses, then either repeats a fallback completion or fails.
pub(crate) struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelCompletion, BackendError>>>,
    fallback: Option<ModelCompletion>,
    calls: Arc<AtomicUsize>,
    seen_messages: Mutex<Vec<Vec<ConversationMessage>>>,
    seen_tools: Mutex<Vec<Vec<Value>>>,
    format: &'static str,
    supports_tools: bool,
}

impl ScriptedModel {
    pub(crate) fn new(responses: Vec<Result<ModelCompletion, BackendError>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            fallback: None,
            calls: Arc::new(AtomicUsize::new(0)),
            seen_messages: Mutex::new(Vec::new()),
            seen_tools: Mutex::new(Vec::new()),
            format: format::ANTHROPIC,
            supports_tools: true,
        }
    }

    pub(crate) fn always(completion: ModelCompletion) -> Self {
        let mut model = Self::new(Vec::new());
        model.fallback = Some(completion);
        model
    }

    pub(crate) fn with_format(mut self, format: &'static str) -> Self {
        self.format = format;
        self
    }

    pub(crate) fn without_tools(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub(crate) fn seen_messages(&self) -> Vec<Vec<ConversationMessage>> {
        self.seen_messages.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn seen_tools(&self) -> Vec<Vec<Value>> {
        self.seen_tools.lock().expect("lock poisoned").clone()
    }

    fn next_response(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_messages
            .lock()
            .expect("lock poisoned")
            .push(request.messages.to_vec());
        self.seen_tools
            .lock()
            .expect("lock poisoned")
            .push(request.tools.to_vec());

        let mut guard = self.responses.lock().expect("lock poisoned");
        match guard.pop_front() {
            Some(response) => response,
            None => self.fallback.clone().ok_or_else(|| {
                BackendError::Response("no more scripted model responses".to_string())
            }),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, BackendError> {
        self.next_response(request)
    }

    fn tool_format(&self) -> &str {
        self.format
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }
}

/// Streams a scripted completion word by word, like a native streaming backend.
pub(crate) struct ChunkedModel(pub(crate) ScriptedModel);

#[async_trait]
impl ChatModel for ChunkedModel {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, BackendError> {
        self.0.invoke(request).await
    }

    async fn invoke_stream(&self, request: &ModelRequest<'_>) -> Result<ModelStream, BackendError> {
        let completion = self.0.next_response(request)?;
        let mut deltas = Vec::new();
        if let Some(thinking) = completion.thinking {
            deltas.push(ModelDelta::Thinking(thinking));
        }
        if let Some(text) = completion.text {
            deltas.extend(
                text.split_inclusive(' ')
                    .map(|word| ModelDelta::Text(word.to_string())),
            );
        }
        deltas.extend(completion.tool_calls.into_iter().map(ModelDelta::ToolCall));
        Ok(Box::pin(futures_util::stream::iter(
            deltas.into_iter().map(Ok),
        )))
    }

    fn tool_format(&self) -> &str {
        self.0.tool_format()
    }
}

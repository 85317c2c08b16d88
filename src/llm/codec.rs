//! Backends with their own wire envelope.
//!
//! A [`PayloadCodec`] turns a request into a JSON payload and a raw reply back into a
//! [`ConversationMessage`]; a [`PayloadTransport`] ships the payload. [`CodecModel`]
//! glues the two into a [`ChatModel`] so such backends route like any other agent.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::error::BackendError;
use crate::llm::{ChatModel, ModelCompletion, ModelRequest};
use crate::message::ConversationMessage;

pub trait PayloadCodec: Send + Sync {
    fn encode(
        &self,
        utterance: &str,
        history: &[ConversationMessage],
        user_id: &str,
        session_id: &str,
        extra_params: &HashMap<String, String>,
    ) -> Result<Value, BackendError>;

    fn decode(&self, raw: Value) -> Result<ConversationMessage, BackendError>;
}

/// Default envelope: `{query, history, user_id, session_id, additional_params}` out,
/// `{"response": "..."}` or a serialized message back.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(
        &self,
        utterance: &str,
        history: &[ConversationMessage],
        user_id: &str,
        session_id: &str,
        extra_params: &HashMap<String, String>,
    ) -> Result<Value, BackendError> {
        let history = serde_json::to_value(history)
            .map_err(|err| BackendError::Request(format!("history not serializable: {err}")))?;
        Ok(json!({
            "query": utterance,
            "history": history,
            "user_id": user_id,
            "session_id": session_id,
            "additional_params": extra_params,
        }))
    }

    fn decode(&self, raw: Value) -> Result<ConversationMessage, BackendError> {
        if let Some(text) = raw.get("response").and_then(Value::as_str) {
            return Ok(ConversationMessage::assistant_text(text));
        }
        serde_json::from_value(raw)
            .map_err(|err| BackendError::Response(format!("unrecognized payload: {err}")))
    }
}

/// Codec assembled from two closures.
pub struct FnCodec<E, D> {
    encoder: E,
    decoder: D,
}

impl<E, D> FnCodec<E, D>
where
    E: Fn(
            &str,
            &[ConversationMessage],
            &str,
            &str,
            &HashMap<String, String>,
        ) -> Result<Value, BackendError>
        + Send
        + Sync,
    D: Fn(Value) -> Result<ConversationMessage, BackendError> + Send + Sync,
{
    pub fn new(encoder: E, decoder: D) -> Self {
        Self { encoder, decoder }
    }
}

impl<E, D> PayloadCodec for FnCodec<E, D>
where
    E: Fn(
            &str,
            &[ConversationMessage],
            &str,
            &str,
            &HashMap<String, String>,
        ) -> Result<Value, BackendError>
        + Send
        + Sync,
    D: Fn(Value) -> Result<ConversationMessage, BackendError> + Send + Sync,
{
    fn encode(
        &self,
        utterance: &str,
        history: &[ConversationMessage],
        user_id: &str,
        session_id: &str,
        extra_params: &HashMap<String, String>,
    ) -> Result<Value, BackendError> {
        (self.encoder)(utterance, history, user_id, session_id, extra_params)
    }

    fn decode(&self, raw: Value) -> Result<ConversationMessage, BackendError> {
        (self.decoder)(raw)
    }
}

#[async_trait]
pub trait PayloadTransport: Send + Sync {
    async fn send(&self, payload: Value) -> Result<Value, BackendError>;
}

/// POSTs the payload as JSON and parses the JSON reply.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|err| BackendError::Request(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl PayloadTransport for HttpTransport {
    async fn send(&self, payload: Value) -> Result<Value, BackendError> {
        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.bearer_token {
            request = request.header("authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|err| BackendError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(super::openai::status_error(
                status,
                format!("payload endpoint failed ({status}): {body}"),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| BackendError::Response(err.to_string()))
    }
}

/// A tool-less backend driven by a codec and a transport.
pub struct CodecModel {
    codec: Box<dyn PayloadCodec>,
    transport: Box<dyn PayloadTransport>,
}

impl CodecModel {
    pub fn new<C, T>(codec: C, transport: T) -> Self
    where
        C: PayloadCodec + 'static,
        T: PayloadTransport + 'static,
    {
        Self {
            codec: Box::new(codec),
            transport: Box::new(transport),
        }
    }
}

#[async_trait]
impl ChatModel for CodecModel {
    async fn invoke(&self, request: &ModelRequest<'_>) -> Result<ModelCompletion, BackendError> {
        // The last message is the current utterance; the codec gets it separately.
        let history = match request.messages.split_last() {
            Some((_, earlier)) => earlier,
            None => request.messages,
        };
        let turn = request.request;

        let payload = self.codec.encode(
            turn.utterance(),
            history,
            turn.user_id(),
            turn.session_id(),
            turn.extra_params(),
        )?;
        let raw = self.transport.send(payload).await?;
        let message = self.codec.decode(raw)?;

        let text = message.text();
        Ok(ModelCompletion {
            text: (!text.is_empty()).then_some(text),
            thinking: message.reasoning(),
            ..ModelCompletion::default()
        })
    }

    fn supports_tools(&self) -> bool {
        false
    }
}

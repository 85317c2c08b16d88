//! Entry point: agent registry, routing, and the response envelope.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::agent::{
    Agent, AgentDescriptor, MessageAssembler, StreamIncrement, TurnOptions, TurnStream,
};
use crate::callbacks::CallbackContext;
use crate::config::OrchestratorConfig;
use crate::error::{AgentError, OrchestratorError, RouterError, StorageError};
use crate::message::{ConversationMessage, Request};
use crate::router::{Classifier, Router};
use crate::storage::{self, ChatEntry, ChatStorage, InMemoryChatStorage};

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMetadata {
    pub agent_name: String,
    pub user_input: String,
    pub user_id: String,
    pub session_id: String,
    pub extra_params: HashMap<String, String>,
}

pub enum ResponseOutput {
    Message(ConversationMessage),
    /// Lazy turn; the exchange is saved to the session once `EndOfTurn` is produced.
    Stream(TurnStream),
}

impl std::fmt::Debug for ResponseOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct ResponseEnvelope {
    pub metadata: ResponseMetadata,
    pub is_streaming: bool,
    pub output: ResponseOutput,
}

impl ResponseEnvelope {
    pub fn selected_agent_name(&self) -> &str {
        &self.metadata.agent_name
    }
}

/// What to persist once a turn has produced its answer.
struct Transcript {
    storage: Arc<dyn ChatStorage>,
    agent_name: String,
    user_input: String,
    user_id: String,
    session_id: String,
    max_message_pairs_per_agent: usize,
    log_agent_chat: bool,
    log_execution_times: bool,
    started: Instant,
}

impl Transcript {
    async fn record(&self, answer: &ConversationMessage) -> Result<(), StorageError> {
        if self.log_execution_times {
            tracing::info!(
                agent = %self.agent_name,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "turn completed"
            );
        }
        if self.log_agent_chat {
            tracing::info!(
                agent = %self.agent_name,
                user_input = %self.user_input,
                answer = %answer.text(),
                "agent chat"
            );
        }

        let entries = vec![
            ChatEntry::new(
                &self.agent_name,
                ConversationMessage::user_text(&self.user_input),
            ),
            ChatEntry::new(&self.agent_name, answer.clone()),
        ];
        self.storage
            .save_entries(
                &self.user_id,
                &self.session_id,
                entries,
                self.max_message_pairs_per_agent,
            )
            .await
    }
}

/// Forwards the turn unchanged and records the exchange when the turn finishes.
fn record_on_completion(
    mut turn: TurnStream,
    transcript: Transcript,
) -> impl Stream<Item = Result<StreamIncrement, AgentError>> + Send {
    try_stream! {
        let mut assembler = MessageAssembler::default();
        while let Some(item) = turn.next().await {
            let increment = item?;
            assembler.push(&increment);
            if matches!(increment, StreamIncrement::EndOfTurn { .. }) {
                let answer = std::mem::take(&mut assembler).finish()?;
                if let Err(err) = transcript.record(&answer).await {
                    tracing::warn!(
                        agent = %transcript.agent_name,
                        error = %err,
                        "failed to save streamed exchange"
                    );
                }
            }
            yield increment;
        }
    }
}

pub struct Orchestrator {
    agents: RwLock<Vec<Arc<Agent>>>,
    router: Router,
    storage: Arc<dyn ChatStorage>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.agent_names())
            .field("router", &self.router)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Uses an [`InMemoryChatStorage`] until [`Orchestrator::with_storage`] replaces it.
    pub fn new<C>(classifier: C, config: OrchestratorConfig) -> Self
    where
        C: Classifier + 'static,
    {
        Self {
            agents: RwLock::new(Vec::new()),
            router: Router::new(classifier, config.router_config()),
            storage: Arc::new(InMemoryChatStorage::new()),
            config,
        }
    }

    pub fn with_storage<S>(self, storage: S) -> Self
    where
        S: ChatStorage + 'static,
    {
        self.with_shared_storage(Arc::new(storage))
    }

    pub fn with_shared_storage(mut self, storage: Arc<dyn ChatStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn ChatStorage> {
        &self.storage
    }

    /// Registers an agent. A name clash leaves the registry untouched.
    pub fn add_agent(&self, agent: impl Into<Arc<Agent>>) -> Result<(), OrchestratorError> {
        let agent = agent.into();
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        if agents.iter().any(|existing| existing.name() == agent.name()) {
            return Err(OrchestratorError::DuplicateAgentName(agent.name().to_string()));
        }

        tracing::info!(
            agent = %agent.name(),
            streaming = agent.capabilities().supports_streaming,
            tools = agent.tools().len(),
            "agent registered"
        );
        agents.push(agent);
        Ok(())
    }

    /// Snapshot of the registry in registration order.
    pub fn agents(&self) -> Vec<Arc<Agent>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|agent| agent.name().to_string())
            .collect()
    }

    pub async fn route_request(
        &self,
        utterance: &str,
        user_id: &str,
        session_id: &str,
        extra_params: HashMap<String, String>,
        stream: bool,
    ) -> Result<ResponseEnvelope, OrchestratorError> {
        let started = Instant::now();
        let request = Request::new(utterance, user_id, session_id, extra_params);

        let agents = self.agents();
        let descriptors = agents
            .iter()
            .map(|agent| agent.descriptor().clone())
            .collect::<Vec<AgentDescriptor>>();
        let history = self.storage.fetch_session(user_id, session_id).await?;

        let selected = self.router.select(&request, &history, &descriptors).await?;
        let agent = agents
            .iter()
            .find(|agent| agent.name() == selected.name)
            .cloned()
            .ok_or(RouterError::NoAgentSelected)?;

        if self.config.log_execution_times {
            tracing::info!(
                agent = %agent.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "classification completed"
            );
        }

        let agent_history = storage::agent_history(
            &history,
            agent.name(),
            self.config.max_message_pairs_per_agent,
        );
        let options = TurnOptions {
            stream,
            cancellation: CancellationToken::new(),
            callback_context: CallbackContext::default()
                .with_tag(agent.name())
                .with_metadata("user_id", user_id)
                .with_metadata("session_id", session_id),
        };
        tracing::debug!(
            agent = %agent.name(),
            user_id,
            session_id,
            history = agent_history.len(),
            stream,
            "dispatching turn"
        );
        let handle = agent.begin_turn(&agent_history, &request, options);

        let metadata = ResponseMetadata {
            agent_name: agent.name().to_string(),
            user_input: utterance.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            extra_params: request.extra_params().clone(),
        };
        let transcript = Transcript {
            storage: Arc::clone(&self.storage),
            agent_name: agent.name().to_string(),
            user_input: utterance.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            max_message_pairs_per_agent: self.config.max_message_pairs_per_agent,
            log_agent_chat: self.config.log_agent_chat,
            log_execution_times: self.config.log_execution_times,
            started,
        };

        if handle.is_streaming() {
            return Ok(ResponseEnvelope {
                metadata,
                is_streaming: true,
                output: ResponseOutput::Stream(Box::pin(record_on_completion(
                    handle.into_stream(),
                    transcript,
                ))),
            });
        }

        let message = handle.await_result().await?;
        transcript.record(&message).await?;

        Ok(ResponseEnvelope {
            metadata,
            is_streaming: false,
            output: ResponseOutput::Message(message),
        })
    }
}

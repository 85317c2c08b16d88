//! Agent selection.
//!
//! A [`Classifier`] scores the request against the registered descriptors; the
//! [`Router`] wraps it with the routing policy (retries, confidence threshold,
//! default-agent fallback and the sticky strategy).

mod keyword;
mod model;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentDescriptor;
use crate::error::{BackendError, RouterError};
use crate::llm::{RetryPolicy, with_retry};
use crate::message::{ConversationMessage, Request, Role};
use crate::storage::ChatEntry;

pub use keyword::KeywordClassifier;
pub use model::ModelClassifier;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub agent_name: String,
    /// In `0.0..=1.0`.
    pub confidence: f32,
    /// Backend output the decision was parsed from, if any.
    pub raw: Option<Value>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// `Ok(None)` means no agent matched.
    async fn classify(
        &self,
        request: &Request,
        history: &[ConversationMessage],
        agents: &[AgentDescriptor],
    ) -> Result<Option<Classification>, BackendError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Classify every request.
    #[default]
    Reclassify,
    /// Keep the agent that answered last in the session while it stays registered.
    Sticky,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub use_default_agent_if_none_identified: bool,
    pub default_agent: Option<String>,
    pub max_message_pairs_per_agent: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub min_confidence: f32,
    pub strategy: RoutingStrategy,
    pub log_classifier_chat: bool,
    pub log_classifier_raw_output: bool,
    pub log_classifier_output: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            use_default_agent_if_none_identified: true,
            default_agent: None,
            max_message_pairs_per_agent: 100,
            max_retries: 3,
            retry_backoff_ms: 250,
            min_confidence: 0.0,
            strategy: RoutingStrategy::Reclassify,
            log_classifier_chat: false,
            log_classifier_raw_output: false,
            log_classifier_output: false,
        }
    }
}

pub struct Router {
    classifier: Box<dyn Classifier>,
    config: RouterConfig,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn new<C>(classifier: C, config: RouterConfig) -> Self
    where
        C: Classifier + 'static,
    {
        Self {
            classifier: Box::new(classifier),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub async fn select<'a>(
        &self,
        request: &Request,
        history: &[ChatEntry],
        agents: &'a [AgentDescriptor],
    ) -> Result<&'a AgentDescriptor, RouterError> {
        if agents.is_empty() {
            return Err(RouterError::NoAgentsRegistered);
        }

        if self.config.strategy == RoutingStrategy::Sticky {
            if let Some(agent) = sticky_agent(history, agents) {
                tracing::debug!(agent = %agent.name, "sticky routing to previous agent");
                return Ok(agent);
            }
        }

        let recent = recent_messages(history, self.config.max_message_pairs_per_agent);
        if self.config.log_classifier_chat {
            tracing::info!(
                messages = recent.len(),
                chat = ?recent.iter().map(ConversationMessage::text).collect::<Vec<_>>(),
                "classifier chat"
            );
        }

        let policy = RetryPolicy::new(
            self.config.max_retries,
            Duration::from_millis(self.config.retry_backoff_ms),
        );
        let outcome = with_retry(policy, "classify", || {
            self.classifier.classify(request, &recent, agents)
        })
        .await;

        match outcome {
            Ok(Some(classification)) => {
                if self.config.log_classifier_raw_output {
                    tracing::info!(raw = ?classification.raw, "classifier raw output");
                }
                if self.config.log_classifier_output {
                    tracing::info!(
                        agent = %classification.agent_name,
                        confidence = classification.confidence,
                        "classifier output"
                    );
                }

                let selected = agents
                    .iter()
                    .find(|agent| agent.name == classification.agent_name);
                match selected {
                    Some(agent) if classification.confidence >= self.config.min_confidence => {
                        return Ok(agent);
                    }
                    Some(_) => tracing::debug!(
                        agent = %classification.agent_name,
                        confidence = classification.confidence,
                        min_confidence = self.config.min_confidence,
                        "classification below threshold"
                    ),
                    None => tracing::warn!(
                        agent = %classification.agent_name,
                        "classifier named an unregistered agent"
                    ),
                }
            }
            Ok(None) => {
                if self.config.log_classifier_output {
                    tracing::info!("classifier output: no agent identified");
                }
            }
            Err(err) if self.config.use_default_agent_if_none_identified => {
                tracing::warn!(error = %err, "classification failed, using default agent");
            }
            Err(err) => return Err(RouterError::Classification(err)),
        }

        if self.config.use_default_agent_if_none_identified {
            let agent = self.default_agent(agents);
            tracing::debug!(agent = %agent.name, "routing to default agent");
            return Ok(agent);
        }

        Err(RouterError::NoAgentSelected)
    }

    /// The configured default when registered, otherwise the first registered agent.
    /// `agents` must be non-empty.
    fn default_agent<'a>(&self, agents: &'a [AgentDescriptor]) -> &'a AgentDescriptor {
        self.config
            .default_agent
            .as_deref()
            .and_then(|name| agents.iter().find(|agent| agent.name == name))
            .unwrap_or(&agents[0])
    }
}

fn sticky_agent<'a>(
    history: &[ChatEntry],
    agents: &'a [AgentDescriptor],
) -> Option<&'a AgentDescriptor> {
    let last = history
        .iter()
        .rev()
        .find(|entry| entry.message.role() == Role::Assistant)?;
    agents.iter().find(|agent| agent.name == last.agent_name)
}

fn recent_messages(history: &[ChatEntry], max_pairs: usize) -> Vec<ConversationMessage> {
    let skip = history.len().saturating_sub(max_pairs.saturating_mul(2));
    history[skip..]
        .iter()
        .map(|entry| entry.message.clone())
        .collect()
}

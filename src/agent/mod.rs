mod turn;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::callbacks::{AgentCallbacks, NoopCallbacks};
use crate::error::AgentError;
use crate::llm::{ChatModel, InferenceParams};
use crate::message::{ConversationMessage, Request};
use crate::tools::{ToolRegistry, ToolSpec};

pub(crate) use turn::MessageAssembler;
pub use turn::{RecursionState, StreamIncrement, TurnHandle, TurnOptions, TurnState, TurnStream};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model_id: Option<String>,
    pub inference: InferenceParams,
    pub system_prompt: Option<String>,
    /// Tool rounds allowed per turn before the turn fails.
    pub max_tool_depth: u32,
    /// Extra attempts for a transiently failing backend call. Tools are never re-run.
    pub backend_retries: u32,
    pub backend_retry_backoff_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_id: None,
            inference: InferenceParams::default(),
            system_prompt: None,
            max_tool_depth: 5,
            backend_retries: 0,
            backend_retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_streaming: bool,
    pub supports_tools: bool,
}

/// Routing-facing description of a registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub capabilities: Capabilities,
    pub config: AgentConfig,
    pub tool_names: Vec<String>,
}

pub struct AgentBuilder {
    name: String,
    description: String,
    streaming: bool,
    model: Option<Arc<dyn ChatModel>>,
    registry: ToolRegistry,
    tools: Vec<ToolSpec>,
    config: AgentConfig,
    callbacks: Arc<dyn AgentCallbacks>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            streaming: false,
            model: None,
            registry: ToolRegistry::new(),
            tools: Vec::new(),
            config: AgentConfig::default(),
            callbacks: Arc::new(NoopCallbacks),
        }
    }
}

impl AgentBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn model<M>(mut self, model: M) -> Self
    where
        M: ChatModel + 'static,
    {
        self.model = Some(Arc::new(model));
        self
    }

    pub fn shared_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Starts from an existing registry, keeping any custom renderers it carries.
    pub fn tool_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.config.model_id = Some(model_id.into());
        self
    }

    pub fn inference(mut self, inference: InferenceParams) -> Self {
        self.config.inference = inference;
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn max_tool_depth(mut self, max_tool_depth: u32) -> Self {
        self.config.max_tool_depth = max_tool_depth;
        self
    }

    pub fn backend_retries(mut self, backend_retries: u32) -> Self {
        self.config.backend_retries = backend_retries;
        self
    }

    pub fn callbacks<C>(mut self, callbacks: C) -> Self
    where
        C: AgentCallbacks + 'static,
    {
        self.callbacks = Arc::new(callbacks);
        self
    }

    pub fn shared_callbacks(mut self, callbacks: Arc<dyn AgentCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        if self.name.trim().is_empty() {
            return Err(AgentError::Config(
                "agent name must be configured via AgentBuilder::name(...)".to_string(),
            ));
        }

        let Some(model) = self.model else {
            return Err(AgentError::Config(format!(
                "agent {}: model must be configured via AgentBuilder::model(...)",
                self.name
            )));
        };

        let mut registry = self.registry;
        for tool in self.tools {
            registry
                .register(tool)
                .map_err(|err| AgentError::Config(format!("agent {}: {err}", self.name)))?;
        }

        let supports_tools = model.supports_tools();
        if !registry.is_empty() {
            if !supports_tools {
                return Err(AgentError::Config(format!(
                    "agent {}: backend does not support tools but {} tool(s) were configured",
                    self.name,
                    registry.len()
                )));
            }
            if !registry.supports_format(model.tool_format()) {
                return Err(AgentError::Config(format!(
                    "agent {}: no tool renderer for backend format {}",
                    self.name,
                    model.tool_format()
                )));
            }
        }

        let descriptor = AgentDescriptor {
            name: self.name,
            description: self.description,
            capabilities: Capabilities {
                supports_streaming: self.streaming,
                supports_tools,
            },
            config: self.config,
            tool_names: registry.names(),
        };

        Ok(Agent {
            descriptor,
            model,
            tools: Arc::new(registry),
            callbacks: self.callbacks,
        })
    }
}

pub struct Agent {
    descriptor: AgentDescriptor,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    callbacks: Arc<dyn AgentCallbacks>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn capabilities(&self) -> Capabilities {
        self.descriptor.capabilities
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Starts a turn. Nothing runs until the handle is polled.
    pub fn begin_turn(
        &self,
        history: &[ConversationMessage],
        request: &Request,
        options: TurnOptions,
    ) -> TurnHandle {
        let streaming = options.stream && self.descriptor.capabilities.supports_streaming;
        let use_tools = self.descriptor.capabilities.supports_tools && !self.tools.is_empty();

        let mut messages = history.to_vec();
        messages.push(ConversationMessage::user_text(request.utterance()));

        let stream = turn::run_turn(turn::TurnSetup {
            agent_name: self.descriptor.name.clone(),
            model: Arc::clone(&self.model),
            tools: Arc::clone(&self.tools),
            use_tools,
            callbacks: Arc::clone(&self.callbacks),
            config: self.descriptor.config.clone(),
            request: request.clone(),
            messages,
            streaming,
            cancellation: options.cancellation,
            ctx: options.callback_context,
        });

        TurnHandle::new(self.descriptor.name.clone(), streaming, stream)
    }

    pub async fn query(&self, request: &Request) -> Result<ConversationMessage, AgentError> {
        self.begin_turn(&[], request, TurnOptions::default())
            .await_result()
            .await
    }
}

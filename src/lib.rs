//! Route user requests to the best-fit agent and drive its turn.
//!
//! - `Orchestrator` owns the agent registry, classifies each request through a
//!   `Router`, and answers with a `ResponseEnvelope` (materialized or streamed)
//! - `Agent` runs one turn: backend call, tool rounds up to a bounded depth,
//!   increments as they arrive
//! - `ChatStorage` keeps per-session history tagged by agent
//! - Backends: Anthropic, OpenAI-compatible chat completions, and a
//!   payload-codec adapter for custom JSON endpoints

pub mod agent;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod router;
pub mod storage;
pub mod tools;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentDescriptor, Capabilities, StreamIncrement, TurnHandle,
    TurnOptions, TurnStream,
};
pub use callbacks::{AgentCallbacks, CallbackContext, NoopCallbacks, TracingCallbacks};
pub use config::OrchestratorConfig;
pub use error::{
    AgentError, BackendError, OrchestratorError, RouterError, SchemaError, StorageError, ToolError,
};
pub use llm::{
    AnthropicModel, AnthropicModelConfig, ChatModel, CodecModel, InferenceParams, JsonCodec,
    ModelCompletion, ModelToolCall, ModelToolChoice, OpenAiCompatModel, OpenAiCompatModelConfig,
};
pub use message::{ContentBlock, ConversationMessage, Request, Role};
pub use orchestrator::{Orchestrator, ResponseEnvelope, ResponseMetadata, ResponseOutput};
pub use router::{
    Classification, Classifier, KeywordClassifier, ModelClassifier, Router, RouterConfig,
    RoutingStrategy,
};
pub use storage::{ChatEntry, ChatStorage, InMemoryChatStorage};
pub use tools::{ToolContext, ToolRegistry, ToolSpec};

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool schema must be a JSON object")]
    SchemaNotObject,
    #[error("tool schema must declare type=object")]
    RootTypeMustBeObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("duplicate tool registered: {0}")]
    Duplicate(String),
    #[error("tool not found: {0}")]
    Unknown(String),
    #[error("no tool renderer registered for format: {0}")]
    UnknownFormat(String),
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool {tool} failed: {source}")]
    Execution {
        tool: String,
        #[source]
        source: BoxError,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend rejected credentials: {0}")]
    Auth(String),
    #[error("backend rate limited: {0}")]
    RateLimited(String),
    /// The backend refused the request itself (unknown model, malformed body).
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("backend response invalid: {0}")]
    Response(String),
}

impl BackendError {
    /// Transport failures, server errors and rate limits are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::RateLimited(_))
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("tool recursion limit exceeded (max depth {max_depth})")]
    ToolRecursionLimitExceeded { max_depth: u32 },
    #[error("agent turn ended without final response")]
    MissingFinalResponse,
    #[error("conversation message must contain at least one content block")]
    EmptyMessage,
    #[error("agent turn cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no agents registered")]
    NoAgentsRegistered,
    #[error("no agent selected for request")]
    NoAgentSelected,
    #[error("classification failed: {0}")]
    Classification(#[source] BackendError),
}

#[derive(Debug, Error)]
#[error("chat storage error: {0}")]
pub struct StorageError(pub String);

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("agent already registered: {0}")]
    DuplicateAgentName(String),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid orchestrator config: {0}")]
    Config(#[from] toml::de::Error),
}

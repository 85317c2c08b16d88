//! Orchestrator-wide settings.
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! max_retries = 5
//! routing_strategy = "sticky"
//! default_agent = "Tech"
//! log_execution_times = true
//! ```

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::router::{RouterConfig, RoutingStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Log each user/assistant exchange after a turn completes.
    pub log_agent_chat: bool,
    pub log_classifier_chat: bool,
    pub log_classifier_raw_output: bool,
    pub log_classifier_output: bool,
    pub log_execution_times: bool,
    /// Retries of the classification call on transient backend failures.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub use_default_agent_if_none_identified: bool,
    pub max_message_pairs_per_agent: usize,
    pub default_agent: Option<String>,
    pub min_confidence: f32,
    pub routing_strategy: RoutingStrategy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            log_agent_chat: false,
            log_classifier_chat: false,
            log_classifier_raw_output: false,
            log_classifier_output: false,
            log_execution_times: false,
            max_retries: 3,
            retry_backoff_ms: 250,
            use_default_agent_if_none_identified: true,
            max_message_pairs_per_agent: 100,
            default_agent: None,
            min_confidence: 0.0,
            routing_strategy: RoutingStrategy::Reclassify,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, OrchestratorError> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            use_default_agent_if_none_identified: self.use_default_agent_if_none_identified,
            default_agent: self.default_agent.clone(),
            max_message_pairs_per_agent: self.max_message_pairs_per_agent,
            max_retries: self.max_retries,
            retry_backoff_ms: self.retry_backoff_ms,
            min_confidence: self.min_confidence,
            strategy: self.routing_strategy,
            log_classifier_chat: self.log_classifier_chat,
            log_classifier_raw_output: self.log_classifier_raw_output,
            log_classifier_output: self.log_classifier_output,
        }
    }
}

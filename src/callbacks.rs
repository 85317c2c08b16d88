//! Lifecycle observers for agent turns.
//!
//! Every hook is a pure side channel: the turn awaits it, but an error or a panic
//! raised inside a hook is logged and discarded.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use uuid::Uuid;

use crate::error::BoxError;

pub type CallbackResult = Result<(), BoxError>;

/// Correlation data handed to every hook of one turn.
#[derive(Clone, Debug, PartialEq)]
pub struct CallbackContext {
    pub run_id: Uuid,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl Default for CallbackContext {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

impl CallbackContext {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
#[allow(unused_variables)]
pub trait AgentCallbacks: Send + Sync {
    async fn on_turn_start(
        &self,
        agent_name: &str,
        input: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        Ok(())
    }

    async fn on_turn_end(
        &self,
        agent_name: &str,
        output: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        Ok(())
    }

    async fn on_model_call_start(
        &self,
        agent_name: &str,
        input: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        Ok(())
    }

    async fn on_model_call_end(
        &self,
        agent_name: &str,
        output: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        Ok(())
    }

    async fn on_tool_call_start(
        &self,
        tool_name: &str,
        input: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        Ok(())
    }

    async fn on_tool_call_end(
        &self,
        tool_name: &str,
        output: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCallbacks;

impl AgentCallbacks for NoopCallbacks {}

/// Emits every lifecycle point as a `tracing` debug event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingCallbacks;

#[async_trait]
impl AgentCallbacks for TracingCallbacks {
    async fn on_turn_start(
        &self,
        agent_name: &str,
        input: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        tracing::debug!(run_id = %ctx.run_id, agent = agent_name, %input, "turn start");
        Ok(())
    }

    async fn on_turn_end(
        &self,
        agent_name: &str,
        output: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        tracing::debug!(run_id = %ctx.run_id, agent = agent_name, %output, "turn end");
        Ok(())
    }

    async fn on_model_call_start(
        &self,
        agent_name: &str,
        input: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        tracing::debug!(run_id = %ctx.run_id, agent = agent_name, %input, "model call start");
        Ok(())
    }

    async fn on_model_call_end(
        &self,
        agent_name: &str,
        output: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        tracing::debug!(run_id = %ctx.run_id, agent = agent_name, %output, "model call end");
        Ok(())
    }

    async fn on_tool_call_start(
        &self,
        tool_name: &str,
        input: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        tracing::debug!(run_id = %ctx.run_id, tool = tool_name, %input, "tool call start");
        Ok(())
    }

    async fn on_tool_call_end(
        &self,
        tool_name: &str,
        output: &Value,
        ctx: &CallbackContext,
    ) -> CallbackResult {
        tracing::debug!(run_id = %ctx.run_id, tool = tool_name, %output, "tool call end");
        Ok(())
    }
}

/// Awaits a hook, swallowing both its error and any panic.
pub(crate) async fn observe<F>(hook: &'static str, ctx: &CallbackContext, fut: F)
where
    F: Future<Output = CallbackResult>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(hook, run_id = %ctx.run_id, error = %err, "callback failed, ignoring");
        }
        Err(_) => {
            tracing::warn!(hook, run_id = %ctx.run_id, "callback panicked, ignoring");
        }
    }
}

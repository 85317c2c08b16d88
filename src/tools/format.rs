//! Renderers projecting canonical [`ToolSpec`]s into backend-specific tool schemas.
//!
//! A renderer is a pure function of one `ToolSpec`. Targets are looked up by id, so a new
//! backend family only needs [`ToolFormats::register`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::ToolError;
use crate::tools::ToolSpec;

/// Anthropic Messages API: `{name, description, input_schema}`.
pub const ANTHROPIC: &str = "anthropic";
/// Bedrock Converse API: `{toolSpec: {name, description, inputSchema: {json}}}`.
pub const BEDROCK: &str = "bedrock";
/// OpenAI-compatible chat completions: `{type: "function", function: {...}}`.
pub const OPENAI: &str = "openai";

pub type ToolRenderer = Arc<dyn Fn(&ToolSpec) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct ToolFormats {
    renderers: HashMap<String, ToolRenderer>,
}

impl std::fmt::Debug for ToolFormats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids = self.renderers.keys().collect::<Vec<_>>();
        ids.sort();
        f.debug_struct("ToolFormats").field("ids", &ids).finish()
    }
}

impl Default for ToolFormats {
    fn default() -> Self {
        let mut formats = Self {
            renderers: HashMap::new(),
        };
        formats.register(ANTHROPIC, anthropic);
        formats.register(BEDROCK, bedrock);
        formats.register(OPENAI, openai);
        formats
    }
}

impl ToolFormats {
    /// Adds or replaces the renderer for `id`.
    pub fn register<F>(&mut self, id: impl Into<String>, renderer: F)
    where
        F: Fn(&ToolSpec) -> Value + Send + Sync + 'static,
    {
        self.renderers.insert(id.into(), Arc::new(renderer));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.renderers.contains_key(id)
    }

    pub fn render(&self, id: &str, tools: &[ToolSpec]) -> Result<Vec<Value>, ToolError> {
        let renderer = self
            .renderers
            .get(id)
            .ok_or_else(|| ToolError::UnknownFormat(id.to_string()))?;
        Ok(tools.iter().map(|tool| renderer(tool)).collect())
    }
}

pub fn anthropic(tool: &ToolSpec) -> Value {
    json!({
        "name": tool.name(),
        "description": tool.description(),
        "input_schema": tool.json_schema(),
    })
}

pub fn bedrock(tool: &ToolSpec) -> Value {
    json!({
        "toolSpec": {
            "name": tool.name(),
            "description": tool.description(),
            "inputSchema": {
                "json": tool.json_schema(),
            },
        }
    })
}

pub fn openai(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name(),
            "description": tool.description(),
            "parameters": tool.json_schema(),
        }
    })
}

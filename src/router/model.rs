use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agent::AgentDescriptor;
use crate::error::{BackendError, SchemaError};
use crate::llm::{ChatModel, InferenceParams, ModelRequest, ModelToolChoice};
use crate::message::{ConversationMessage, Request, Role};
use crate::tools::{ToolFormats, ToolSpec};

use super::{Classification, Classifier};

const ANALYZE_PROMPT_TOOL: &str = "analyzePrompt";

/// Classifier that asks a chat model to pick the agent through a forced
/// `analyzePrompt` tool call.
pub struct ModelClassifier {
    model: Arc<dyn ChatModel>,
    model_id: Option<String>,
    params: InferenceParams,
    formats: ToolFormats,
    tool: ToolSpec,
}

impl std::fmt::Debug for ModelClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClassifier")
            .field("model_id", &self.model_id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ModelClassifier {
    pub fn new<M>(model: M) -> Result<Self, SchemaError>
    where
        M: ChatModel + 'static,
    {
        Self::from_shared(Arc::new(model))
    }

    pub fn from_shared(model: Arc<dyn ChatModel>) -> Result<Self, SchemaError> {
        Ok(Self {
            model,
            model_id: None,
            params: InferenceParams {
                max_tokens: Some(1024),
                temperature: Some(0.0),
                ..InferenceParams::default()
            },
            formats: ToolFormats::default(),
            tool: analyze_prompt_tool()?,
        })
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_params(mut self, params: InferenceParams) -> Self {
        self.params = params;
        self
    }

    /// For backends whose tool format is not one of the built-ins.
    pub fn with_formats(mut self, formats: ToolFormats) -> Self {
        self.formats = formats;
        self
    }
}

fn analyze_prompt_tool() -> Result<ToolSpec, SchemaError> {
    ToolSpec::new(
        ANALYZE_PROMPT_TOOL,
        "Analyze the user input and select the agent best suited to handle it",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "userinput": {"type": "string", "description": "The original user input"},
            "selected_agent": {
                "type": "string",
                "description": "Name of the selected agent, or \"unknown\" if none fits"
            },
            "confidence": {"type": "number", "description": "Confidence between 0 and 1"}
        },
        "required": ["userinput", "selected_agent", "confidence"]
    }))
}

fn system_prompt(agents: &[AgentDescriptor], history: &[ConversationMessage]) -> String {
    let agent_lines = agents
        .iter()
        .map(|agent| format!("{}: {}", agent.name, agent.description))
        .collect::<Vec<_>>()
        .join("\n");
    let history_lines = history
        .iter()
        .map(|message| {
            let role = match message.role() {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{role}: {}", message.text())
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are AgentMatcher, routing user inquiries to the most appropriate agent.\n\n\
         Available agents:\n<agents>\n{agent_lines}\n</agents>\n\n\
         Recent conversation:\n<history>\n{history_lines}\n</history>\n\n\
         Short follow-ups (\"yes\", \"tell me more\") belong to the agent of the previous \
         exchange. Always answer by calling the {ANALYZE_PROMPT_TOOL} tool with the exact \
         agent name, or \"unknown\" when no agent fits."
    )
}

fn parse_decision(arguments: &Value, agents: &[AgentDescriptor]) -> Option<Classification> {
    let selected = arguments.get("selected_agent")?.as_str()?.trim();
    let agent = agents
        .iter()
        .find(|agent| agent.name.eq_ignore_ascii_case(selected))?;
    let confidence = arguments
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0) as f32;

    Some(Classification {
        agent_name: agent.name.clone(),
        confidence,
        raw: Some(arguments.clone()),
    })
}

#[async_trait]
impl Classifier for ModelClassifier {
    async fn classify(
        &self,
        request: &Request,
        history: &[ConversationMessage],
        agents: &[AgentDescriptor],
    ) -> Result<Option<Classification>, BackendError> {
        let tools = self
            .formats
            .render(self.model.tool_format(), std::slice::from_ref(&self.tool))
            .map_err(|err| BackendError::Request(err.to_string()))?;
        let system = system_prompt(agents, history);
        let messages = vec![ConversationMessage::user_text(request.utterance())];

        let completion = self
            .model
            .invoke(&ModelRequest {
                model_id: self.model_id.as_deref(),
                system_prompt: Some(&system),
                messages: &messages,
                tools: &tools,
                tool_choice: ModelToolChoice::Tool(ANALYZE_PROMPT_TOOL.to_string()),
                params: &self.params,
                request,
            })
            .await?;

        let call = completion
            .tool_calls
            .iter()
            .find(|call| call.name == ANALYZE_PROMPT_TOOL)
            .ok_or_else(|| {
                BackendError::Response(format!(
                    "classifier answered without calling {ANALYZE_PROMPT_TOOL}"
                ))
            })?;

        let decision = parse_decision(&call.arguments, agents);
        if decision.is_none() {
            tracing::debug!(arguments = %call.arguments, "classifier selected no registered agent");
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, Capabilities};
    use crate::llm::testing::ScriptedModel;
    use crate::llm::{ModelCompletion, ModelToolCall};

    fn descriptor(name: &str, description: &str) -> AgentDescriptor {
        AgentDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            capabilities: Capabilities::default(),
            config: AgentConfig::default(),
            tool_names: Vec::new(),
        }
    }

    fn decision(arguments: Value) -> ModelCompletion {
        ModelCompletion {
            tool_calls: vec![ModelToolCall {
                id: "call_1".to_string(),
                name: ANALYZE_PROMPT_TOOL.to_string(),
                arguments,
            }],
            ..ModelCompletion::default()
        }
    }

    fn agents() -> Vec<AgentDescriptor> {
        vec![
            descriptor("Tech", "Software, hardware and cloud computing"),
            descriptor("Health", "Health and well being"),
        ]
    }

    #[tokio::test]
    async fn forced_tool_call_selects_agent() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(decision(json!({
            "userinput": "What is a good treatment for a migraine?",
            "selected_agent": "health",
            "confidence": 0.92
        })))]));
        let classifier = ModelClassifier::from_shared(Arc::clone(&model) as Arc<dyn ChatModel>)
            .expect("classifier builds");
        let request = Request::new(
            "What is a good treatment for a migraine?",
            "u",
            "s",
            Default::default(),
        );

        let picked = classifier
            .classify(&request, &[], &agents())
            .await
            .expect("classify")
            .expect("match");

        assert_eq!(picked.agent_name, "Health");
        assert!((picked.confidence - 0.92).abs() < 1e-6);
        let tools = model.seen_tools();
        assert_eq!(tools[0].len(), 1);
        assert_eq!(tools[0][0]["name"], ANALYZE_PROMPT_TOOL);
    }

    #[tokio::test]
    async fn unknown_agent_is_no_match_and_plain_text_is_an_error() {
        let classifier = ModelClassifier::new(ScriptedModel::new(vec![
            Ok(decision(json!({
                "userinput": "sing",
                "selected_agent": "unknown",
                "confidence": 0.1
            }))),
            Ok(ModelCompletion::text("I think Tech")),
        ]))
        .expect("classifier builds");
        let request = Request::new("sing", "u", "s", Default::default());

        let none = classifier
            .classify(&request, &[], &agents())
            .await
            .expect("classify");
        assert!(none.is_none());

        let err = classifier
            .classify(&request, &[], &agents())
            .await
            .expect_err("no tool call");
        assert!(matches!(err, BackendError::Response(_)));
    }

    #[test]
    fn decision_tool_requires_agent_and_confidence() {
        let tool = analyze_prompt_tool().expect("decision schema validates");

        assert_eq!(tool.name(), ANALYZE_PROMPT_TOOL);
        assert_eq!(
            tool.json_schema()["required"],
            json!(["userinput", "selected_agent", "confidence"])
        );
    }

    #[test]
    fn prompt_lists_agents_and_history() {
        let history = vec![
            ConversationMessage::user_text("my laptop is slow"),
            ConversationMessage::assistant_text("try closing tabs"),
        ];
        let prompt = system_prompt(&agents(), &history);

        assert!(prompt.contains("Tech: Software, hardware and cloud computing"));
        assert!(prompt.contains("user: my laptop is slow"));
        assert!(prompt.contains("assistant: try closing tabs"));
    }
}

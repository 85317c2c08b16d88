use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// One inbound utterance with the identity it was sent under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    utterance: String,
    user_id: String,
    session_id: String,
    extra_params: HashMap<String, String>,
}

impl Request {
    pub fn new(
        utterance: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        extra_params: HashMap<String, String>,
    ) -> Self {
        Self {
            utterance: utterance.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            extra_params,
        }
    }

    pub fn utterance(&self) -> &str {
        &self.utterance
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn extra_params(&self) -> &HashMap<String, String> {
        &self.extra_params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        /// Backend proof of the reasoning; required to replay it within a tool round.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Reasoning the backend returned encrypted. Only the backend can read it.
    RedactedReasoning {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: String,
        name: String,
        payload: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct ConversationMessage {
    role: Role,
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct RawMessage {
    role: Role,
    content: Vec<ContentBlock>,
}

impl TryFrom<RawMessage> for ConversationMessage {
    type Error = AgentError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        Self::new(raw.role, raw.content)
    }
}

impl ConversationMessage {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Result<Self, AgentError> {
        if content.is_empty() {
            return Err(AgentError::EmptyMessage);
        }
        Ok(Self { role, content })
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &[ContentBlock] {
        &self.content
    }

    /// Concatenated `Text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn reasoning(&self) -> Option<String> {
        let reasoning = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Reasoning { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<String>();
        (!reasoning.is_empty()).then_some(reasoning)
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_content_is_rejected() {
        let err = ConversationMessage::new(Role::User, Vec::new()).expect_err("must fail");
        assert!(matches!(err, AgentError::EmptyMessage));
    }

    #[test]
    fn deserializing_enforces_non_empty_content() {
        let parsed = serde_json::from_value::<ConversationMessage>(json!({
            "role": "assistant",
            "content": []
        }));
        assert!(parsed.is_err());

        let parsed = serde_json::from_value::<ConversationMessage>(json!({
            "role": "assistant",
            "content": [{"type": "text", "text": "hi"}]
        }))
        .expect("valid message");
        assert_eq!(parsed.text(), "hi");
    }

    #[test]
    fn text_and_reasoning_are_collected_separately() {
        let message = ConversationMessage::new(
            Role::Assistant,
            vec![
                ContentBlock::Reasoning {
                    text: "think".to_string(),
                    signature: None,
                },
                ContentBlock::Text {
                    text: "Hello ".to_string(),
                },
                ContentBlock::Text {
                    text: "world".to_string(),
                },
            ],
        )
        .expect("non-empty");

        assert_eq!(message.text(), "Hello world");
        assert_eq!(message.reasoning().as_deref(), Some("think"));
        assert_eq!(message.role(), Role::Assistant);
    }

    #[test]
    fn reasoning_signature_is_optional_on_the_wire() {
        let unsigned = serde_json::to_value(ContentBlock::Reasoning {
            text: "think".to_string(),
            signature: None,
        })
        .expect("serializes");
        assert_eq!(unsigned, json!({"type": "reasoning", "text": "think"}));

        let signed = serde_json::from_value::<ContentBlock>(json!({
            "type": "reasoning",
            "text": "think",
            "signature": "sig-1"
        }))
        .expect("deserializes");
        assert_eq!(
            signed,
            ContentBlock::Reasoning {
                text: "think".to_string(),
                signature: Some("sig-1".to_string()),
            }
        );
    }
}

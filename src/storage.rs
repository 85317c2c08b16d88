//! Conversation history keyed by `(user_id, session_id)`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::message::ConversationMessage;

/// A stored message, attributed to the agent whose turn produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub agent_name: String,
    pub message: ConversationMessage,
}

impl ChatEntry {
    pub fn new(agent_name: impl Into<String>, message: ConversationMessage) -> Self {
        Self {
            agent_name: agent_name.into(),
            message,
        }
    }
}

#[async_trait]
pub trait ChatStorage: Send + Sync {
    /// Every entry of the session, oldest first.
    async fn fetch_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<ChatEntry>, StorageError>;

    /// Appends `entries`, keeping at most `max_message_pairs_per_agent` pairs per agent.
    async fn save_entries(
        &self,
        user_id: &str,
        session_id: &str,
        entries: Vec<ChatEntry>,
        max_message_pairs_per_agent: usize,
    ) -> Result<(), StorageError>;
}

/// The last `max_pairs` exchanges `agent_name` took part in, oldest first.
pub fn agent_history(
    entries: &[ChatEntry],
    agent_name: &str,
    max_pairs: usize,
) -> Vec<ConversationMessage> {
    let mut messages = entries
        .iter()
        .rev()
        .filter(|entry| entry.agent_name == agent_name)
        .take(max_pairs.saturating_mul(2))
        .map(|entry| entry.message.clone())
        .collect::<Vec<_>>();
    messages.reverse();
    messages
}

fn trim_per_agent(entries: &mut Vec<ChatEntry>, max_pairs: usize) {
    let limit = max_pairs.saturating_mul(2);
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut keep = vec![false; entries.len()];

    for (index, entry) in entries.iter().enumerate().rev() {
        let count = seen.entry(entry.agent_name.as_str()).or_default();
        if *count < limit {
            *count += 1;
            keep[index] = true;
        }
    }

    let mut flags = keep.into_iter();
    entries.retain(|_| flags.next().unwrap_or(false));
}

type SessionKey = (String, String);

/// Process-local store. Cloning shares the underlying sessions.
#[derive(Clone, Debug, Default)]
pub struct InMemoryChatStorage {
    sessions: Arc<RwLock<HashMap<SessionKey, Vec<ChatEntry>>>>,
}

impl InMemoryChatStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStorage for InMemoryChatStorage {
    async fn fetch_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<ChatEntry>, StorageError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&(user_id.to_string(), session_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_entries(
        &self,
        user_id: &str,
        session_id: &str,
        entries: Vec<ChatEntry>,
        max_message_pairs_per_agent: usize,
    ) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry((user_id.to_string(), session_id.to_string()))
            .or_default();
        session.extend(entries);
        trim_per_agent(session, max_message_pairs_per_agent);
        tracing::trace!(user_id, session_id, entries = session.len(), "session saved");
        Ok(())
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::agent::AgentDescriptor;
use crate::error::BackendError;
use crate::message::{ConversationMessage, Request};

use super::{Classification, Classifier};

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("word pattern is valid"));

const STOPWORDS: &[&str] = &[
    "a", "about", "agent", "all", "also", "an", "and", "any", "are", "as", "at", "be", "by",
    "can", "could", "do", "does", "for", "from", "give", "good", "how", "i", "in", "including",
    "is", "it", "me", "my", "of", "on", "or", "please", "related", "should", "so", "specialized",
    "specializes", "tell", "that", "the", "this", "to", "what", "when", "where", "which", "who",
    "why", "with", "would", "you", "your",
];

/// Rule-based classifier: scores each agent by how many of the utterance's content
/// words appear in its name, description and extra keywords.
///
/// Confidence is the matched share of the utterance's content words. Ties go to the
/// agent registered first.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: HashMap<String, Vec<String>>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self {
            keywords: HashMap::new(),
        }
    }

    /// Extra vocabulary for `agent_name` beyond its description.
    pub fn with_keywords<I, S>(mut self, agent_name: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords
            .entry(agent_name.into())
            .or_default()
            .extend(keywords.into_iter().map(Into::into));
        self
    }

    fn terms(&self, text: &str) -> HashSet<String> {
        let lower = text.to_lowercase();
        WORD.find_iter(&lower)
            .map(|word| word.as_str())
            .filter(|word| !STOPWORDS.contains(word))
            .map(stem)
            .collect()
    }

    fn vocabulary(&self, agent: &AgentDescriptor) -> HashSet<String> {
        let mut vocabulary = self.terms(&agent.name);
        vocabulary.extend(self.terms(&agent.description));
        if let Some(extra) = self.keywords.get(&agent.name) {
            for keyword in extra {
                vocabulary.extend(self.terms(keyword));
            }
        }
        vocabulary
    }
}

fn stem(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        request: &Request,
        _history: &[ConversationMessage],
        agents: &[AgentDescriptor],
    ) -> Result<Option<Classification>, BackendError> {
        let query = self.terms(request.utterance());
        if query.is_empty() {
            return Ok(None);
        }

        let mut best: Option<(&AgentDescriptor, usize)> = None;
        for agent in agents {
            let vocabulary = self.vocabulary(agent);
            let score = query.iter().filter(|term| vocabulary.contains(*term)).count();
            tracing::trace!(agent = %agent.name, score, "keyword score");
            if score > 0 && best.is_none_or(|(_, top)| score > top) {
                best = Some((agent, score));
            }
        }

        Ok(best.map(|(agent, score)| Classification {
            agent_name: agent.name.clone(),
            confidence: score as f32 / query.len() as f32,
            raw: Some(json!({"score": score, "terms": query.len()})),
        }))
    }
}

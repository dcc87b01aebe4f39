use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Cached summary of one conversation, as listed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

/// Fields replaced on a cached summary when its stream completes.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPatch {
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

impl ConversationPatch {
    pub fn from_terminal_text(text: &str) -> Self {
        Self {
            description: text.to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// Collaborator interface over the cached conversation list. The core only
/// ever replaces an existing entry by id; it never creates or deletes one.
pub trait ConversationCache: Send + Sync {
    fn replace_by_id(&self, id: &str, patch: ConversationPatch);
}

/// In-memory cache of conversation summaries. Unknown ids are ignored.
#[derive(Default)]
pub struct InMemoryConversationCache {
    entries: Mutex<Vec<ConversationSummary>>,
}

impl InMemoryConversationCache {
    pub fn new(entries: Vec<ConversationSummary>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn snapshot(&self) -> Vec<ConversationSummary> {
        self.entries.lock().unwrap().clone()
    }
}

impl ConversationCache for InMemoryConversationCache {
    fn replace_by_id(&self, id: &str, patch: ConversationPatch) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) {
            entry.description = patch.description;
            entry.updated_at = patch.updated_at;
        }
    }
}

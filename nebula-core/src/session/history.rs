//! Conversation history data structures

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role
    pub role: Role,
    /// Message content
    pub content: String,
    /// Message timestamp
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a new chat message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Ordered, append-only message log of one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single message
    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Append several messages, keeping their order
    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The last `max_messages` entries, oldest first
    pub fn tail(&self, max_messages: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(max_messages);
        &self.messages[start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Clear all messages
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Shared handle to a session's history.
///
/// Every clone points at the same log, so an append through one handle is
/// visible to the session store and to every other holder.
pub type SharedHistory = Arc<RwLock<ChatHistory>>;

/// Create an empty shared history
pub fn new_shared_history() -> SharedHistory {
    Arc::new(RwLock::new(ChatHistory::new()))
}

/// Looks up the history of a session by id.
///
/// The conversation chain only depends on this capability, so any backend
/// that can hand out a [`SharedHistory`] can feed it.
pub trait HistoryResolver: Send + Sync {
    fn resolve(&self, session_id: &str) -> Option<SharedHistory>;
}

impl<T: HistoryResolver + ?Sized> HistoryResolver for &T {
    fn resolve(&self, session_id: &str) -> Option<SharedHistory> {
        (**self).resolve(session_id)
    }
}

/// Adapter turning a plain lookup function into a resolver
pub struct FnResolver<F>(pub F);

impl<F> HistoryResolver for FnResolver<F>
where
    F: Fn(&str) -> Option<SharedHistory> + Send + Sync,
{
    fn resolve(&self, session_id: &str) -> Option<SharedHistory> {
        (self.0)(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_history_keeps_insertion_order() {
        let mut history = ChatHistory::new();
        history.add_message(ChatMessage::human("Hello"));
        history.add_messages([
            ChatMessage::assistant("Hi there!"),
            ChatMessage::human("Hello"),
        ]);

        let roles: Vec<Role> = history.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Human, Role::Assistant, Role::Human]);
        // duplicates are kept
        assert_eq!(history.messages()[0].content, history.messages()[2].content);
    }

    #[test]
    fn test_tail() {
        let mut history = ChatHistory::new();
        for i in 0..60 {
            history.add_message(ChatMessage::human(format!("Message {}", i)));
        }

        let tail = history.tail(50);
        assert_eq!(tail.len(), 50);
        assert_eq!(tail[0].content, "Message 10");
        assert_eq!(history.tail(100).len(), 60);
    }

    #[test]
    fn test_shared_history_is_not_a_copy() {
        let handle = new_shared_history();
        let other = handle.clone();
        handle.write().add_message(ChatMessage::human("ping"));
        assert_eq!(other.read().len(), 1);
    }

    #[test]
    fn test_fn_resolver() {
        let mut backing = HashMap::new();
        backing.insert("a".to_string(), new_shared_history());
        let resolver = FnResolver(move |id: &str| backing.get(id).cloned());

        assert!(resolver.resolve("a").is_some());
        assert!(resolver.resolve("b").is_none());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::human("x")).unwrap();
        assert!(json.contains("\"role\":\"human\""));
    }
}

//! In-memory session store

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::history::{new_shared_history, HistoryResolver, SharedHistory};

/// A conversation session
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session id
    pub id: String,
    /// Display name
    pub name: String,
    /// Message history, shared with whoever resolves it
    pub history: SharedHistory,
    /// Session creation time
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            history: new_shared_history(),
            created_at: Utc::now(),
        }
    }

    /// Number of messages currently in the history
    pub fn message_count(&self) -> usize {
        self.history.read().len()
    }
}

/// Listing entry for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub is_current: bool,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Owns every session of the run and tracks which one is current.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    /// Creation order, used for listings
    order: Vec<String>,
    current: Option<String>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session and make it current.
    ///
    /// Without a name (or with a blank one) the session is called
    /// `Chat N`, where N counts the sessions created so far.
    pub fn create_session(&mut self, name: Option<&str>) -> String {
        let id = Uuid::new_v4().to_string();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("Chat {}", self.sessions.len() + 1));

        debug!("Creating session {} ({})", id, name);
        self.sessions
            .insert(id.clone(), Session::new(id.clone(), name));
        self.order.push(id.clone());
        self.current = Some(id.clone());
        id
    }

    /// The current session, if any has been created
    pub fn current_session(&self) -> Option<&Session> {
        self.current.as_deref().and_then(|id| self.sessions.get(id))
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Make `id` the current session. Unknown ids leave the store untouched.
    pub fn switch_session(&mut self, id: &str) -> bool {
        if self.sessions.contains_key(id) {
            debug!("Switching to session {}", id);
            self.current = Some(id.to_string());
            true
        } else {
            false
        }
    }

    /// Every session keyed by id. Iteration order is unspecified; use
    /// [`SessionStore::list`] for display.
    pub fn sessions(&self) -> &HashMap<String, Session> {
        &self.sessions
    }

    /// Sessions in creation order
    pub fn list(&self) -> Vec<SessionSummary> {
        self.order
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .map(|session| SessionSummary {
                id: session.id.clone(),
                name: session.name.clone(),
                is_current: self.current.as_deref() == Some(session.id.as_str()),
                message_count: session.message_count(),
                created_at: session.created_at,
            })
            .collect()
    }

    /// Get a session if it exists
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Shared handle to a session's history
    pub fn history(&self, id: &str) -> Option<SharedHistory> {
        self.sessions.get(id).map(|session| session.history.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl HistoryResolver for SessionStore {
    fn resolve(&self, session_id: &str) -> Option<SharedHistory> {
        self.history(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatMessage;
    use std::collections::HashSet;

    #[test]
    fn test_empty_store_has_no_current_session() {
        let store = SessionStore::new();
        assert!(store.current_session().is_none());
        assert!(store.current_id().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_created_sessions_are_unique_and_current() {
        let mut store = SessionStore::new();
        let mut seen = HashSet::new();

        for _ in 0..20 {
            let id = store.create_session(None);
            assert!(seen.insert(id.clone()), "duplicate id {}", id);
            assert_eq!(store.current_session().unwrap().id, id);
        }
        assert_eq!(store.len(), 20);
    }

    #[test]
    fn test_default_names_follow_creation_count() {
        let mut store = SessionStore::new();
        store.create_session(None);
        store.create_session(None);
        store.create_session(None);

        let names: Vec<String> = store.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Chat 1", "Chat 2", "Chat 3"]);
    }

    #[test]
    fn test_explicit_and_blank_names() {
        let mut store = SessionStore::new();
        let named = store.create_session(Some("Research"));
        let blank = store.create_session(Some("   "));

        assert_eq!(store.get(&named).unwrap().name, "Research");
        assert_eq!(store.get(&blank).unwrap().name, "Chat 2");
    }

    #[test]
    fn test_switch_session() {
        let mut store = SessionStore::new();
        let first = store.create_session(None);
        let second = store.create_session(None);
        assert_eq!(store.current_id(), Some(second.as_str()));

        assert!(store.switch_session(&first));
        assert_eq!(store.current_session().unwrap().id, first);
    }

    #[test]
    fn test_switch_to_unknown_session_keeps_current() {
        let mut store = SessionStore::new();
        let id = store.create_session(None);
        store
            .history(&id)
            .unwrap()
            .write()
            .add_message(ChatMessage::human("keep me"));

        assert!(!store.switch_session("does-not-exist"));
        assert_eq!(store.current_session().unwrap().id, id);
        assert_eq!(store.get(&id).unwrap().message_count(), 1);
    }

    #[test]
    fn test_switch_on_empty_store_fails() {
        let mut store = SessionStore::new();
        assert!(!store.switch_session("anything"));
        assert!(store.current_session().is_none());
    }

    #[test]
    fn test_fresh_history_is_empty() {
        let mut store = SessionStore::new();
        let id = store.create_session(None);
        assert!(store.history(&id).unwrap().read().is_empty());
        assert!(store.history("missing").is_none());
    }

    #[test]
    fn test_history_handle_is_shared_with_store() {
        let mut store = SessionStore::new();
        let id = store.create_session(None);

        let handle = store.resolve(&id).unwrap();
        handle.write().add_message(ChatMessage::human("hello"));
        handle.write().add_message(ChatMessage::assistant("hi"));

        let session = store.current_session().unwrap();
        let history = session.history.read();
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].content, "hello");
    }

    #[test]
    fn test_list_marks_current_and_keeps_creation_order() {
        let mut store = SessionStore::new();
        let a = store.create_session(Some("a"));
        let b = store.create_session(Some("b"));
        let c = store.create_session(Some("c"));
        store.switch_session(&b);

        let listing = store.list();
        let ids: Vec<&str> = listing.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), b.as_str(), c.as_str()]);
        let current: Vec<bool> = listing.iter().map(|s| s.is_current).collect();
        assert_eq!(current, vec![false, true, false]);
        assert_eq!(store.sessions().len(), 3);
    }
}

//! Chat sessions and their conversation history
//!
//! Sessions live in memory for the lifetime of the process. Each one owns
//! an ordered message log that is handed out as a shared handle, so the
//! conversation chain can append to it without going through the store.

pub mod history;
pub mod store;

pub use history::{
    new_shared_history, ChatHistory, ChatMessage, FnResolver, HistoryResolver, Role,
    SharedHistory,
};
pub use store::{Session, SessionStore, SessionSummary};

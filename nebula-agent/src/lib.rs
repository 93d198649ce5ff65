//! Conversation logic for nebula
//!
//! This crate turns a user turn into a model call: it fills the prompt
//! template with the session's prior messages, invokes the provider, and
//! appends the exchange to history when the call succeeds.

pub mod chain;
pub mod context;
pub mod error;

pub use chain::{ChainWithHistory, ChatEvent, ConversationChain};
pub use context::{PromptTemplate, PromptValue, PromptValues, DEFAULT_HISTORY_KEY, DEFAULT_INPUT_KEY};
pub use error::{ChainError, ChainResult};

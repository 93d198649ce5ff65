//! Prompt template for assembling chat requests

use nebula_core::session::ChatMessage;
use nebula_providers::Message;
use std::collections::HashMap;

use crate::error::{ChainError, ChainResult};

/// Key the user's new text is stored under by default
pub const DEFAULT_INPUT_KEY: &str = "user_input";
/// Key the prior messages are stored under by default
pub const DEFAULT_HISTORY_KEY: &str = "history";

/// A value slotted into the template
#[derive(Debug, Clone)]
pub enum PromptValue {
    Text(String),
    Messages(Vec<ChatMessage>),
}

/// Named values used to fill a [`PromptTemplate`]
#[derive(Debug, Clone, Default)]
pub struct PromptValues {
    values: HashMap<String, PromptValue>,
}

impl PromptValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.values
            .insert(key.into(), PromptValue::Text(text.into()));
        self
    }

    pub fn with_messages(mut self, key: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        self.values
            .insert(key.into(), PromptValue::Messages(messages));
        self
    }

    pub fn get(&self, key: &str) -> Option<&PromptValue> {
        self.values.get(key)
    }
}

/// Three-slot chat template: system instruction, prior messages, new input.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    system_prompt: String,
    input_key: String,
    history_key: String,
}

impl PromptTemplate {
    /// Template with the default slot names
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            input_key: DEFAULT_INPUT_KEY.to_string(),
            history_key: DEFAULT_HISTORY_KEY.to_string(),
        }
    }

    /// Rename the input and history slots
    pub fn with_keys(mut self, input_key: impl Into<String>, history_key: impl Into<String>) -> Self {
        self.input_key = input_key.into();
        self.history_key = history_key.into();
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn input_key(&self) -> &str {
        &self.input_key
    }

    pub fn history_key(&self) -> &str {
        &self.history_key
    }

    /// Build the message list for an LLM call.
    ///
    /// Order is fixed: system instruction, every prior message oldest
    /// first, then the new human message.
    pub fn format_messages(&self, values: &PromptValues) -> ChainResult<Vec<Message>> {
        let history = match values.get(&self.history_key) {
            Some(PromptValue::Messages(messages)) => messages,
            _ => return Err(ChainError::MissingVariable(self.history_key.clone())),
        };
        let input = match values.get(&self.input_key) {
            Some(PromptValue::Text(text)) => text,
            _ => return Err(ChainError::MissingVariable(self.input_key.clone())),
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(history.iter().map(Message::from));
        messages.push(Message::user(input));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_messages_without_history() {
        let template = PromptTemplate::new("You are Nebula.");
        let values = PromptValues::new()
            .with_messages(DEFAULT_HISTORY_KEY, vec![])
            .with_text(DEFAULT_INPUT_KEY, "Hello");

        let messages = template.format_messages(&values).unwrap();
        assert_eq!(messages.len(), 2); // system + user
        assert_eq!(messages[0], Message::system("You are Nebula."));
        assert_eq!(messages[1], Message::user("Hello"));
    }

    #[test]
    fn test_format_messages_places_history_between() {
        let template = PromptTemplate::new("sys");
        let history = vec![ChatMessage::human("H1"), ChatMessage::assistant("A1")];
        let values = PromptValues::new()
            .with_messages("history", history)
            .with_text("user_input", "H2");

        let messages = template.format_messages(&values).unwrap();
        let pairs: Vec<(&str, &str)> = messages
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("system", "sys"),
                ("user", "H1"),
                ("assistant", "A1"),
                ("user", "H2"),
            ]
        );
    }

    #[test]
    fn test_custom_keys() {
        let template = PromptTemplate::new("sys").with_keys("question", "past");
        assert_eq!(template.input_key(), "question");

        let values = PromptValues::new()
            .with_messages("past", vec![])
            .with_text("question", "why?");
        assert_eq!(template.format_messages(&values).unwrap().len(), 2);

        // default keys no longer match
        let values = PromptValues::new()
            .with_messages(DEFAULT_HISTORY_KEY, vec![])
            .with_text(DEFAULT_INPUT_KEY, "why?");
        let err = template.format_messages(&values).unwrap_err();
        assert!(matches!(err, ChainError::MissingVariable(k) if k == "past"));
    }

    #[test]
    fn test_wrong_value_kind_is_missing() {
        let template = PromptTemplate::new("sys");
        let values = PromptValues::new()
            .with_messages("history", vec![])
            .with_messages("user_input", vec![]);
        let err = template.format_messages(&values).unwrap_err();
        assert!(matches!(err, ChainError::MissingVariable(k) if k == "user_input"));
    }
}

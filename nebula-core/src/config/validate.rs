//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
///
/// The API key is deliberately not checked here: a malformed key should
/// lead to a re-prompt, not a refusal to start.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.chat.model.trim().is_empty() {
        errors.push("chat.model must not be empty".to_string());
    }
    if !(0.0..=2.0).contains(&config.chat.temperature) {
        errors.push("chat.temperature must be in [0.0, 2.0]".to_string());
    }
    if config.chat.max_tokens == Some(0) {
        errors.push("chat.max_tokens must be > 0 when set".to_string());
    }

    if config.provider.api_base.trim().is_empty() {
        errors.push("provider.api_base must not be empty".to_string());
    }
    if config.provider.timeout_secs == 0 {
        errors.push("provider.timeout_secs must be > 0".to_string());
    }

    let format = config.logging.format.to_ascii_lowercase();
    if format != "text" && format != "json" {
        errors.push(format!(
            "logging.format must be 'text' or 'json', got '{}'",
            config.logging.format
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

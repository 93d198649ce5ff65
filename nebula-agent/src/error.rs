//! Errors raised by the conversation chain

use nebula_providers::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    /// The resolver has no history for this session
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A prompt variable was not supplied or had the wrong shape
    #[error("Missing prompt variable '{0}'")]
    MissingVariable(String),

    /// The model answered without any text
    #[error("Model returned an empty reply")]
    EmptyReply,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ChainError {
    /// True when the provider rejected the credential
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ChainError::Provider(e) if e.is_auth_error())
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

//! API key handling for the remote model provider.
//!
//! The key is entered by the user (or picked up from the environment) and
//! only lives for the current run. Nothing here talks to the provider: the
//! format check is purely local, and a key that the provider later rejects
//! is dropped through [`CredentialHolder::clear`].

use std::fmt;

use crate::utils::mask_secret;

/// Prefix every OpenAI secret key starts with.
pub const API_KEY_PREFIX: &str = "sk-";

/// Keys must be strictly longer than this many characters.
pub const API_KEY_MIN_EXCLUSIVE_LEN: usize = 40;

/// Check whether `raw` looks like a provider API key.
///
/// ```
/// use nebula_core::credential::validate_api_key;
///
/// assert!(validate_api_key(&format!("sk-{}", "x".repeat(38))));
/// assert!(!validate_api_key("abc123"));
/// ```
pub fn validate_api_key(raw: &str) -> bool {
    raw.starts_with(API_KEY_PREFIX) && raw.chars().count() > API_KEY_MIN_EXCLUSIVE_LEN
}

/// A format-checked API key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Validate and wrap a raw key.
    pub fn parse(raw: impl Into<String>) -> crate::Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if validate_api_key(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(crate::Error::InvalidCredential(format!(
                "expected a key starting with '{}' longer than {} characters",
                API_KEY_PREFIX, API_KEY_MIN_EXCLUSIVE_LEN
            )))
        }
    }

    /// The raw secret, for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Redacted form suitable for display.
    pub fn masked(&self) -> String {
        mask_secret(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Holds the credential for the current run.
#[derive(Debug, Default)]
pub struct CredentialHolder {
    current: Option<Credential>,
}

impl CredentialHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store `raw`.
    ///
    /// An invalid key also discards whatever was stored before, so the
    /// holder never keeps serving a key the user tried to replace.
    pub fn set(&mut self, raw: impl Into<String>) -> crate::Result<()> {
        match Credential::parse(raw) {
            Ok(credential) => {
                self.current = Some(credential);
                Ok(())
            }
            Err(e) => {
                self.current = None;
                Err(e)
            }
        }
    }

    pub fn get(&self) -> Option<&Credential> {
        self.current.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.current.is_some()
    }

    /// Forget the stored key, e.g. after the provider rejected it.
    pub fn clear(&mut self) {
        self.current = None;
    }
}

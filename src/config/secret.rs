//! Credentials held in configuration.

use super::env::resolve_env_vars;
use crate::error::ConfigError;
use serde::Deserialize;

/// SMTP password or API token.
///
/// Formats as `[REDACTED]` under both `{}` and `{:?}`, so configuration
/// structs can derive `Debug` and be logged whole.
///
/// ```
/// use hrnotify::config::SecretString;
///
/// let token = SecretString::new("gmail-token".to_string());
/// assert_eq!(token.to_string(), "[REDACTED]");
/// assert_eq!(token.expose(), "gmail-token");
/// ```
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub struct SecretString(String);

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl SecretString {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Raw value, for handing to the transport only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Expand `${VAR}` references; the expanded value stays wrapped.
    pub fn resolve_env(&self) -> Result<SecretString, ConfigError> {
        resolve_env_vars(&self.0).map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

const REDACTED: &str = "[REDACTED]";

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

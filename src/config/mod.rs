//! Configuration loading and validation for hrnotify.
//!
//! This module handles loading the YAML configuration file,
//! validation, and managing environment variables for secrets.

mod env;
mod runtime;
mod secret;
mod transport;
mod types;
mod validation;

// Re-exports publics
pub use env::{resolve_env_vars, resolve_layout_template};
pub use runtime::RuntimeConfig;
pub use secret::SecretString;
pub use transport::{HttpApiConfig, SmtpConfig, TlsMode, TransportConfig};
pub use types::{
    Config, DEFAULT_CONFIG_PATH, DispatchConfig, MAX_ATTEMPTS_LIMIT, MAX_CONCURRENT_RULES_LIMIT,
    MetricsConfig, StoreConfig,
};
pub use validation::validate_layout_template;

#[cfg(test)]
mod tests;

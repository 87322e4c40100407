//! Centralized error types for hrnotify using thiserror.
//!
//! Each concern gets its own enum. Only [`DispatchError`] ever escapes a
//! dispatch run; everything else is folded into per-rule results.

use std::time::Duration;

use thiserror::Error;

use crate::model::ErrorKind;

/// Errors related to configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config file: {0}")]
    LoadError(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
    #[error("invalid template '{name}': {message}")]
    InvalidTemplate { name: String, message: String },
    #[error("invalid transport '{kind}': {message}")]
    InvalidTransport { kind: String, message: String },
}

/// Errors raised by a record store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("collection '{collection}' unavailable: {message}")]
    Unavailable { collection: String, message: String },
    #[error("malformed document in '{collection}': {message}")]
    Malformed { collection: String, message: String },
}

/// Errors raised while sending a single email.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    /// Transient failure, eligible for retry.
    #[error("failed to send email: {0}")]
    SendFailed(String),
    /// Permanent rejection by the provider, never retried.
    #[error("email rejected: {0}")]
    Rejected(String),
    #[error("invalid address '{address}': {message}")]
    InvalidAddress { address: String, message: String },
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl NotifyError {
    /// Whether a retry could change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::SendFailed(_) | NotifyError::Timeout(_))
    }
}

/// A stored rule document that cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RuleDecodeError(pub String);

/// A rule-level failure, tagged with the result kind it is reported as.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {detail}")]
pub struct ResolveError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ResolveError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<StoreError> for ResolveError {
    fn from(error: StoreError) -> Self {
        Self::new(ErrorKind::StoreUnavailable, error.to_string())
    }
}

/// Errors related to layout template rendering.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("layout render failed: {message}")]
    RenderFailed { message: String },
}

/// Errors related to the same-day delivery ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger '{path}' unreadable: {message}")]
    Load { path: String, message: String },
    #[error("ledger '{path}' not writable: {message}")]
    Persist { path: String, message: String },
}

/// The only failure that aborts a dispatch run.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to load notification rules: {0}")]
    LoadRules(#[from] StoreError),
}

//! Outbound email delivery.
//!
//! This module turns a rendered, normalized body into a MIME message and
//! hands it to a [`MailTransport`]:
//! - `smtp`: lettre async SMTP
//! - `http_api`: Gmail-style JSON `{"raw": base64url}` endpoint
//! - `log`: dry run, logs the envelope and sends nothing
//!
//! [`Mailer`] wraps the transport with a per-attempt timeout and
//! exponential backoff retry. Permanent errors are never retried.

pub mod http_api;
pub mod smtp;

use crate::config::TransportConfig;
use crate::error::{ConfigError, NotifyError};
use async_trait::async_trait;
use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use std::sync::Arc;
use std::time::Duration;

pub use http_api::HttpApiTransport;
pub use smtp::SmtpTransport;

/// Default backoff base between attempts.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default cap on the backoff delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

// =============================================================================
// Outgoing email
// =============================================================================

/// One message to one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl OutgoingEmail {
    /// Build the MIME message (`text/html; charset=utf-8`, `MIME-Version: 1.0`).
    ///
    /// # Errors
    /// [`NotifyError::InvalidAddress`] when either address does not parse.
    pub fn to_message(&self) -> Result<Message, NotifyError> {
        let from = parse_mailbox(&self.from)?;
        let to = parse_mailbox(&self.to)?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(self.html.clone())
            .map_err(|e| NotifyError::SendFailed(format!("failed to build email: {}", e)))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
            address: address.to_string(),
            message: e.to_string(),
        })
}

// =============================================================================
// MailTransport trait
// =============================================================================

/// A channel able to deliver one [`OutgoingEmail`].
///
/// Implementations make a single attempt; retry and timeout live in
/// [`Mailer`]. Transient failures must be reported as
/// [`NotifyError::SendFailed`], permanent ones as [`NotifyError::Rejected`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport kind, for logs (`smtp`, `http_api`, `log`).
    fn name(&self) -> &str;

    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError>;
}

/// Dry-run transport: logs the envelope, sends nothing.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        // Same address checks as a real send.
        let message = email.to_message()?;
        tracing::info!(
            from = %email.from,
            recipient = %email.to,
            subject = %email.subject,
            size = message.formatted().len(),
            "Dry run, email not sent"
        );
        Ok(())
    }
}

/// Build the configured transport.
///
/// # Errors
/// [`ConfigError::InvalidTransport`] when credentials or URLs cannot be resolved.
pub fn transport_from_config(
    config: &TransportConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn MailTransport>, ConfigError> {
    let transport: Arc<dyn MailTransport> = match config {
        TransportConfig::Smtp(smtp) => Arc::new(SmtpTransport::from_config(smtp)?),
        TransportConfig::HttpApi(api) => Arc::new(HttpApiTransport::from_config(api, client)?),
        TransportConfig::Log => Arc::new(LogTransport),
    };
    tracing::debug!(transport = transport.name(), "Mail transport ready");
    Ok(transport)
}

// =============================================================================
// Retry
// =============================================================================

/// Calculate the backoff delay for a given attempt number.
///
/// Formula: min(base * 2^attempt, max)
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let delay = base.saturating_mul(2_u32.saturating_pow(attempt));
    std::cmp::min(delay, max)
}

/// Timeout and retry settings for [`Mailer`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub send_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, send_timeout: Duration) -> Self {
        Self {
            max_attempts,
            send_timeout,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            send_timeout: Duration::from_secs(30),
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

/// A transport plus timeout/retry.
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn MailTransport>,
    policy: RetryPolicy,
}

impl Mailer {
    pub fn new(transport: Arc<dyn MailTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Send with up to `max_attempts` attempts.
    ///
    /// # Errors
    /// The permanent error as soon as one occurs, or
    /// [`NotifyError::MaxRetriesExceeded`] once every attempt failed transiently.
    pub async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let result =
                match tokio::time::timeout(self.policy.send_timeout, self.transport.send(email))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(NotifyError::Timeout(self.policy.send_timeout)),
                };

            match result {
                Ok(()) => {
                    tracing::debug!(recipient = %email.to, attempt, "Email sent");
                    return Ok(());
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!(
                        recipient = %email.to,
                        error = %e,
                        "Permanent send error, not retrying"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(
                        recipient = %email.to,
                        attempt,
                        error = %e,
                        "Failed to send email, retrying"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt + 1 < max_attempts {
                let delay =
                    backoff_delay(attempt, self.policy.backoff_base, self.policy.backoff_max);
                tokio::time::sleep(delay).await;
            }
        }

        tracing::warn!(
            recipient = %email.to,
            attempts = max_attempts,
            error = %last_error,
            "Failed to send email after all attempts"
        );
        Err(NotifyError::MaxRetriesExceeded {
            attempts: max_attempts,
            last_error,
        })
    }
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("transport", &self.transport.name())
            .field("policy", &self.policy)
            .finish()
    }
}

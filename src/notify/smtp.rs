//! SMTP transport.
//!
//! The lettre connection sits behind [`SmtpSender`] so retry classification
//! can be tested without a server:
//! - Production: `AsyncSmtpTransport<Tokio1Executor>`
//! - Testing: an in-memory sender recording messages

use crate::config::{SmtpConfig, TlsMode, resolve_env_vars};
use crate::error::{ConfigError, NotifyError};
use crate::notify::{MailTransport, OutgoingEmail};
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;

/// Raw SMTP submission. Errors are the server or connection message.
#[async_trait]
pub trait SmtpSender: Send + Sync {
    async fn send_message(&self, message: Message) -> Result<(), String>;
}

struct LettreSender {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl SmtpSender for LettreSender {
    async fn send_message(&self, message: Message) -> Result<(), String> {
        self.inner
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Sends every email as one SMTP transaction.
pub struct SmtpTransport {
    sender: Arc<dyn SmtpSender>,
    host: String,
}

impl SmtpTransport {
    /// Build the lettre transport from configuration.
    ///
    /// # Errors
    /// [`ConfigError::InvalidTransport`] for unresolved credentials or bad TLS settings.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidTransport {
            kind: "smtp".to_string(),
            message,
        };

        let username = config
            .username
            .as_deref()
            .map(resolve_env_vars)
            .transpose()
            .map_err(|e| invalid(format!("username: {}", e)))?;
        let password = config
            .password
            .as_ref()
            .map(|p| p.resolve_env())
            .transpose()
            .map_err(|e| invalid(format!("password: {}", e)))?;

        let host = config.host.as_str();
        let builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(config.port);

        let builder = match config.tls {
            TlsMode::None => builder,
            TlsMode::Starttls | TlsMode::Tls => {
                let mut tls_builder = TlsParameters::builder(host.to_string());
                if !config.tls_verify {
                    tls_builder = tls_builder.dangerous_accept_invalid_certs(true);
                }
                let params = tls_builder
                    .build()
                    .map_err(|e| invalid(format!("TLS configuration error: {}", e)))?;
                if config.tls == TlsMode::Tls {
                    builder.tls(Tls::Wrapper(params))
                } else {
                    builder.tls(Tls::Required(params))
                }
            }
        };

        let builder = match (username, password) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user, pass.expose().to_string()))
            }
            (None, None) => builder,
            (Some(_), None) => {
                return Err(invalid("password required when username is set".to_string()));
            }
            (None, Some(_)) => {
                return Err(invalid("username required when password is set".to_string()));
            }
        };

        Ok(Self {
            sender: Arc::new(LettreSender {
                inner: builder.build(),
            }),
            host: config.host.clone(),
        })
    }

    /// Use a custom sender instead of a real connection.
    pub fn with_sender(sender: Arc<dyn SmtpSender>, host: &str) -> Self {
        Self {
            sender,
            host: host.to_string(),
        }
    }
}

/// Whether an SMTP error is permanent and should not be retried.
///
/// Codes are matched as whole numbers so digits inside addresses do not count.
pub(crate) fn is_permanent_error(error: &str) -> bool {
    let contains_smtp_code = |code: &str| {
        error
            .split(|c: char| !c.is_ascii_digit())
            .any(|segment| segment == code)
    };
    let lower = error.to_lowercase();

    lower.contains("authentication")
        || lower.contains("invalid credentials")
        || ["535", "550", "551", "552", "553", "554"]
            .iter()
            .any(|code| contains_smtp_code(code))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        let message = email.to_message()?;
        match self.sender.send_message(message).await {
            Ok(()) => Ok(()),
            Err(error) if is_permanent_error(&error) => Err(NotifyError::Rejected(error)),
            Err(error) => Err(NotifyError::SendFailed(error)),
        }
    }
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credentials stay out of debug output.
        f.debug_struct("SmtpTransport")
            .field("host", &self.host)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretString;
    use serial_test::serial;
    use std::sync::Mutex;

    // ===================================================================
    // RecordingSender
    // ===================================================================

    /// Records messages; fails every send with `error` when set.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<String>>,
        error: Option<String>,
    }

    impl RecordingSender {
        fn failing(error: &str) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                error: Some(error.to_string()),
            }
        }
    }

    #[async_trait]
    impl SmtpSender for RecordingSender {
        async fn send_message(&self, message: Message) -> Result<(), String> {
            if let Some(error) = &self.error {
                return Err(error.clone());
            }
            let raw = String::from_utf8_lossy(&message.formatted()).to_string();
            self.sent.lock().unwrap().push(raw);
            Ok(())
        }
    }

    fn smtp_config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: None,
            password: None,
            tls: TlsMode::Starttls,
            tls_verify: true,
        }
    }

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            from: "rrhh@example.com".to_string(),
            to: "ana.paz@example.com".to_string(),
            subject: "Feliz cumple".to_string(),
            html: "<p>Hola Ana</p>".to_string(),
        }
    }

    // ===================================================================
    // Construction
    // ===================================================================

    #[tokio::test]
    async fn from_config_with_each_tls_mode() {
        for tls in [TlsMode::None, TlsMode::Starttls, TlsMode::Tls] {
            let mut config = smtp_config();
            config.tls = tls;
            assert!(SmtpTransport::from_config(&config).is_ok(), "{:?}", tls);
        }
    }

    #[tokio::test]
    async fn from_config_with_tls_verify_false() {
        let mut config = smtp_config();
        config.tls_verify = false;
        assert!(SmtpTransport::from_config(&config).is_ok());
    }

    #[test]
    fn from_config_fails_with_username_without_password() {
        let mut config = smtp_config();
        config.username = Some("rrhh".to_string());

        let err = SmtpTransport::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("password required"));
    }

    #[tokio::test]
    #[serial]
    async fn from_config_resolves_env_vars_for_credentials() {
        temp_env::with_vars(
            [
                ("TEST_SMTP_USER", Some("rrhh")),
                ("TEST_SMTP_PASS", Some("s3cret")),
            ],
            || {
                let mut config = smtp_config();
                config.username = Some("${TEST_SMTP_USER}".to_string());
                config.password = Some(SecretString::new("${TEST_SMTP_PASS}".to_string()));
                assert!(SmtpTransport::from_config(&config).is_ok());
            },
        );
    }

    #[test]
    #[serial]
    fn from_config_fails_on_undefined_env_var() {
        temp_env::with_var("UNDEFINED_SMTP_PASS", None::<&str>, || {
            let mut config = smtp_config();
            config.username = Some("rrhh".to_string());
            config.password = Some(SecretString::new("${UNDEFINED_SMTP_PASS}".to_string()));

            match SmtpTransport::from_config(&config).unwrap_err() {
                ConfigError::InvalidTransport { kind, message } => {
                    assert_eq!(kind, "smtp");
                    assert!(message.contains("password"));
                    assert!(message.contains("UNDEFINED_SMTP_PASS"));
                }
                e => panic!("Expected InvalidTransport, got {:?}", e),
            }
        });
    }

    #[tokio::test]
    async fn debug_output_does_not_leak_credentials() {
        let mut config = smtp_config();
        config.username = Some("rrhh".to_string());
        config.password = Some(SecretString::new("hunter2".to_string()));
        let transport = SmtpTransport::from_config(&config).unwrap();

        let debug = format!("{:?}", transport);
        assert!(debug.contains("smtp.example.com"));
        assert!(!debug.contains("hunter2"));
    }

    // ===================================================================
    // Error classification
    // ===================================================================

    #[test]
    fn permanent_errors_are_detected() {
        assert!(is_permanent_error("535 5.7.8 Authentication credentials invalid"));
        assert!(is_permanent_error("permanent error (550): mailbox unavailable"));
        assert!(is_permanent_error("553 mailbox name not allowed"));
        assert!(is_permanent_error("authentication failed"));
    }

    #[test]
    fn transient_errors_are_not_permanent() {
        assert!(!is_permanent_error("421 service not available"));
        assert!(!is_permanent_error("connection refused"));
        assert!(!is_permanent_error("451 temporary local problem"));
    }

    #[test]
    fn smtp_codes_inside_addresses_do_not_count() {
        assert!(!is_permanent_error("timeout sending to user5501@example.com"));
        assert!(!is_permanent_error("no route to mx550.example.com"));
    }

    // ===================================================================
    // Sending
    // ===================================================================

    #[tokio::test]
    async fn send_records_message() {
        let sender = Arc::new(RecordingSender::default());
        let transport = SmtpTransport::with_sender(sender.clone(), "mock");

        transport.send(&email()).await.unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("To: ana.paz@example.com"));
        assert!(sent[0].contains("Content-Type: text/html; charset=utf-8"));
        assert!(sent[0].contains("<p>Hola Ana</p>"));
    }

    #[tokio::test]
    async fn send_classifies_permanent_rejection() {
        let sender = Arc::new(RecordingSender::failing("550 5.1.1 user unknown"));
        let transport = SmtpTransport::with_sender(sender, "mock");

        let err = transport.send(&email()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(_)));
    }

    #[tokio::test]
    async fn send_classifies_transient_failure() {
        let sender = Arc::new(RecordingSender::failing("421 too many connections"));
        let transport = SmtpTransport::with_sender(sender, "mock");

        let err = transport.send(&email()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn send_rejects_invalid_address_before_connecting() {
        let sender = Arc::new(RecordingSender::default());
        let transport = SmtpTransport::with_sender(sender.clone(), "mock");
        let mut bad = email();
        bad.to = "ana.paz".to_string();

        assert!(matches!(
            transport.send(&bad).await,
            Err(NotifyError::InvalidAddress { .. })
        ));
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}

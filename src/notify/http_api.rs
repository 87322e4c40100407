//! HTTP mail API transport.
//!
//! POSTs `{"raw": <base64url MIME message>}` with a bearer token, the shape
//! accepted by Gmail's `users.messages.send`.
//!
//! - 2xx: delivered
//! - 4xx: permanent rejection, no retry
//! - 5xx and network errors: transient

use crate::config::{HttpApiConfig, SecretString, resolve_env_vars};
use crate::error::{ConfigError, NotifyError};
use crate::notify::{MailTransport, OutgoingEmail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;

/// Request body sent to the endpoint.
#[derive(Debug, Serialize)]
struct RawMessage {
    raw: String,
}

/// Maximum length of an error response body kept in error messages.
const MAX_ERROR_BODY_LEN: usize = 200;

pub struct HttpApiTransport {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpApiTransport {
    /// # Errors
    /// [`ConfigError::InvalidTransport`] when `${VAR}` references are undefined.
    pub fn from_config(
        config: &HttpApiConfig,
        client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidTransport {
            kind: "http_api".to_string(),
            message,
        };

        let url = resolve_env_vars(&config.url).map_err(|e| invalid(format!("url: {}", e)))?;
        let token = config
            .token
            .as_ref()
            .map(|t| t.resolve_env())
            .transpose()
            .map_err(|e| invalid(format!("token: {}", e)))?;

        Ok(Self::new(client, url, token))
    }

    pub fn new(client: reqwest::Client, url: String, token: Option<SecretString>) -> Self {
        Self { client, url, token }
    }
}

#[async_trait]
impl MailTransport for HttpApiTransport {
    fn name(&self) -> &str {
        "http_api"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        let message = email.to_message()?;
        let body = RawMessage {
            raw: URL_SAFE_NO_PAD.encode(message.formatted()),
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::trace!(status = %response.status(), "Mail API accepted message");
                Ok(())
            }
            Ok(response) if response.status().is_client_error() => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                let text: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
                tracing::error!(status = %status, "Mail API rejected message");
                Err(NotifyError::Rejected(format!("HTTP {}: {}", status, text.trim())))
            }
            Ok(response) => Err(NotifyError::SendFailed(format!(
                "server error: {}",
                response.status()
            ))),
            Err(e) => Err(NotifyError::SendFailed(e.to_string())),
        }
    }
}

impl std::fmt::Debug for HttpApiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApiTransport")
            .field("url", &self.url)
            .field("token", &self.token)
            .finish()
    }
}

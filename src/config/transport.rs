//! Mail transport configurations (SMTP, HTTP mail API, log).

use super::secret::SecretString;
use serde::Deserialize;

/// Transport configuration with type tag for deserialization.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TransportConfig {
    #[serde(rename = "smtp")]
    Smtp(SmtpConfig),
    #[serde(rename = "http_api")]
    HttpApi(HttpApiConfig),
    /// Dry run: log every envelope, send nothing.
    #[serde(rename = "log")]
    Log,
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Smtp(_) => "smtp",
            TransportConfig::HttpApi(_) => "http_api",
            TransportConfig::Log => "log",
        }
    }
}

/// SMTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Supports `${ENV_VAR}` substitution.
    #[serde(default)]
    pub username: Option<String>,
    /// Supports `${ENV_VAR}` substitution.
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
}

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    None,
    #[default]
    Starttls,
    Tls,
}

/// HTTP mail API accepting `{"raw": <base64url MIME>}` (Gmail-style
/// `messages/send`).
#[derive(Debug, Clone, Deserialize)]
pub struct HttpApiConfig {
    /// Endpoint URL (supports `${ENV_VAR}` substitution).
    pub url: String,
    /// Bearer token (supports `${ENV_VAR}` substitution).
    #[serde(default)]
    pub token: Option<SecretString>,
}

pub(crate) fn default_true() -> bool {
    true
}

//! Core configuration types and loading.

use super::env::{resolve_env_vars, resolve_layout_template};
use super::transport::TransportConfig;
use super::validation::{validate_email_address, validate_http_url, validate_layout_template};
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hrnotify/config.yaml";

/// Upper bound for `dispatch.max_concurrent_rules`.
pub const MAX_CONCURRENT_RULES_LIMIT: usize = 64;

/// Upper bound for `dispatch.max_attempts`.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Main configuration structure for hrnotify.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// IANA timezone deciding what "today" is (e.g. "America/Argentina/Buenos_Aires").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Where rules, templates and source records are read from.
    pub store: StoreConfig,
    /// How emails leave the process.
    pub transport: TransportConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Directory of the loaded file, base for relative template paths.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Record store backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// One `<collection>.json` file per collection under `path`.
    #[serde(rename = "json_dir")]
    JsonDir { path: PathBuf },
}

/// Dispatch run settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Overrides the sender stored in `configuraciones/MailEnvio`.
    #[serde(default)]
    pub sender_email: Option<String>,
    #[serde(default = "default_max_concurrent_rules")]
    pub max_concurrent_rules: usize,
    /// Per-attempt send timeout.
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Same-day delivery ledger; disabled when absent.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
    /// Last normalized body is written here for inspection.
    #[serde(default)]
    pub html_dump_path: Option<PathBuf>,
    /// Jinja layout wrapping every body (relative to the config file).
    #[serde(default)]
    pub layout_template_file: Option<String>,
}

fn default_max_concurrent_rules() -> usize {
    4
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            sender_email: None,
            max_concurrent_rules: default_max_concurrent_rules(),
            send_timeout: default_send_timeout(),
            max_attempts: default_max_attempts(),
            ledger_path: None,
            html_dump_path: None,
            layout_template_file: None,
        }
    }
}

/// Metrics exposition configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written at the end of every run.
    #[serde(default)]
    pub textfile_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// # Errors
    /// Returns [`ConfigError::LoadError`] if the file cannot be read.
    /// Returns [`ConfigError::ValidationError`] if the YAML is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_yaml(&content)?;
        config.config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config)
    }

    /// Parse configuration from YAML text; relative paths resolve against
    /// the current directory.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        config.config_dir = PathBuf::from(".");
        Ok(config)
    }

    /// Validate the whole configuration, collecting every problem.
    ///
    /// # Errors
    /// Returns a `Vec<ConfigError>` containing all validation errors found.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            errors.push(ConfigError::ValidationError(format!(
                "timezone '{}' is not a valid timezone",
                self.timezone
            )));
        }

        match &self.store {
            StoreConfig::JsonDir { path } if path.as_os_str().is_empty() => {
                errors.push(ConfigError::ValidationError(
                    "store.path cannot be empty".to_string(),
                ));
            }
            StoreConfig::JsonDir { .. } => {}
        }

        errors.extend(self.validate_transport());
        errors.extend(self.validate_dispatch());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_transport(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let invalid = |kind: &str, message: String| ConfigError::InvalidTransport {
            kind: kind.to_string(),
            message,
        };

        match &self.transport {
            TransportConfig::Smtp(smtp) => {
                if smtp.host.trim().is_empty() {
                    errors.push(invalid("smtp", "host cannot be empty".to_string()));
                }
                if smtp.port == 0 {
                    errors.push(invalid("smtp", "port cannot be 0".to_string()));
                }
                match (&smtp.username, &smtp.password) {
                    (Some(_), None) => errors.push(invalid(
                        "smtp",
                        "password required when username is set".to_string(),
                    )),
                    (None, Some(_)) => errors.push(invalid(
                        "smtp",
                        "username required when password is set".to_string(),
                    )),
                    _ => {}
                }
                if let Some(username) = &smtp.username
                    && let Err(e) = resolve_env_vars(username)
                {
                    errors.push(invalid("smtp", format!("username: {}", e)));
                }
                if let Some(password) = &smtp.password
                    && let Err(e) = resolve_env_vars(password.expose())
                {
                    errors.push(invalid("smtp", format!("password: {}", e)));
                }
            }
            TransportConfig::HttpApi(api) => {
                match resolve_env_vars(&api.url) {
                    Ok(url) => {
                        if let Err(e) = validate_http_url(&url) {
                            errors.push(invalid("http_api", format!("url: {}", e)));
                        }
                    }
                    Err(e) => errors.push(invalid("http_api", format!("url: {}", e))),
                }
                if let Some(token) = &api.token
                    && let Err(e) = resolve_env_vars(token.expose())
                {
                    errors.push(invalid("http_api", format!("token: {}", e)));
                }
            }
            TransportConfig::Log => {}
        }

        errors
    }

    fn validate_dispatch(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let dispatch = &self.dispatch;

        if dispatch.max_concurrent_rules == 0
            || dispatch.max_concurrent_rules > MAX_CONCURRENT_RULES_LIMIT
        {
            errors.push(ConfigError::ValidationError(format!(
                "dispatch.max_concurrent_rules must be between 1 and {}, got {}",
                MAX_CONCURRENT_RULES_LIMIT, dispatch.max_concurrent_rules
            )));
        }

        if dispatch.max_attempts == 0 || dispatch.max_attempts > MAX_ATTEMPTS_LIMIT {
            errors.push(ConfigError::ValidationError(format!(
                "dispatch.max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS_LIMIT, dispatch.max_attempts
            )));
        }

        if dispatch.send_timeout.is_zero() {
            errors.push(ConfigError::ValidationError(
                "dispatch.send_timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(sender) = &dispatch.sender_email
            && let Err(e) = validate_email_address(sender)
        {
            errors.push(ConfigError::ValidationError(format!(
                "dispatch.sender_email: {}",
                e
            )));
        }

        if let Some(file) = &dispatch.layout_template_file {
            match resolve_layout_template(file, &self.config_dir) {
                Ok(source) => {
                    if let Err(e) = validate_layout_template(&source) {
                        errors.push(ConfigError::InvalidTemplate {
                            name: file.clone(),
                            message: e,
                        });
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        errors
    }
}

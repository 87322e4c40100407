//! Runtime configuration with parsed timezone and loaded layout.

use super::env::resolve_layout_template;
use super::transport::TransportConfig;
use super::types::{Config, DispatchConfig, MetricsConfig, StoreConfig};
use crate::error::ConfigError;
use chrono_tz::Tz;
use std::path::PathBuf;

/// Configuration ready for wiring the dispatcher.
#[derive(Debug)]
pub struct RuntimeConfig {
    pub timezone: Tz,
    pub store: StoreConfig,
    pub transport: TransportConfig,
    pub dispatch: DispatchConfig,
    pub metrics: MetricsConfig,
    /// Source of `dispatch.layout_template_file`, when configured.
    pub layout_source: Option<String>,
    pub config_dir: PathBuf,
}

impl Config {
    /// Compile configuration into runtime-ready form.
    ///
    /// Expects [`Config::validate`] to have passed; still reports errors
    /// instead of panicking if it did not.
    pub fn compile(self) -> Result<RuntimeConfig, ConfigError> {
        let timezone: Tz = self.timezone.parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "timezone '{}' is not a valid timezone",
                self.timezone
            ))
        })?;

        let layout_source = self
            .dispatch
            .layout_template_file
            .as_deref()
            .map(|file| resolve_layout_template(file, &self.config_dir))
            .transpose()?;

        Ok(RuntimeConfig {
            timezone,
            store: self.store,
            transport: self.transport,
            dispatch: self.dispatch,
            metrics: self.metrics,
            layout_source,
            config_dir: self.config_dir,
        })
    }
}

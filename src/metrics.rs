//! Prometheus metrics for batch runs.
//!
//! hrnotify exits after one pass, so nothing is scraped over HTTP. The
//! recorder collects metrics in-process and the exposition is written to
//! `metrics.textfile_path` at the end of the run, for node_exporter's
//! textfile collector.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::sync::OnceLock;

use crate::model::ErrorKind;

/// Handle of the process-wide recorder, installed at most once.
static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Every failure kind, for zero-initialized labelled counters.
const ERROR_KINDS: [ErrorKind; 6] = [
    ErrorKind::MissingDeliveryConfig,
    ErrorKind::InvalidRule,
    ErrorKind::InvalidTemplateReference,
    ErrorKind::IncompleteTemplate,
    ErrorKind::StoreUnavailable,
    ErrorKind::TransportFailure,
];

/// Register all metric descriptions (HELP text).
pub fn register_metric_descriptions() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        "hrnotify_rules_loaded_total",
        "Automated rules loaded from the store"
    );
    describe_counter!(
        "hrnotify_rules_due_total",
        "Rules whose schedule fired on the evaluated day"
    );
    describe_counter!(
        "hrnotify_emails_sent_total",
        "Emails accepted by the mail transport"
    );
    describe_counter!(
        "hrnotify_emails_failed_total",
        "Emails that failed after all attempts or were rejected"
    );
    describe_counter!(
        "hrnotify_dispatch_failures_total",
        "Failed dispatch results by error kind"
    );
    describe_gauge!(
        "hrnotify_last_run_timestamp_seconds",
        "Unix timestamp of the last completed run"
    );
    describe_gauge!(
        "hrnotify_build_info",
        "Build information with version label (always 1)"
    );
    describe_histogram!(
        "hrnotify_run_duration_seconds",
        "Wall time of one dispatch run"
    );
}

/// Set every known series to zero so absent events still show up.
pub fn initialize_metrics() {
    use metrics::{counter, gauge};

    gauge!("hrnotify_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    counter!("hrnotify_rules_loaded_total").absolute(0);
    counter!("hrnotify_rules_due_total").absolute(0);
    counter!("hrnotify_emails_sent_total").absolute(0);
    counter!("hrnotify_emails_failed_total").absolute(0);
    for kind in ERROR_KINDS {
        counter!("hrnotify_dispatch_failures_total", "error_kind" => kind.as_str()).absolute(0);
    }
}

/// Writes the Prometheus exposition of the installed recorder to a file.
#[derive(Clone)]
pub struct TextfileExporter {
    handle: PrometheusHandle,
}

impl TextfileExporter {
    /// Install the global recorder (once per process) and describe metrics.
    ///
    /// # Errors
    /// Returns an error if another recorder is already installed.
    pub fn install() -> Result<Self> {
        if let Some(handle) = HANDLE.get() {
            return Ok(Self::from_handle(handle.clone()));
        }

        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
        let handle = HANDLE.get_or_init(|| handle).clone();

        register_metric_descriptions();
        initialize_metrics();
        tracing::debug!("Metrics recorder installed");
        Ok(Self::from_handle(handle))
    }

    pub fn from_handle(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Current exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Stamp the run time and write the exposition to `path`.
    ///
    /// Written to a sibling temp file first, then renamed, so the collector
    /// never reads a partial file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let now = chrono::Utc::now().timestamp() as f64;
        metrics::gauge!("hrnotify_last_run_timestamp_seconds").set(now);

        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, self.render())
            .with_context(|| format!("failed to write metrics to {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move metrics to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Metrics textfile written");
        Ok(())
    }
}

impl std::fmt::Debug for TextfileExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextfileExporter").finish_non_exhaustive()
    }
}

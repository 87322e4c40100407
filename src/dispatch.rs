//! Dispatch orchestrator: one pass over every automated rule.
//!
//! ```text
//! load rules -> per rule: decode -> due? -> sender/recipients -> template
//!            -> instances -> per instance: render -> layout -> normalize
//!            -> send per recipient -> ledger
//! ```
//!
//! Only a failure to load the rules aborts the run. Everything else is
//! captured as a [`DispatchResult`], so one broken rule or one bounced
//! recipient never stops the rest of the batch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{StreamExt, stream};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::clock::{CalendarDate, Clock};
use crate::error::{DispatchError, ResolveError};
use crate::ledger::{DeliveryKey, DeliveryLedger};
use crate::matcher;
use crate::model::{Delivery, DispatchResult, ErrorKind, NotificationRule, Template};
use crate::normalize::EmailHtmlNormalizer;
use crate::notify::{Mailer, OutgoingEmail};
use crate::resolver::{self, NotificationInstance};
use crate::store::{
    Document, Filter, RULES_COLLECTION, RecordStore, SENDER_DOCUMENT, SETTINGS_COLLECTION,
    TEMPLATES_COLLECTION, active_filters,
};
use crate::template::{Layout, render_template};

/// Field of the sender settings document holding the `From` address.
const SENDER_FIELD: &str = "senderEmail";

/// Run settings not tied to a collaborator.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Overrides the stored sender.
    pub sender_email: Option<String>,
    /// Rules (and instances of one rule) in flight at once.
    pub max_concurrent_rules: usize,
    pub html_dump_path: Option<PathBuf>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            sender_email: None,
            max_concurrent_rules: 4,
            html_dump_path: None,
        }
    }
}

/// Filters selecting automated, active, non-deleted rules.
pub fn rule_filters() -> Vec<Filter> {
    let mut filters = vec![Filter::eq("automatizacion", true)];
    filters.extend(active_filters());
    filters
}

/// Outcome of one recipient of [`Dispatcher::send_message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub recipient: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    mailer: Mailer,
    clock: Arc<dyn Clock>,
    normalizer: EmailHtmlNormalizer,
    layout: Option<Layout>,
    ledger: Option<Arc<dyn DeliveryLedger>>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RecordStore>, mailer: Mailer, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            mailer,
            clock,
            normalizer: EmailHtmlNormalizer::new(),
            layout: None,
            ledger: None,
            settings: DispatchSettings::default(),
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn DeliveryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_normalizer(mut self, normalizer: EmailHtmlNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Evaluate every rule for today and send what is due.
    ///
    /// Results keep rule order. Rules not yet started when `cancel` fires
    /// are skipped; results already produced are returned.
    ///
    /// # Errors
    /// [`DispatchError::LoadRules`] when the rule collection cannot be read.
    pub async fn run(
        &self,
        cancel: CancellationToken,
    ) -> Result<Vec<DispatchResult>, DispatchError> {
        let started = Instant::now();
        let today = self.clock.today();

        let rules = self.store.query(RULES_COLLECTION, &rule_filters()).await?;
        metrics::counter!("hrnotify_rules_loaded_total").increment(rules.len() as u64);
        info!(today = %today, rules = rules.len(), "Rules loaded");

        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let sender = self.resolve_sender().await;
        let limit = self.settings.max_concurrent_rules.max(1);

        let batches: Vec<Vec<DispatchResult>> = stream::iter(rules.iter())
            .map(|document| {
                let sender = &sender;
                let cancel = &cancel;
                async move {
                    if cancel.is_cancelled() {
                        debug!(rule_id = %document.id, "Run cancelled, rule skipped");
                        return Vec::new();
                    }
                    let span = tracing::info_span!("dispatch_rule", rule_id = %document.id);
                    self.process_rule(document, today, sender)
                        .instrument(span)
                        .await
                }
            })
            .buffered(limit)
            .collect()
            .await;

        let results: Vec<DispatchResult> = batches.into_iter().flatten().collect();
        let failed = results.iter().filter(|r| !r.is_ok()).count();

        metrics::histogram!("hrnotify_run_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        info!(
            results = results.len(),
            ok = results.len() - failed,
            failed,
            cancelled = cancel.is_cancelled(),
            "Dispatch run complete"
        );
        Ok(results)
    }

    /// Sender address: config override, else the stored settings document.
    async fn resolve_sender(&self) -> Result<String, ResolveError> {
        if let Some(sender) = &self.settings.sender_email {
            return Ok(sender.clone());
        }

        let missing = |detail: &str| ResolveError {
            kind: ErrorKind::MissingDeliveryConfig,
            detail: detail.to_string(),
        };

        match self.store.get(SETTINGS_COLLECTION, SENDER_DOCUMENT).await {
            Ok(Some(document)) => document
                .get_str(SENDER_FIELD)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| missing("sender settings have no senderEmail")),
            Ok(None) => Err(missing("no sender configured")),
            Err(e) => {
                warn!(error = %e, "Failed to read sender settings");
                Err(ResolveError {
                    kind: ErrorKind::StoreUnavailable,
                    detail: e.to_string(),
                })
            }
        }
    }

    async fn process_rule(
        &self,
        document: &Document,
        today: CalendarDate,
        sender: &Result<String, ResolveError>,
    ) -> Vec<DispatchResult> {
        let rule = match NotificationRule::from_document(document) {
            Ok(rule) => rule,
            Err(e) => return vec![failure(&document.id, ErrorKind::InvalidRule, e.to_string())],
        };

        if !matcher::is_due(&rule, today) {
            debug!("Rule not due today");
            return Vec::new();
        }
        metrics::counter!("hrnotify_rules_due_total").increment(1);
        debug!(trigger = ?rule.trigger(), "Rule due");

        let sender = match sender {
            Ok(sender) => sender.as_str(),
            Err(e) => return vec![failure(&rule.id, e.kind, e.detail.clone())],
        };

        let recipients = match resolver::resolve_recipients(&rule, self.store.as_ref()).await {
            Ok(recipients) => recipients,
            Err(e) => return vec![failure(&rule.id, e.kind, e.detail)],
        };

        let template = match self.fetch_template(&rule).await {
            Ok(template) => template,
            Err(e) => return vec![failure(&rule.id, e.kind, e.detail)],
        };

        let instances =
            match resolver::resolve_instances(&rule, today, self.store.as_ref()).await {
                Ok(instances) => instances,
                Err(e) => return vec![failure(&rule.id, e.kind, e.detail)],
            };
        if instances.is_empty() {
            debug!("No source record matches today");
            return Vec::new();
        }

        let rule = &rule;
        let template = &template;
        let recipients = recipients.as_slice();
        stream::iter(instances)
            .map(|instance| self.deliver(rule, template, instance, sender, recipients, today))
            .buffered(self.settings.max_concurrent_rules.max(1))
            .collect()
            .await
    }

    /// Template of a rule, fetched once and shared by all its instances.
    async fn fetch_template(&self, rule: &NotificationRule) -> Result<Template, ResolveError> {
        let Some(template_id) = rule.template_id.as_deref() else {
            return Err(ResolveError {
                kind: ErrorKind::InvalidTemplateReference,
                detail: "rule has no template reference".to_string(),
            });
        };

        let incomplete = |detail: String| ResolveError {
            kind: ErrorKind::IncompleteTemplate,
            detail,
        };

        match self.store.get(TEMPLATES_COLLECTION, template_id).await {
            Ok(Some(document)) => Template::from_document(&document).ok_or_else(|| {
                incomplete(format!(
                    "template '{}' is deleted or lacks subject or body",
                    template_id
                ))
            }),
            Ok(None) => Err(incomplete(format!("template '{}' not found", template_id))),
            Err(e) => Err(ResolveError {
                kind: ErrorKind::StoreUnavailable,
                detail: e.to_string(),
            }),
        }
    }

    async fn deliver(
        &self,
        rule: &NotificationRule,
        template: &Template,
        instance: NotificationInstance,
        sender: &str,
        recipients: &[String],
        today: CalendarDate,
    ) -> DispatchResult {
        let rendered = render_template(template, &instance.context);

        let body = match &self.layout {
            Some(layout) => match layout.wrap(&rendered.body, &rendered.subject, &rule.id) {
                Ok(html) => html,
                Err(e) => return failure(&rule.id, ErrorKind::IncompleteTemplate, e.to_string()),
            },
            None => rendered.body,
        };
        let html = self.normalizer.normalize(&body);
        self.dump_html(&html).await;

        let mut sent = Vec::new();
        let mut skipped = Vec::new();
        let mut failures = Vec::new();

        for recipient in recipients {
            let key = DeliveryKey::new(&rule.id, today, instance.record_id.as_deref(), recipient);
            if let Some(ledger) = &self.ledger
                && ledger.contains(&key).await
            {
                debug!(recipient = %recipient, "Already delivered today, skipping");
                skipped.push(recipient.clone());
                continue;
            }

            let email = OutgoingEmail {
                from: sender.to_string(),
                to: recipient.clone(),
                subject: rendered.subject.clone(),
                html: html.clone(),
            };

            match self.mailer.send(&email).await {
                Ok(()) => {
                    metrics::counter!("hrnotify_emails_sent_total").increment(1);
                    sent.push(recipient.clone());
                    if let Some(ledger) = &self.ledger
                        && let Err(e) = ledger.record(key).await
                    {
                        warn!(recipient = %recipient, error = %e, "Failed to record delivery");
                    }
                }
                Err(e) => {
                    metrics::counter!("hrnotify_emails_failed_total").increment(1);
                    warn!(recipient = %recipient, error = %e, "Failed to send email");
                    failures.push(format!("{}: {}", recipient, e));
                }
            }
        }

        if !failures.is_empty() {
            let detail = format!(
                "{} of {} recipients failed: {}",
                failures.len(),
                recipients.len(),
                failures.join("; ")
            );
            return failure(&rule.id, ErrorKind::TransportFailure, detail);
        }

        info!(
            record_id = instance.record_id.as_deref().unwrap_or("-"),
            sent = sent.len(),
            skipped = skipped.len(),
            "Notification delivered"
        );
        DispatchResult::delivered(
            &rule.id,
            Delivery {
                recipients: sent,
                skipped,
                trigger: rule.trigger(),
                template_id: template.id.clone(),
                record_id: instance.record_id,
            },
        )
    }

    /// Send one email outside the rule pass: `html` is normalized like a
    /// rule body and sent to every address in `to`.
    ///
    /// `from` overrides the configured or stored sender.
    ///
    /// # Errors
    /// A [`ResolveError`] when no sender can be determined. Per-recipient
    /// failures are reported in the returned list.
    pub async fn send_message(
        &self,
        from: Option<&str>,
        to: &[String],
        subject: &str,
        html: &str,
    ) -> Result<Vec<SendReport>, ResolveError> {
        let sender = match from.map(str::trim).filter(|f| !f.is_empty()) {
            Some(from) => from.to_string(),
            None => self.resolve_sender().await?,
        };
        let html = self.normalizer.normalize(html);
        self.dump_html(&html).await;

        let mut reports = Vec::with_capacity(to.len());
        for recipient in to {
            let email = OutgoingEmail {
                from: sender.clone(),
                to: recipient.clone(),
                subject: subject.to_string(),
                html: html.clone(),
            };
            let error = match self.mailer.send(&email).await {
                Ok(()) => {
                    metrics::counter!("hrnotify_emails_sent_total").increment(1);
                    info!(recipient = %recipient, "Email sent");
                    None
                }
                Err(e) => {
                    metrics::counter!("hrnotify_emails_failed_total").increment(1);
                    warn!(recipient = %recipient, error = %e, "Failed to send email");
                    Some(e.to_string())
                }
            };
            reports.push(SendReport {
                recipient: recipient.clone(),
                ok: error.is_none(),
                error,
            });
        }
        Ok(reports)
    }

    async fn dump_html(&self, html: &str) {
        let Some(path) = &self.settings.html_dump_path else {
            return;
        };
        if let Err(e) = tokio::fs::write(path, html).await {
            warn!(path = %path.display(), error = %e, "Failed to write HTML dump");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mailer", &self.mailer)
            .field("layout", &self.layout.is_some())
            .field("ledger", &self.ledger.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Build a failed result, logging and counting it.
fn failure(rule_id: &str, kind: ErrorKind, detail: impl Into<String>) -> DispatchResult {
    let detail = detail.into();
    warn!(error_kind = %kind, detail = %detail, "Notification failed");
    metrics::counter!("hrnotify_dispatch_failures_total", "error_kind" => kind.as_str())
        .increment(1);
    DispatchResult::failed(rule_id, kind, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::notify::{LogTransport, RetryPolicy};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn dispatcher(store: MemoryStore, settings: DispatchSettings) -> Dispatcher {
        let clock = FixedClock::new(CalendarDate::from_ymd(2024, 12, 25).unwrap());
        Dispatcher::new(
            Arc::new(store),
            Mailer::new(Arc::new(LogTransport), RetryPolicy::default()),
            Arc::new(clock),
        )
        .with_settings(settings)
    }

    #[test]
    fn rule_filters_select_automated_active_rules() {
        let filters = rule_filters();
        assert_eq!(filters.len(), 3);
        assert!(filters.contains(&Filter::eq("automatizacion", true)));
        assert!(filters.contains(&Filter::eq("estado", true)));
        assert!(filters.contains(&Filter::eq("eliminado", false)));
    }

    #[tokio::test]
    async fn sender_override_wins_over_store() {
        let store = MemoryStore::new().with_document(
            SETTINGS_COLLECTION,
            SENDER_DOCUMENT,
            json!({"senderEmail": "stored@example.com"}),
        );
        let settings = DispatchSettings {
            sender_email: Some("override@example.com".to_string()),
            ..DispatchSettings::default()
        };
        let sender = dispatcher(store, settings).resolve_sender().await.unwrap();
        assert_eq!(sender, "override@example.com");
    }

    #[tokio::test]
    async fn sender_read_from_settings_document() {
        let store = MemoryStore::new().with_document(
            SETTINGS_COLLECTION,
            SENDER_DOCUMENT,
            json!({"senderEmail": "  stored@example.com "}),
        );
        let sender = dispatcher(store, DispatchSettings::default())
            .resolve_sender()
            .await
            .unwrap();
        assert_eq!(sender, "stored@example.com");
    }

    #[tokio::test]
    async fn blank_or_missing_sender_is_missing_delivery_config() {
        let store = MemoryStore::new().with_document(
            SETTINGS_COLLECTION,
            SENDER_DOCUMENT,
            json!({"senderEmail": ""}),
        );
        let err = dispatcher(store, DispatchSettings::default())
            .resolve_sender()
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingDeliveryConfig);

        let err = dispatcher(MemoryStore::new(), DispatchSettings::default())
            .resolve_sender()
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingDeliveryConfig);
    }

    #[tokio::test]
    async fn unreadable_settings_is_store_unavailable() {
        let store = MemoryStore::new().with_unavailable(SETTINGS_COLLECTION);
        let err = dispatcher(store, DispatchSettings::default())
            .resolve_sender()
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::StoreUnavailable);
    }

    #[tokio::test]
    async fn html_dump_writes_last_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.html");
        let settings = DispatchSettings {
            html_dump_path: Some(path.clone()),
            ..DispatchSettings::default()
        };
        dispatcher(MemoryStore::new(), settings)
            .dump_html("<p>hola</p>")
            .await;
        assert_eq!(std::fs::read_to_string(path).unwrap(), "<p>hola</p>");
    }

    // ===================================================================
    // Single message
    // ===================================================================

    #[tokio::test]
    async fn send_message_uses_explicit_sender_and_reports_each_recipient() {
        let to = vec!["ana.paz@example.com".to_string(), "no es una dirección".to_string()];
        let reports = dispatcher(MemoryStore::new(), DispatchSettings::default())
            .send_message(Some("rrhh@example.com"), &to, "Prueba", "<p><mark>Hola</mark></p>")
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports[0].ok);
        assert!(reports[0].error.is_none());
        assert!(!reports[1].ok);
        assert!(reports[1].error.as_deref().unwrap().contains("invalid address"));

        let json = serde_json::to_value(&reports[0]).unwrap();
        assert_eq!(json, json!({"recipient": "ana.paz@example.com", "ok": true}));
    }

    #[tokio::test]
    async fn send_message_without_any_sender_fails() {
        let err = dispatcher(MemoryStore::new(), DispatchSettings::default())
            .send_message(None, &["ana.paz@example.com".to_string()], "x", "<p>x</p>")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingDeliveryConfig);
    }

    #[tokio::test]
    async fn send_message_normalizes_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.html");
        let store = MemoryStore::new().with_document(
            SETTINGS_COLLECTION,
            SENDER_DOCUMENT,
            json!({"senderEmail": "rrhh@example.com"}),
        );
        let settings = DispatchSettings {
            html_dump_path: Some(path.clone()),
            ..DispatchSettings::default()
        };

        let reports = dispatcher(store, settings)
            .send_message(
                None,
                &["ana.paz@example.com".to_string()],
                "Prueba",
                r#"<p><mark data-color="yellow">Hola</mark></p>"#,
            )
            .await
            .unwrap();

        assert!(reports[0].ok);
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            r#"<p><span style="background-color: yellow;">Hola</span></p>"#
        );
    }
}

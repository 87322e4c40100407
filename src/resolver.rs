//! Expands a due rule into recipients and notification instances.
//!
//! Recipients are shared by every instance of a rule. Date-triggered rules
//! yield a single instance without record context; field-triggered rules
//! yield one instance per eligible source record whose date field falls on
//! today's day and month.

use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Value};

use crate::clock::CalendarDate;
use crate::error::ResolveError;
use crate::model::{ErrorKind, NotificationRule, RecipientSpec, Schedule};
use crate::store::{Document, Filter, PERSONNEL_COLLECTION, RecordStore, active_filters};

/// Field of a personnel record holding the institutional address.
const INSTITUTIONAL_EMAIL_FIELD: &str = "emailInstitucional";
/// Field of a personnel record holding the relationship type.
const RELATION_FIELD: &str = "relacion";
/// Date format of source record fields.
const SOURCE_DATE_FORMAT: &str = "%d/%m/%Y";

/// One email-worthy occurrence of a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationInstance {
    /// Matching source record, `None` for date-triggered rules.
    pub record_id: Option<String>,
    /// Values available to template tokens.
    pub context: Map<String, Value>,
}

/// Everything a rule expands to on one day.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub recipients: Vec<String>,
    pub instances: Vec<NotificationInstance>,
}

/// Resolve recipients and instances in one go.
pub async fn resolve(
    rule: &NotificationRule,
    today: CalendarDate,
    store: &dyn RecordStore,
) -> Result<Resolution, ResolveError> {
    let recipients = resolve_recipients(rule, store).await?;
    let instances = resolve_instances(rule, today, store).await?;
    Ok(Resolution {
        recipients,
        instances,
    })
}

/// Concrete recipient addresses of a rule. Empty is a delivery config error.
pub async fn resolve_recipients(
    rule: &NotificationRule,
    store: &dyn RecordStore,
) -> Result<Vec<String>, ResolveError> {
    let recipients = match &rule.recipients {
        RecipientSpec::DistributionList(addresses) => addresses.clone(),
        RecipientSpec::Institutional { relation } => {
            let personnel = store
                .query(PERSONNEL_COLLECTION, &active_filters())
                .await
                .map_err(ResolveError::from)?;
            institutional_addresses(&personnel, relation.as_deref())
        }
    };

    if recipients.is_empty() {
        return Err(ResolveError {
            kind: ErrorKind::MissingDeliveryConfig,
            detail: "rule has no recipients".to_string(),
        });
    }
    Ok(recipients)
}

fn institutional_addresses(personnel: &[Document], relation: Option<&str>) -> Vec<String> {
    let wanted = relation.map(|r| r.trim().to_lowercase());
    let mut addresses: Vec<String> = Vec::new();
    for record in personnel {
        if let Some(wanted) = &wanted {
            let actual = record
                .get_str(RELATION_FIELD)
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            if &actual != wanted {
                continue;
            }
        }
        let Some(address) = record
            .get_str(INSTITUTIONAL_EMAIL_FIELD)
            .map(str::trim)
            .filter(|a| !a.is_empty())
        else {
            continue;
        };
        if !addresses.iter().any(|a| a == address) {
            addresses.push(address.to_string());
        }
    }
    addresses
}

/// Notification instances of a rule for `today`.
pub async fn resolve_instances(
    rule: &NotificationRule,
    today: CalendarDate,
    store: &dyn RecordStore,
) -> Result<Vec<NotificationInstance>, ResolveError> {
    let Schedule::Field { collection, field } = &rule.schedule else {
        return Ok(vec![NotificationInstance {
            record_id: None,
            context: Map::new(),
        }]);
    };

    let records = store
        .query(collection, &active_filters())
        .await
        .map_err(ResolveError::from)?;

    let instances: Vec<_> = records
        .iter()
        .filter(|record| eligible(record))
        .filter(|record| match source_date(record, field) {
            Some(date) => date.day() == today.day() && date.month() == today.month(),
            None => {
                tracing::debug!(
                    rule_id = %rule.id,
                    record_id = %record.id,
                    field = %field,
                    "Source date empty or unparsable, skipping record"
                );
                false
            }
        })
        .map(|record| NotificationInstance {
            record_id: Some(record.id.clone()),
            context: record_context(record),
        })
        .collect();

    tracing::debug!(
        rule_id = %rule.id,
        collection = %collection,
        scanned = records.len(),
        matched = instances.len(),
        "Field trigger evaluated"
    );
    Ok(instances)
}

/// Re-check the activity flags so stores that ignore filters stay safe.
fn eligible(record: &Document) -> bool {
    Filter::eq("estado", true).matches(record) && Filter::eq("eliminado", false).matches(record)
}

/// Parse `DD/MM/YYYY` from `field`, `None` when absent or malformed.
fn source_date(record: &Document, field: &str) -> Option<NaiveDate> {
    let raw = record.get_str(field)?.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, SOURCE_DATE_FORMAT).ok()
}

fn record_context(record: &Document) -> Map<String, Value> {
    let mut context = record.fields.clone();
    context.insert("id".to_string(), Value::String(record.id.clone()));
    context
}

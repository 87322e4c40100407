//! Typed views over stored rule and template documents, and the per-run
//! dispatch results.
//!
//! Stored documents use the panel's field names (`plantilla`,
//! `disparadorEvento`, `enviarA`...). Decoding turns them into a
//! [`NotificationRule`] whose [`Schedule`] makes the trigger/periodicity
//! invariant unrepresentable when broken.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::RuleDecodeError;
use crate::store::Document;

/// `tipoDestino` value selecting recipients derived from employee records.
pub const INSTITUTIONAL_DESTINATION: &str = "Email institucional";
/// `tipoSeleccionCorreoInstitucional` value restricting to one relationship.
pub const RELATION_SELECTION: &str = "relacion";

/// How a rule decides "when".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    /// Date derived from a field on each source record.
    Field,
    /// Date encoded directly on the rule.
    Date,
}

/// Recurrence pattern of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Periodicity {
    Annual,
    Monthly,
    FixedDate,
    TwoFixedDates,
}

impl Periodicity {
    /// Parse the stored label (`Anual`, `Mensual`, `Fecha determinada`,
    /// `2 Fechas determinadas`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Anual" => Some(Self::Annual),
            "Mensual" => Some(Self::Monthly),
            "Fecha determinada" => Some(Self::FixedDate),
            "2 Fechas determinadas" => Some(Self::TwoFixedDates),
            _ => None,
        }
    }
}

/// Trigger-specific inputs of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Scan `collection` and compare each record's `field` (DD/MM/YYYY)
    /// against today's day and month.
    Field {
        collection: String,
        field: String,
    },
    /// Fires when today's `DD/MM` equals `day_month`.
    Annual { day_month: String },
    /// Fires on `day_of_month` ("01".."31"), clamped to the month length.
    Monthly { day_of_month: String },
    /// Fires on one ISO date.
    FixedDate { date: String },
    /// Fires on either of two ISO dates.
    TwoFixedDates { first: String, second: String },
}

impl Schedule {
    pub fn trigger(&self) -> Trigger {
        match self {
            Schedule::Field { .. } => Trigger::Field,
            _ => Trigger::Date,
        }
    }

    /// `None` for field-triggered rules, whose periodicity is implied by
    /// the record field.
    pub fn periodicity(&self) -> Option<Periodicity> {
        match self {
            Schedule::Field { .. } => None,
            Schedule::Annual { .. } => Some(Periodicity::Annual),
            Schedule::Monthly { .. } => Some(Periodicity::Monthly),
            Schedule::FixedDate { .. } => Some(Periodicity::FixedDate),
            Schedule::TwoFixedDates { .. } => Some(Periodicity::TwoFixedDates),
        }
    }
}

/// Where a rule's emails go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientSpec {
    /// Literal addresses configured on the rule.
    DistributionList(Vec<String>),
    /// Institutional addresses of active employees, optionally restricted
    /// to one relationship type.
    Institutional { relation: Option<String> },
}

/// A decoded `notificaciones` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRule {
    pub id: String,
    pub name: String,
    /// `None` when `plantilla` is missing, empty or not a string.
    pub template_id: Option<String>,
    pub schedule: Schedule,
    pub recipients: RecipientSpec,
}

impl NotificationRule {
    pub fn trigger(&self) -> Trigger {
        self.schedule.trigger()
    }
}

/// Accept strings, numbers and null where the panel stored free-form text.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRule {
    #[serde(deserialize_with = "lenient_string")]
    nombre: String,
    plantilla: Value,
    #[serde(deserialize_with = "lenient_string")]
    periodicidad: String,
    #[serde(rename = "disparadorEvento", deserialize_with = "lenient_string")]
    disparador_evento: String,
    #[serde(deserialize_with = "lenient_string")]
    origen: String,
    #[serde(deserialize_with = "lenient_string")]
    campo: String,
    #[serde(deserialize_with = "lenient_string")]
    dia: String,
    #[serde(rename = "diaMes", deserialize_with = "lenient_string")]
    dia_mes: String,
    #[serde(deserialize_with = "lenient_string")]
    fecha1: String,
    #[serde(deserialize_with = "lenient_string")]
    fecha2: String,
    #[serde(rename = "enviarA")]
    enviar_a: Value,
    #[serde(rename = "tipoDestino", deserialize_with = "lenient_string")]
    tipo_destino: String,
    #[serde(
        rename = "tipoSeleccionCorreoInstitucional",
        deserialize_with = "lenient_string"
    )]
    tipo_seleccion: String,
    #[serde(rename = "relacionDestino", deserialize_with = "lenient_string")]
    relacion_destino: String,
}

impl NotificationRule {
    /// Decode a stored rule document.
    pub fn from_document(document: &Document) -> Result<Self, RuleDecodeError> {
        let raw: RawRule = serde_json::from_value(Value::Object(document.fields.clone()))
            .map_err(|e| RuleDecodeError(format!("undecodable rule document: {e}")))?;

        let schedule = match raw.disparador_evento.as_str() {
            "Campo" => {
                if raw.origen.is_empty() || raw.campo.is_empty() {
                    return Err(RuleDecodeError(
                        "field trigger requires 'origen' and 'campo'".to_string(),
                    ));
                }
                Schedule::Field {
                    collection: raw.origen,
                    field: raw.campo,
                }
            }
            "Fecha" => match Periodicity::from_label(&raw.periodicidad) {
                Some(Periodicity::Annual) => Schedule::Annual {
                    day_month: raw.dia_mes,
                },
                Some(Periodicity::Monthly) => Schedule::Monthly {
                    day_of_month: raw.dia,
                },
                Some(Periodicity::FixedDate) => Schedule::FixedDate { date: raw.fecha1 },
                Some(Periodicity::TwoFixedDates) => Schedule::TwoFixedDates {
                    first: raw.fecha1,
                    second: raw.fecha2,
                },
                None => {
                    return Err(RuleDecodeError(format!(
                        "unknown periodicity '{}'",
                        raw.periodicidad
                    )));
                }
            },
            other => {
                return Err(RuleDecodeError(format!("unknown trigger '{other}'")));
            }
        };

        let recipients = if raw.tipo_destino == INSTITUTIONAL_DESTINATION {
            RecipientSpec::Institutional {
                relation: (raw.tipo_seleccion == RELATION_SELECTION)
                    .then_some(raw.relacion_destino),
            }
        } else {
            RecipientSpec::DistributionList(address_list(&raw.enviar_a))
        };

        let template_id = raw
            .plantilla
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self {
            id: document.id.clone(),
            name: raw.nombre,
            template_id,
            schedule,
            recipients,
        })
    }
}

/// `enviarA` holds either one address or a list of them.
fn address_list(value: &Value) -> Vec<String> {
    let candidates: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    let mut addresses: Vec<String> = Vec::new();
    for address in candidates.into_iter().map(str::trim).filter(|a| !a.is_empty()) {
        if !addresses.iter().any(|a| a == address) {
            addresses.push(address.to_string());
        }
    }
    addresses
}

/// A decoded `template` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: String,
    pub subject: String,
    pub body: String,
}

impl Template {
    /// Decode a stored template. `None` when subject or body is missing or
    /// blank, or when the template was deleted.
    pub fn from_document(document: &Document) -> Option<Self> {
        if document.flag("eliminado") {
            return None;
        }
        let subject = document.get_str("asunto").filter(|s| !s.trim().is_empty())?;
        let body = document.get_str("mensaje").filter(|s| !s.trim().is_empty())?;
        Some(Self {
            id: document.id.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
        })
    }
}

/// Failure categories reported in dispatch results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// No recipients or no sender configured.
    MissingDeliveryConfig,
    /// Rule document could not be decoded.
    InvalidRule,
    /// `plantilla` is not a usable template reference.
    InvalidTemplateReference,
    /// Template not found, deleted, or missing subject/body.
    IncompleteTemplate,
    /// A store read needed by the rule failed.
    StoreUnavailable,
    /// The mail transport failed for at least one recipient.
    TransportFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingDeliveryConfig => "MissingDeliveryConfig",
            ErrorKind::InvalidRule => "InvalidRule",
            ErrorKind::InvalidTemplateReference => "InvalidTemplateReference",
            ErrorKind::IncompleteTemplate => "IncompleteTemplate",
            ErrorKind::StoreUnavailable => "StoreUnavailable",
            ErrorKind::TransportFailure => "TransportFailure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a delivered notification instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients the email was sent to in this run.
    pub recipients: Vec<String>,
    /// Recipients skipped because the ledger shows them already served today.
    pub skipped: Vec<String>,
    pub trigger: Trigger,
    pub template_id: String,
    /// Source record that matched, for field-triggered rules.
    pub record_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered(Delivery),
    Failed { kind: ErrorKind, detail: String },
}

/// One entry of a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub rule_id: String,
    pub outcome: Outcome,
}

impl DispatchResult {
    pub fn delivered(rule_id: &str, delivery: Delivery) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            outcome: Outcome::Delivered(delivery),
        }
    }

    pub fn failed(rule_id: &str, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            outcome: Outcome::Failed {
                kind,
                detail: detail.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Delivered(_))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Failed { kind, .. } => Some(*kind),
            Outcome::Delivered(_) => None,
        }
    }
}

impl Serialize for DispatchResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("rule_id", &self.rule_id)?;
        match &self.outcome {
            Outcome::Delivered(delivery) => {
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("recipients", &delivery.recipients)?;
                if !delivery.skipped.is_empty() {
                    map.serialize_entry("skipped", &delivery.skipped)?;
                }
                map.serialize_entry("trigger", &delivery.trigger)?;
                map.serialize_entry("template_id", &delivery.template_id)?;
                if let Some(record_id) = &delivery.record_id {
                    map.serialize_entry("record_id", record_id)?;
                }
            }
            Outcome::Failed { kind, detail } => {
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("error_kind", kind)?;
                map.serialize_entry("detail", detail)?;
            }
        }
        map.end()
    }
}

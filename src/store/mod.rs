//! Read access to the document database holding rules, templates and
//! source records.
//!
//! The engine never writes rules or templates. Everything goes through the
//! [`RecordStore`] trait so tests can run against [`MemoryStore`] and the
//! binary against [`JsonDirStore`].

mod json_dir;
mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;

pub use json_dir::JsonDirStore;
pub use memory::MemoryStore;

/// Rule definitions.
pub const RULES_COLLECTION: &str = "notificaciones";
/// Message templates.
pub const TEMPLATES_COLLECTION: &str = "template";
/// Employee records.
pub const PERSONNEL_COLLECTION: &str = "personal";
/// Singleton settings documents.
pub const SETTINGS_COLLECTION: &str = "configuraciones";
/// Settings document holding the sender address.
pub const SENDER_DOCUMENT: &str = "MailEnvio";

/// A stored document: its id plus an arbitrary field bag.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build from a JSON value, `None` when it is not an object.
    pub fn from_value(id: impl Into<String>, value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self::new(id, fields)),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of a field, `None` when absent or not a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Boolean flag, absent or non-boolean reads as `false`.
    pub fn flag(&self, field: &str) -> bool {
        self.fields
            .get(field)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whole document as a JSON object with `id` included.
    pub fn to_value(&self) -> Value {
        let mut fields = self.fields.clone();
        fields
            .entry("id".to_string())
            .or_insert_with(|| Value::String(self.id.clone()));
        Value::Object(fields)
    }
}

/// Equality filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        document.get(&self.field) == Some(&self.value)
    }
}

/// Filters every eligible source record must pass: `estado == true`,
/// `eliminado == false`.
pub fn active_filters() -> Vec<Filter> {
    vec![Filter::eq("estado", true), Filter::eq("eliminado", false)]
}

/// Read-only document store.
///
/// Reads are idempotent and side-effect free, so implementations can be
/// shared freely between concurrently processed rules.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All documents of `collection` matching every filter.
    async fn query(&self, collection: &str, filters: &[Filter])
    -> Result<Vec<Document>, StoreError>;

    /// One document by id.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value("doc-1", value).unwrap()
    }

    #[test]
    fn filter_matches_exact_value_only() {
        let document = doc(json!({"estado": true, "eliminado": false}));
        assert!(Filter::eq("estado", true).matches(&document));
        assert!(Filter::eq("eliminado", false).matches(&document));
        assert!(!Filter::eq("estado", false).matches(&document));
        assert!(!Filter::eq("missing", true).matches(&document));
    }

    #[test]
    fn filter_does_not_coerce_types() {
        let document = doc(json!({"estado": "true"}));
        assert!(!Filter::eq("estado", true).matches(&document));
    }

    #[test]
    fn document_accessors() {
        let document = doc(json!({"nombre": "Ana", "estado": true, "edad": 30}));
        assert_eq!(document.get_str("nombre"), Some("Ana"));
        assert_eq!(document.get_str("edad"), None);
        assert!(document.flag("estado"));
        assert!(!document.flag("eliminado"));
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(Document::from_value("x", json!([1, 2])).is_none());
        assert!(Document::from_value("x", json!("text")).is_none());
    }

    #[test]
    fn to_value_includes_id_without_overwriting() {
        let document = doc(json!({"nombre": "Ana"}));
        assert_eq!(document.to_value(), json!({"nombre": "Ana", "id": "doc-1"}));

        let document = doc(json!({"id": "legacy"}));
        assert_eq!(document.to_value(), json!({"id": "legacy"}));
    }
}

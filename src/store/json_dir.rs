//! Record store backed by a directory of JSON exports.
//!
//! Each collection is one file, `<dir>/<collection>.json`, holding either an
//! object keyed by document id or an array of objects carrying an `id`
//! field. Files are read on every call, so an export refreshed between runs
//! (or during one) is picked up without restarting anything.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use super::{Document, Filter, RecordStore};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{collection}.json"))
    }

    async fn load(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let path = self.collection_path(collection);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    collection = %collection,
                    path = %path.display(),
                    "Collection file missing, treating as empty"
                );
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(StoreError::Unavailable {
                    collection: collection.to_string(),
                    message: format!("{}: {}", path.display(), e),
                });
            }
        };

        let value: Value =
            serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
                collection: collection.to_string(),
                message: e.to_string(),
            })?;

        parse_collection(collection, value)
    }
}

/// Decode a collection export into documents sorted by id.
fn parse_collection(collection: &str, value: Value) -> Result<Vec<Document>, StoreError> {
    let malformed = |message: String| StoreError::Malformed {
        collection: collection.to_string(),
        message,
    };

    let mut documents = match value {
        Value::Object(by_id) => by_id
            .into_iter()
            .map(|(id, fields)| {
                Document::from_value(id.clone(), fields)
                    .ok_or_else(|| malformed(format!("document '{id}' is not an object")))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| malformed(format!("entry {index} has no string 'id'")))?;
                Document::from_value(id, item)
                    .ok_or_else(|| malformed(format!("entry {index} is not an object")))
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(malformed(
                "expected an object keyed by id or an array of documents".to_string(),
            ));
        }
    };

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(documents)
}

#[async_trait]
impl RecordStore for JsonDirStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<Document>, StoreError> {
        let documents = self.load(collection).await?;
        Ok(documents
            .into_iter()
            .filter(|d| filters.iter().all(|f| f.matches(d)))
            .collect())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let documents = self.load(collection).await?;
        Ok(documents.into_iter().find(|d| d.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::active_filters;
    use serde_json::json;

    fn write(dir: &Path, collection: &str, value: Value) {
        std::fs::write(
            dir.join(format!("{collection}.json")),
            serde_json::to_string_pretty(&value).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn reads_object_keyed_by_id() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "personal",
            json!({
                "b": {"nombre": "Bruno", "estado": true, "eliminado": false},
                "a": {"nombre": "Ana", "estado": true, "eliminado": false},
                "c": {"nombre": "Carla", "estado": false, "eliminado": false}
            }),
        );

        let store = JsonDirStore::new(dir.path());
        let docs = store.query("personal", &active_filters()).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reads_array_with_id_fields() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "template",
            json!([
                {"id": "t1", "asunto": "Feliz cumple", "mensaje": "<p>Hola</p>"}
            ]),
        );

        let store = JsonDirStore::new(dir.path());
        let doc = store.get("template", "t1").await.unwrap().unwrap();
        assert_eq!(doc.get_str("asunto"), Some("Feliz cumple"));
        assert!(store.get("template", "t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_file_is_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirStore::new(dir.path());
        assert!(store.query("feriados", &[]).await.unwrap().is_empty());
        assert!(store.get("feriados", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_json_is_malformed_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("personal.json"), "{ not json").unwrap();
        let store = JsonDirStore::new(dir.path());
        assert!(matches!(
            store.query("personal", &[]).await,
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn array_entry_without_id_is_rejected() {
        let result = parse_collection("personal", json!([{"nombre": "Ana"}]));
        match result {
            Err(StoreError::Malformed { message, .. }) => assert!(message.contains("entry 0")),
            other => panic!("Expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn scalar_collection_is_rejected() {
        assert!(parse_collection("personal", json!(42)).is_err());
    }
}

//! In-memory record store.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;

use super::{Document, Filter, RecordStore};
use crate::error::StoreError;

/// Record store backed by in-process maps.
///
/// Documents are kept per collection in id order, so query results are
/// deterministic. Collections can be marked unavailable to exercise
/// store-failure paths.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    collections: BTreeMap<String, BTreeMap<String, Document>>,
    unavailable: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a document. Non-object values are ignored.
    pub fn insert(&mut self, collection: &str, id: &str, value: Value) {
        if let Some(document) = Document::from_value(id, value) {
            self.collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), document);
        }
    }

    /// Builder-style [`MemoryStore::insert`].
    pub fn with_document(mut self, collection: &str, id: &str, value: Value) -> Self {
        self.insert(collection, id, value);
        self
    }

    /// Make every read of `collection` fail.
    pub fn with_unavailable(mut self, collection: &str) -> Self {
        self.unavailable.insert(collection.to_string());
        self
    }

    fn check_available(&self, collection: &str) -> Result<(), StoreError> {
        if self.unavailable.contains(collection) {
            return Err(StoreError::Unavailable {
                collection: collection.to_string(),
                message: "collection marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<Document>, StoreError> {
        self.check_available(collection)?;
        Ok(self
            .collections
            .get(collection)
            .map(|documents| {
                documents
                    .values()
                    .filter(|d| filters.iter().all(|f| f.matches(d)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_available(collection)?;
        Ok(self
            .collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }
}

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Record fields, keyed by field name
pub type Fields = Map<String, Value>;

/// A stored record and the identifier the store assigned to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Document {
    /// The record as one JSON object with `id` merged in
    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        fields.insert("id".to_string(), Value::String(self.id));
        Value::Object(fields)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document store request failed: {0}")]
    Backend(String),
    #[error("stored document is malformed: {0}")]
    Malformed(String),
}

/// Collections of schemaless records keyed by generated identifiers
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert a new record under a freshly generated id
    async fn add(&self, collection: &str, fields: Fields) -> Result<Document, StoreError>;

    /// Overwrite the given fields of an existing record, leaving the others
    /// as they are. `None` when there is no such record.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<Option<Document>, StoreError>;

    /// `false` when there was nothing to delete
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Up to `limit` records ordered by `order_by`, newest first. Records
    /// without the field are left out.
    async fn recent(
        &self,
        collection: &str,
        order_by: &str,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;
}

pub(crate) fn new_document_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Callers may echo the id back inside the payload; it is never a field
pub(crate) fn strip_id(mut fields: Fields) -> Fields {
    fields.remove("id");
    fields
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Sort by `order_by` descending and keep the first `limit` entries
pub(crate) fn newest_first(documents: Vec<Document>, order_by: &str, limit: usize) -> Vec<Document> {
    let mut documents: Vec<Document> = documents
        .into_iter()
        .filter(|doc| doc.fields.get(order_by).is_some_and(|v| !v.is_null()))
        .collect();

    documents.sort_by(|a, b| {
        match (a.fields.get(order_by), b.fields.get(order_by)) {
            (Some(a), Some(b)) => compare_values(b, a),
            _ => Ordering::Equal,
        }
    });
    documents.truncate(limit);
    documents
}

/// Process-local store with the same semantics as the DynamoDB one
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Fields>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collections<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, BTreeMap<String, Fields>>) -> T,
    ) -> Result<T, StoreError> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        Ok(f(&mut collections))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.with_collections(|collections| {
            collections
                .get(collection)
                .map(|docs| {
                    docs.iter()
                        .map(|(id, fields)| Document {
                            id: id.clone(),
                            fields: fields.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.with_collections(|collections| {
            collections
                .get(collection)
                .and_then(|docs| docs.get(id))
                .map(|fields| Document {
                    id: id.to_string(),
                    fields: fields.clone(),
                })
        })
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<Document, StoreError> {
        let fields = strip_id(fields);
        let id = new_document_id();
        self.with_collections(|collections| {
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.clone(), fields.clone());
        })?;
        Ok(Document { id, fields })
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<Option<Document>, StoreError> {
        let fields = strip_id(fields);
        self.with_collections(|collections| {
            let existing = collections.get_mut(collection)?.get_mut(id)?;
            for (name, value) in fields {
                existing.insert(name, value);
            }
            Some(Document {
                id: id.to_string(),
                fields: existing.clone(),
            })
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.with_collections(|collections| {
            collections
                .get_mut(collection)
                .and_then(|docs| docs.remove(id))
                .is_some()
        })
    }

    async fn recent(
        &self,
        collection: &str,
        order_by: &str,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let documents = self.list(collection).await?;
        Ok(newest_first(documents, order_by, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_add_get_list() {
        let store = MemoryDocumentStore::new();

        let doc = store
            .add("products", fields(json!({"id": "ignored", "name": "Sofa"})))
            .await
            .unwrap();
        assert_ne!(doc.id, "ignored");
        assert!(!doc.fields.contains_key("id"));

        let fetched = store.get("products", &doc.id).await.unwrap().unwrap();
        assert_eq!(fetched, doc);

        assert_eq!(store.list("products").await.unwrap().len(), 1);
        assert!(store.list("orders").await.unwrap().is_empty());
        assert!(store.get("products", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryDocumentStore::new();
        let doc = store
            .add("products", fields(json!({"name": "Sofa", "featured": false})))
            .await
            .unwrap();

        let updated = store
            .update("products", &doc.id, fields(json!({"featured": true})))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.fields["name"], "Sofa");
        assert_eq!(updated.fields["featured"], true);

        let missing = store
            .update("products", "nope", fields(json!({"featured": true})))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryDocumentStore::new();
        let doc = store.add("gallery", Fields::new()).await.unwrap();

        assert!(store.delete("gallery", &doc.id).await.unwrap());
        assert!(!store.delete("gallery", &doc.id).await.unwrap());
        assert!(!store.delete("unknown", "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_orders_newest_first() {
        let store = MemoryDocumentStore::new();
        for (n, created) in ["2025-01-03", "2025-01-01", "2025-01-05", "2025-01-02"]
            .iter()
            .enumerate()
        {
            store
                .add("orders", fields(json!({"n": n, "createdAt": created})))
                .await
                .unwrap();
        }
        store
            .add("orders", fields(json!({"n": 99})))
            .await
            .unwrap();

        let recent = store.recent("orders", "createdAt", 3).await.unwrap();
        let dates: Vec<&str> = recent
            .iter()
            .map(|d| d.fields["createdAt"].as_str().unwrap())
            .collect();

        assert_eq!(dates, vec!["2025-01-05", "2025-01-03", "2025-01-02"]);
    }

    #[test]
    fn test_newest_first_numeric_field() {
        let docs = vec![
            Document { id: "a".into(), fields: fields(json!({"ts": 5})) },
            Document { id: "b".into(), fields: fields(json!({"ts": 12.5})) },
            Document { id: "c".into(), fields: fields(json!({"ts": null})) },
        ];

        let ids: Vec<String> = newest_first(docs, "ts", 10)
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_into_value_merges_id() {
        let doc = Document {
            id: "42".into(),
            fields: fields(json!({"name": "Chair"})),
        };
        assert_eq!(doc.into_value(), json!({"id": "42", "name": "Chair"}));
    }
}

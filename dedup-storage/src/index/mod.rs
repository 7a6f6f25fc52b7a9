mod fjall_index;
mod query;

pub use fjall_index::FjallIndex;
pub use query::Query;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::BackendError;

/// A document returned by a search, with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub source: Value,
}

/// Searchable document store keyed by arbitrary string ids.
#[async_trait]
pub trait ContentIndex: Send + Sync {
    /// Creates the index if it is missing. Existing indexes are left untouched.
    async fn create_index(&self, name: &str, mapping: Value) -> Result<(), BackendError>;

    /// Stores `doc` under `id`, replacing any previous document.
    async fn index_document(&self, name: &str, id: &str, doc: Value) -> Result<(), BackendError>;

    async fn get_document(&self, name: &str, id: &str) -> Result<Option<Value>, BackendError>;

    /// Merges the top-level fields of `partial` into an existing document.
    async fn update_document(
        &self,
        name: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<(), BackendError>;

    /// Removes a document. Removing a missing document is not an error.
    async fn delete_document(&self, name: &str, id: &str) -> Result<(), BackendError>;

    /// Returns every matching document, ordered by id. No paging is applied.
    async fn search(&self, name: &str, query: &Query) -> Result<Vec<Hit>, BackendError>;

    /// Adds `deltas` to numeric fields and overwrites the fields in `set`,
    /// creating the document when it is missing. Returns the new document.
    ///
    /// The default is a plain read-modify-write and races with concurrent
    /// callers; backends that can do better override it.
    async fn increment(
        &self,
        name: &str,
        id: &str,
        deltas: &[(&str, i64)],
        set: Map<String, Value>,
    ) -> Result<Value, BackendError> {
        let current = self
            .get_document(name, id)
            .await?
            .unwrap_or_else(|| Value::Object(Map::new()));
        let updated = apply_increment(current, deltas, set);
        self.index_document(name, id, updated.clone()).await?;
        Ok(updated)
    }
}

pub(crate) fn apply_increment(
    mut doc: Value,
    deltas: &[(&str, i64)],
    set: Map<String, Value>,
) -> Value {
    if !doc.is_object() {
        doc = Value::Object(Map::new());
    }
    if let Value::Object(fields) = &mut doc {
        for (field, delta) in deltas {
            let current = fields.get(*field).and_then(Value::as_i64).unwrap_or(0);
            fields.insert((*field).to_string(), Value::from(current + delta));
        }
        fields.extend(set);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn increment_adds_and_sets() {
        let doc = json!({"total_size": 10, "file_count": 1, "bucket_name": "b"});
        let mut set = Map::new();
        set.insert("last_activity_date".into(), json!(5));
        let out = apply_increment(doc, &[("total_size", -4), ("upload_count", 1)], set);
        assert_eq!(
            out,
            json!({
                "total_size": 6,
                "file_count": 1,
                "upload_count": 1,
                "bucket_name": "b",
                "last_activity_date": 5
            })
        );
    }
}

use std::path::Path;

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::{apply_increment, ContentIndex, Hit, Query};
use crate::backends::check_partition_name;
use crate::error::BackendError;

const MAPPINGS_PARTITION: &str = "_mappings";

/// Content index storing JSON documents in one fjall partition per index.
///
/// Searches scan the whole partition, which keeps the "all matches, in id
/// order" contract trivially true.
pub struct FjallIndex {
    keyspace: Keyspace,
    mappings: PartitionHandle,
    /// Serializes read-modify-write updates.
    write_lock: Mutex<()>,
}

impl FjallIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let keyspace = Config::new(path).open()?;
        let mappings =
            keyspace.open_partition(MAPPINGS_PARTITION, PartitionCreateOptions::default())?;
        Ok(Self {
            keyspace,
            mappings,
            write_lock: Mutex::new(()),
        })
    }

    fn index(&self, name: &str) -> Result<PartitionHandle, BackendError> {
        check_partition_name(name)?;
        if !self.mappings.contains_key(name)? {
            return Err(BackendError::NoSuchIndex(name.to_string()));
        }
        Ok(self
            .keyspace
            .open_partition(name, PartitionCreateOptions::default())?)
    }

    fn read(partition: &PartitionHandle, id: &str) -> Result<Option<Value>, BackendError> {
        match partition.get(id)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn write(partition: &PartitionHandle, id: &str, doc: &Value) -> Result<(), BackendError> {
        partition.insert(id, serde_json::to_vec(doc)?)?;
        Ok(())
    }

    /// Number of documents in an index.
    pub fn num_docs(&self, name: &str) -> Result<usize, BackendError> {
        Ok(self.index(name)?.len()?)
    }

    pub fn disk_space(&self) -> u64 {
        self.keyspace.disk_space()
    }

    pub fn persist(&self) -> Result<(), BackendError> {
        Ok(self.keyspace.persist(PersistMode::SyncAll)?)
    }
}

#[async_trait]
impl ContentIndex for FjallIndex {
    async fn create_index(&self, name: &str, mapping: Value) -> Result<(), BackendError> {
        check_partition_name(name)?;
        if self.mappings.contains_key(name)? {
            debug!(index = name, "index already exists");
            return Ok(());
        }
        self.keyspace
            .open_partition(name, PartitionCreateOptions::default())?;
        self.mappings.insert(name, serde_json::to_vec(&mapping)?)?;
        debug!(index = name, "created index");
        Ok(())
    }

    async fn index_document(&self, name: &str, id: &str, doc: Value) -> Result<(), BackendError> {
        let partition = self.index(name)?;
        let _guard = self.write_lock.lock().await;
        Self::write(&partition, id, &doc)
    }

    async fn get_document(&self, name: &str, id: &str) -> Result<Option<Value>, BackendError> {
        let partition = self.index(name)?;
        Self::read(&partition, id)
    }

    async fn update_document(
        &self,
        name: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<(), BackendError> {
        let partition = self.index(name)?;
        let _guard = self.write_lock.lock().await;
        let mut doc = Self::read(&partition, id)?.ok_or_else(|| BackendError::DocumentMissing {
            index: name.to_string(),
            id: id.to_string(),
        })?;
        match doc.as_object_mut() {
            Some(fields) => fields.extend(partial),
            None => doc = Value::Object(partial),
        }
        Self::write(&partition, id, &doc)
    }

    async fn delete_document(&self, name: &str, id: &str) -> Result<(), BackendError> {
        let partition = self.index(name)?;
        let _guard = self.write_lock.lock().await;
        partition.remove(id)?;
        Ok(())
    }

    async fn search(&self, name: &str, query: &Query) -> Result<Vec<Hit>, BackendError> {
        let partition = self.index(name)?;
        let mut hits = Vec::new();
        for item in partition.iter() {
            let (key, value) = item?;
            let source: Value = serde_json::from_slice(&value)?;
            if query.matches(&source) {
                hits.push(Hit {
                    id: String::from_utf8_lossy(&key).into_owned(),
                    source,
                });
            }
        }
        Ok(hits)
    }

    async fn increment(
        &self,
        name: &str,
        id: &str,
        deltas: &[(&str, i64)],
        set: Map<String, Value>,
    ) -> Result<Value, BackendError> {
        let partition = self.index(name)?;
        let _guard = self.write_lock.lock().await;
        let current = Self::read(&partition, id)?.unwrap_or_else(|| Value::Object(Map::new()));
        let updated = apply_increment(current, deltas, set);
        Self::write(&partition, id, &updated)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use serde_json::json;

    fn open_index() -> (FjallIndex, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let index = FjallIndex::open(dir.path().join("index")).unwrap();
        (index, dir)
    }

    #[tokio::test]
    async fn documents_round_trip() {
        let (index, _dir) = open_index();
        index.create_index("docs", json!({})).await.unwrap();
        index.create_index("docs", json!({})).await.unwrap();

        index
            .index_document("docs", "a", json!({"n": 1, "s": "x"}))
            .await
            .unwrap();
        let mut partial = Map::new();
        partial.insert("n".into(), json!(2));
        index.update_document("docs", "a", partial).await.unwrap();
        assert_eq!(
            index.get_document("docs", "a").await.unwrap(),
            Some(json!({"n": 2, "s": "x"}))
        );

        index.delete_document("docs", "a").await.unwrap();
        index.delete_document("docs", "a").await.unwrap();
        assert_eq!(index.get_document("docs", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let (index, _dir) = open_index();
        index.create_index("docs", json!({})).await.unwrap();
        let res = index.update_document("docs", "nope", Map::new()).await;
        assert!(matches!(res, Err(BackendError::DocumentMissing { .. })));
    }

    #[tokio::test]
    async fn unknown_index_is_an_error() {
        let (index, _dir) = open_index();
        let res = index.get_document("nope", "a").await;
        assert!(matches!(res, Err(BackendError::NoSuchIndex(_))));
    }

    #[tokio::test]
    async fn invalid_index_name_is_an_error() {
        let (index, _dir) = open_index();
        let res = index.create_index("file hashes", json!({})).await;
        assert!(matches!(res, Err(BackendError::InvalidName(_))));
        let res = index.create_index(&"x".repeat(256), json!({})).await;
        assert!(matches!(res, Err(BackendError::InvalidName(_))));
        let res = index.search("", &Query::MatchAll).await;
        assert!(matches!(res, Err(BackendError::InvalidName(_))));
    }

    #[tokio::test]
    async fn search_returns_every_match_in_id_order() {
        let (index, _dir) = open_index();
        index.create_index("docs", json!({})).await.unwrap();
        for i in (0..50).rev() {
            let id = format!("id-{i:03}");
            let parity = if i % 2 == 0 { "even" } else { "odd" };
            index
                .index_document("docs", &id, json!({ "hash": parity }))
                .await
                .unwrap();
        }
        let hits = index
            .search("docs", &Query::term("hash", "even"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 25);
        let ids: Vec<_> = hits.iter().map(|h| h.id.clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(index.num_docs("docs").unwrap(), 50);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let (index, _dir) = open_index();
        let index = Arc::new(index);
        index.create_index("usage", json!({})).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                index
                    .increment(
                        "usage",
                        "alice",
                        &[("file_count", 1), ("total_size", 10)],
                        Map::new(),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let doc = index.get_document("usage", "alice").await.unwrap().unwrap();
        assert_eq!(doc["file_count"], json!(20));
        assert_eq!(doc["total_size"], json!(200));
    }
}

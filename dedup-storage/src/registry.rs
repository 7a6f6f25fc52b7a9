//! Hash registry: one [`ContentRecord`] per logical path, kept in the content
//! index, mapping each path to its fingerprint and current canonical holder.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::BackendError;
use crate::hash::ContentHash;
use crate::index::{ContentIndex, Hit, Query};
use crate::keys::{self, ObjectKey};

pub const DEFAULT_CONTENT_INDEX: &str = "file_hashes";

/// Registry document for a logical path. Its id is the path's
/// bucket-qualified key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub hash: ContentHash,
    /// Qualified key of the object physically holding the bytes.
    pub canonical_key: String,
    pub user_id: String,
    pub filename: String,
    pub folder_path: String,
    pub file_type: String,
    /// Epoch millis.
    pub creation_date: i64,
    /// Bytes charged to this path; 0 for links.
    pub size: u64,
}

impl ContentRecord {
    /// Builds the record for `path` in `user_id`'s bucket.
    pub fn new(
        user_id: &str,
        path: &str,
        hash: ContentHash,
        canonical_key: String,
        size: u64,
    ) -> Self {
        let (folder_path, filename) = keys::split_path(path);
        Self {
            hash,
            canonical_key,
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            folder_path: folder_path.to_string(),
            file_type: keys::file_type(filename),
            creation_date: chrono::Utc::now().timestamp_millis(),
            size,
        }
    }

    /// Path of this record inside its owner's bucket.
    pub fn path(&self) -> String {
        if self.folder_path.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.folder_path, self.filename)
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::for_user(&self.user_id, &self.path())
    }

    /// Document id, the bucket-qualified key.
    pub fn id(&self) -> String {
        self.key().to_string()
    }

    /// True when this record holds the bytes itself.
    pub fn is_canonical(&self) -> bool {
        self.canonical_key == self.id()
    }
}

/// Field mapping registered when the index is created.
pub fn content_mapping() -> Value {
    json!({
        "properties": {
            "hash": {"type": "keyword"},
            "canonical_key": {"type": "keyword"},
            "user_id": {"type": "keyword"},
            "filename": {"type": "keyword"},
            "folder_path": {"type": "text"},
            "creation_date": {"type": "date", "format": "epoch_millis"},
            "size": {"type": "long"},
            "file_type": {"type": "keyword"}
        }
    })
}

/// Typed view over the content index for fingerprint lookups.
#[derive(Clone)]
pub struct HashRegistry {
    index: Arc<dyn ContentIndex>,
    name: String,
}

impl HashRegistry {
    pub fn new(index: Arc<dyn ContentIndex>, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }

    pub async fn ensure_index(&self) -> Result<(), BackendError> {
        self.index.create_index(&self.name, content_mapping()).await
    }

    fn decode(hits: Vec<Hit>) -> Result<Vec<ContentRecord>, BackendError> {
        hits.into_iter()
            .map(|hit| Ok(serde_json::from_value(hit.source)?))
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<ContentRecord>, BackendError> {
        match self.index.get_document(&self.name, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, record: &ContentRecord) -> Result<(), BackendError> {
        let doc = serde_json::to_value(record)?;
        self.index.index_document(&self.name, &record.id(), doc).await?;
        debug!(
            id = %record.id(),
            hash = %record.hash,
            canonical = %record.canonical_key,
            "indexed content record"
        );
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.index.delete_document(&self.name, id).await
    }

    /// All records carrying `hash`, ordered by id.
    pub async fn find_by_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Vec<ContentRecord>, BackendError> {
        let hits = self
            .index
            .search(&self.name, &Query::term("hash", hash.to_hex()))
            .await?;
        Self::decode(hits)
    }

    /// Canonical key currently holding `hash`, if the content is stored at all.
    ///
    /// Any record of the group points at the holder, so the first one is
    /// enough.
    pub async fn canonical_for(&self, hash: &ContentHash) -> Result<Option<String>, BackendError> {
        Ok(self
            .find_by_hash(hash)
            .await?
            .into_iter()
            .next()
            .map(|record| record.canonical_key))
    }

    /// All records whose `canonical_key` is `key`, the holder included,
    /// ordered by id.
    pub async fn dependents_of(&self, key: &str) -> Result<Vec<ContentRecord>, BackendError> {
        let hits = self
            .index
            .search(&self.name, &Query::term("canonical_key", key))
            .await?;
        Self::decode(hits)
    }

    /// Points an existing record at a new canonical key.
    pub async fn repoint(&self, id: &str, canonical_key: &str) -> Result<(), BackendError> {
        let mut partial = Map::new();
        partial.insert("canonical_key".into(), Value::from(canonical_key));
        self.index.update_document(&self.name, id, partial).await
    }

    /// Records of `user_id` whose filename, file type or hash contains `term`.
    pub async fn search_user(
        &self,
        user_id: &str,
        term: &str,
    ) -> Result<Vec<ContentRecord>, BackendError> {
        let query = Query::And(vec![
            Query::term("user_id", user_id),
            Query::contains(&["filename", "file_type", "hash"], term),
        ]);
        let hits = self.index.search(&self.name, &query).await?;
        Self::decode(hits)
    }

    /// Every record in the registry, ordered by id.
    pub async fn all(&self) -> Result<Vec<ContentRecord>, BackendError> {
        let hits = self.index.search(&self.name, &Query::MatchAll).await?;
        Self::decode(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FjallIndex;

    async fn registry() -> (HashRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(FjallIndex::open(dir.path().join("index")).unwrap());
        let registry = HashRegistry::new(index, DEFAULT_CONTENT_INDEX);
        registry.ensure_index().await.unwrap();
        (registry, dir)
    }

    #[test]
    fn record_derives_path_fields() {
        let hash = ContentHash::compute(b"x");
        let canonical = "user-alice-bucket/docs/q1/report.pdf".to_string();
        let record = ContentRecord::new("alice", "docs/q1/report.pdf", hash, canonical, 1);
        assert_eq!(record.folder_path, "docs/q1");
        assert_eq!(record.filename, "report.pdf");
        assert_eq!(record.file_type, "pdf");
        assert_eq!(record.path(), "docs/q1/report.pdf");
        assert_eq!(record.id(), "user-alice-bucket/docs/q1/report.pdf");
        assert!(record.is_canonical());

        let top = ContentRecord::new("alice", "notes", hash, "user-bob-bucket/x".into(), 0);
        assert_eq!(top.path(), "notes");
        assert_eq!(top.file_type, "unknown");
        assert!(!top.is_canonical());
    }

    #[tokio::test]
    async fn lookups_by_hash_and_canonical_key() {
        let (registry, _dir) = registry().await;
        let hash = ContentHash::compute(b"shared");
        let holder = "user-a-bucket/one.txt".to_string();

        registry
            .put(&ContentRecord::new("a", "one.txt", hash, holder.clone(), 6))
            .await
            .unwrap();
        registry
            .put(&ContentRecord::new("b", "two.txt", hash, holder.clone(), 0))
            .await
            .unwrap();
        registry
            .put(&ContentRecord::new(
                "b",
                "other.txt",
                ContentHash::compute(b"o"),
                "user-b-bucket/other.txt".into(),
                1,
            ))
            .await
            .unwrap();

        assert_eq!(registry.find_by_hash(&hash).await.unwrap().len(), 2);
        assert_eq!(registry.canonical_for(&hash).await.unwrap(), Some(holder.clone()));
        assert_eq!(
            registry
                .canonical_for(&ContentHash::compute(b"absent"))
                .await
                .unwrap(),
            None
        );

        let deps = registry.dependents_of(&holder).await.unwrap();
        let ids: Vec<_> = deps.iter().map(ContentRecord::id).collect();
        assert_eq!(ids, vec!["user-a-bucket/one.txt", "user-b-bucket/two.txt"]);

        registry
            .repoint("user-b-bucket/two.txt", "user-b-bucket/two.txt")
            .await
            .unwrap();
        let moved = registry.get("user-b-bucket/two.txt").await.unwrap().unwrap();
        assert!(moved.is_canonical());
    }

    #[tokio::test]
    async fn user_search_is_scoped() {
        let (registry, _dir) = registry().await;
        let hash = ContentHash::compute(b"s");
        let holder = "user-a-bucket/Budget.xlsx".to_string();
        registry
            .put(&ContentRecord::new("a", "Budget.xlsx", hash, holder.clone(), 1))
            .await
            .unwrap();
        registry
            .put(&ContentRecord::new("b", "budget.xlsx", hash, holder, 0))
            .await
            .unwrap();

        let hits = registry.search_user("a", "budget").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].user_id, "a");

        let by_type = registry.search_user("b", "XLSX").await.unwrap();
        assert_eq!(by_type.len(), 1);

        let by_hash = registry.search_user("a", &hash.to_hex()[..10]).await.unwrap();
        assert_eq!(by_hash.len(), 1);
    }
}

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::debug;

use super::{roll_up, BlobMetadata, BlobStore, ListedObject, Listing, Presigner, StoredBlob};
use crate::backends::check_partition_name;
use crate::error::BackendError;

const BUCKETS_PARTITION: &str = "_buckets";

/// Object as persisted in a bucket partition.
#[derive(Debug, bincode::Encode, bincode::Decode)]
struct ObjectRecord {
    data: Vec<u8>,
    metadata: Vec<(String, String)>,
    /// Unix seconds of the last write.
    modified: i64,
}

impl ObjectRecord {
    fn to_vec(&self) -> Result<Vec<u8>, BackendError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    fn from_slice(data: &[u8]) -> Result<Self, BackendError> {
        let (record, _len) = bincode::decode_from_slice(data, bincode::config::standard())?;
        Ok(record)
    }
}

/// Blob store keeping one fjall partition per bucket.
///
/// Bucket names are registered in `_buckets` so that a put into a bucket that
/// was never provisioned fails the way it does against a real object store.
pub struct FjallBlobStore {
    keyspace: Keyspace,
    buckets: PartitionHandle,
    presigner: Presigner,
}

impl FjallBlobStore {
    pub fn open(path: impl AsRef<Path>, presigner: Presigner) -> Result<Self, BackendError> {
        let keyspace = Config::new(path).open()?;
        let buckets =
            keyspace.open_partition(BUCKETS_PARTITION, PartitionCreateOptions::default())?;
        Ok(Self {
            keyspace,
            buckets,
            presigner,
        })
    }

    pub fn presigner(&self) -> &Presigner {
        &self.presigner
    }

    fn bucket(&self, bucket: &str) -> Result<PartitionHandle, BackendError> {
        check_partition_name(bucket)?;
        if !self.buckets.contains_key(bucket)? {
            return Err(BackendError::NoSuchBucket(bucket.to_string()));
        }
        Ok(self
            .keyspace
            .open_partition(bucket, PartitionCreateOptions::default())?)
    }

    /// Names of all provisioned buckets.
    pub fn list_buckets(&self) -> Result<Vec<String>, BackendError> {
        let mut names = Vec::new();
        for item in self.buckets.iter() {
            let (key, _) = item?;
            names.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(names)
    }

    /// Number of objects across all buckets.
    pub fn num_keys(&self) -> Result<usize, BackendError> {
        let mut total = 0;
        for bucket in self.list_buckets()? {
            total += self.bucket(&bucket)?.len()?;
        }
        Ok(total)
    }

    pub fn disk_space(&self) -> u64 {
        self.keyspace.disk_space()
    }

    pub fn persist(&self) -> Result<(), BackendError> {
        Ok(self.keyspace.persist(PersistMode::SyncAll)?)
    }
}

#[async_trait]
impl BlobStore for FjallBlobStore {
    async fn create_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        check_partition_name(bucket)?;
        if self.buckets.contains_key(bucket)? {
            return Ok(());
        }
        self.keyspace
            .open_partition(bucket, PartitionCreateOptions::default())?;
        let now = chrono::Utc::now().timestamp();
        self.buckets.insert(bucket, now.to_be_bytes().to_vec())?;
        debug!(bucket, "created bucket");
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        Ok(self.buckets.contains_key(bucket)?)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: BlobMetadata,
    ) -> Result<(), BackendError> {
        let partition = self.bucket(bucket)?;
        let record = ObjectRecord {
            data: data.to_vec(),
            metadata: metadata.into_iter().collect(),
            modified: chrono::Utc::now().timestamp(),
        };
        partition.insert(key, record.to_vec()?)?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredBlob>, BackendError> {
        let partition = self.bucket(bucket)?;
        match partition.get(key)? {
            Some(raw) => {
                let record = ObjectRecord::from_slice(&raw)?;
                Ok(Some(StoredBlob {
                    data: Bytes::from(record.data),
                    metadata: record.metadata.into_iter().collect(),
                }))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        let partition = self.bucket(bucket)?;
        partition.remove(key)?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<char>,
    ) -> Result<Listing, BackendError> {
        let partition = self.bucket(bucket)?;
        let mut entries = Vec::new();
        for item in partition.prefix(prefix) {
            let (key, value) = item?;
            let record = ObjectRecord::from_slice(&value)?;
            entries.push(ListedObject {
                key: String::from_utf8_lossy(&key).into_owned(),
                size: record.data.len() as u64,
            });
        }
        Ok(roll_up(prefix, delimiter, entries))
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, BackendError> {
        self.presigner
            .sign(bucket, key, chrono::Utc::now().timestamp(), ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{PresignConfig, ORIGINAL_KEY};

    fn open_store() -> (FjallBlobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let presigner = Presigner::new(PresignConfig {
            base_url: "http://localhost".into(),
            secret: "test".into(),
        });
        let store = FjallBlobStore::open(dir.path().join("blobs"), presigner).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn put_get_keeps_metadata() {
        let (store, _dir) = open_store();
        store.create_bucket("user-a-bucket").await.unwrap();

        let mut meta = BlobMetadata::new();
        meta.insert(ORIGINAL_KEY.to_string(), "user-b-bucket/x".to_string());
        store
            .put("user-a-bucket", "link", Bytes::new(), meta.clone())
            .await
            .unwrap();

        let blob = store.get("user-a-bucket", "link").await.unwrap().unwrap();
        assert!(blob.data.is_empty());
        assert_eq!(blob.metadata, meta);
        assert_eq!(blob.original_key(), Some("user-b-bucket/x"));
    }

    #[tokio::test]
    async fn put_replaces_metadata() {
        let (store, _dir) = open_store();
        store.create_bucket("user-a-bucket").await.unwrap();

        let mut meta = BlobMetadata::new();
        meta.insert(ORIGINAL_KEY.to_string(), "user-a-bucket/y".to_string());
        store.put("user-a-bucket", "k", Bytes::new(), meta).await.unwrap();
        store
            .put("user-a-bucket", "k", Bytes::from_static(b"data"), BlobMetadata::new())
            .await
            .unwrap();

        let blob = store.get("user-a-bucket", "k").await.unwrap().unwrap();
        assert_eq!(blob.data, Bytes::from_static(b"data"));
        assert_eq!(blob.original_key(), None);
    }

    #[tokio::test]
    async fn unknown_bucket_is_an_error() {
        let (store, _dir) = open_store();
        let res = store
            .put("user-nobody-bucket", "k", Bytes::new(), BlobMetadata::new())
            .await;
        assert!(matches!(res, Err(BackendError::NoSuchBucket(_))));
        assert!(!store.bucket_exists("user-nobody-bucket").await.unwrap());
    }

    #[tokio::test]
    async fn invalid_bucket_name_is_an_error() {
        let (store, _dir) = open_store();
        let long = format!("user-{}-bucket", "u".repeat(300));
        let res = store.create_bucket(&long).await;
        assert!(matches!(res, Err(BackendError::InvalidName(_))));
        let res = store.get("user-a/b-bucket", "k").await;
        assert!(matches!(res, Err(BackendError::InvalidName(_))));
        assert!(store.list_buckets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_key_and_idempotent_delete() {
        let (store, _dir) = open_store();
        store.create_bucket("user-a-bucket").await.unwrap();
        store.create_bucket("user-a-bucket").await.unwrap();
        assert!(store.get("user-a-bucket", "nope").await.unwrap().is_none());
        store.delete("user-a-bucket", "nope").await.unwrap();
        assert_eq!(store.list_buckets().unwrap(), vec!["user-a-bucket".to_string()]);
    }

    #[tokio::test]
    async fn list_with_and_without_delimiter() {
        let (store, _dir) = open_store();
        let bucket = "user-a-bucket";
        store.create_bucket(bucket).await.unwrap();
        for key in ["a/1.txt", "a/b/2.txt", "a/b/3.txt", "c.txt"] {
            store
                .put(bucket, key, Bytes::from_static(b"xy"), BlobMetadata::new())
                .await
                .unwrap();
        }

        let top = store.list(bucket, "", Some('/')).await.unwrap();
        assert_eq!(top.objects.len(), 1);
        assert_eq!(top.objects[0].key, "c.txt");
        assert_eq!(top.common_prefixes, vec!["a/".to_string()]);

        let a = store.list(bucket, "a/", Some('/')).await.unwrap();
        assert_eq!(a.objects[0].key, "a/1.txt");
        assert_eq!(a.objects[0].size, 2);
        assert_eq!(a.common_prefixes, vec!["a/b/".to_string()]);

        let all = store.list(bucket, "a/", None).await.unwrap();
        assert_eq!(all.objects.len(), 3);
        assert_eq!(store.num_keys().unwrap(), 4);
    }

    #[tokio::test]
    async fn presigned_url_points_at_object() {
        let (store, _dir) = open_store();
        let url = store
            .presign("user-a-bucket", "a/1.txt", Duration::from_secs(60))
            .await
            .unwrap();
        let (bucket, key) = store
            .presigner()
            .verify(&url, chrono::Utc::now().timestamp())
            .unwrap();
        assert_eq!(bucket, "user-a-bucket");
        assert_eq!(key, "a/1.txt");
    }
}

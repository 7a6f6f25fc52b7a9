mod fjall_store;
mod presign;

pub use fjall_store::FjallBlobStore;
pub use presign::{PresignConfig, Presigner, DEFAULT_PRESIGN_TTL};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BackendError;

/// Metadata key marking an object as a link to a canonical object.
pub const ORIGINAL_KEY: &str = "original-key";

/// User metadata attached to a stored object.
pub type BlobMetadata = BTreeMap<String, String>;

/// An object fetched from the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Bytes,
    pub metadata: BlobMetadata,
}

impl StoredBlob {
    /// Canonical key this object links to, if it is a link placeholder.
    pub fn original_key(&self) -> Option<&str> {
        self.metadata.get(ORIGINAL_KEY).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
}

/// Result of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Objects directly matched by the listing, in key order.
    pub objects: Vec<ListedObject>,
    /// Rolled up prefixes ending in the delimiter, in key order.
    pub common_prefixes: Vec<String>,
}

/// Per-user bucketed object store.
///
/// Implementations are expected to be reliable for single calls; the dedup
/// layer composes calls without retries.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Creates the bucket if it does not exist yet.
    async fn create_bucket(&self, bucket: &str) -> Result<(), BackendError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError>;

    /// Stores `data` at `key`, replacing any previous object and its metadata.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: BlobMetadata,
    ) -> Result<(), BackendError>;

    /// Fetches an object, `None` if the key does not exist.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredBlob>, BackendError>;

    /// Removes an object. Removing a missing key is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BackendError>;

    /// Lists keys under `prefix`. With a delimiter, keys that contain it after
    /// the prefix are rolled up into `common_prefixes`.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<char>,
    ) -> Result<Listing, BackendError>;

    /// Returns a time-limited download URL for an object.
    async fn presign(&self, bucket: &str, key: &str, ttl: Duration)
        -> Result<String, BackendError>;
}

/// Splits raw sorted keys into direct objects and common prefixes.
pub(crate) fn roll_up(
    prefix: &str,
    delimiter: Option<char>,
    entries: impl IntoIterator<Item = ListedObject>,
) -> Listing {
    let mut listing = Listing::default();
    for entry in entries {
        let rest = &entry.key[prefix.len()..];
        let rolled = delimiter.and_then(|d| rest.find(d).map(|idx| (d, idx)));
        match rolled {
            Some((d, idx)) => {
                let common = format!("{prefix}{}{d}", &rest[..idx]);
                if listing.common_prefixes.last() != Some(&common) {
                    listing.common_prefixes.push(common);
                }
            }
            None => listing.objects.push(entry),
        }
    }
    listing
}

//! Whole-file deduplication over a per-user blob store.
//!
//! Each distinct content hash is physically stored once, at the key of its
//! canonical holder. Every other path with the same content is a link: an
//! empty blob whose `original-key` metadata names the holder, plus a
//! [`ContentRecord`] whose `canonical_key` points at it. Deleting a holder
//! that still has links promotes one of them to hold the bytes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blob::{BlobMetadata, BlobStore, StoredBlob, DEFAULT_PRESIGN_TTL, ORIGINAL_KEY};
use crate::error::{RemoteContext, StoreError};
use crate::hash::ContentHash;
use crate::index::ContentIndex;
use crate::keys::{self, ObjectKey};
use crate::locks::{HashLocks, KeyGuard, PathLocks};
use crate::metrics::SharedMetrics;
use crate::registry::{ContentRecord, HashRegistry, DEFAULT_CONTENT_INDEX};
use crate::usage::{UsageAccountant, UsageDelta, UserUsage, DEFAULT_USAGE_INDEX};

/// Lock entries are pruned once the table grows past this many hashes.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone)]
pub struct DedupOptions {
    pub content_index: String,
    pub usage_index: String,
    /// Lifetime of download URLs handed out by reads.
    pub presign_ttl: Duration,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            content_index: DEFAULT_CONTENT_INDEX.to_string(),
            usage_index: DEFAULT_USAGE_INDEX.to_string(),
            presign_ttl: DEFAULT_PRESIGN_TTL,
        }
    }
}

/// Size column of a file or listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySize {
    Bytes(u64),
    /// Zero-length placeholder resolving to another object.
    Linked,
    /// Folders have no size.
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Folder,
}

/// A resolved file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Logical name of the requested path.
    pub name: String,
    pub path: String,
    pub size: EntrySize,
    /// Download URL of the object physically holding the bytes.
    pub download_url: String,
    pub canonical_key: String,
}

/// One immediate child in a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: EntrySize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadOutcome {
    File(FileEntry),
    Folder {
        path: String,
        entries: Vec<FolderEntry>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CreateOutcome {
    /// New content, stored at the path itself.
    Stored { key: String, size: u64 },
    /// Known content, the path links to the existing holder.
    Linked { key: String, canonical_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Link,
    Canonical {
        /// Key of the link promoted to hold the bytes, if any was left.
        promoted: Option<String>,
        repointed: usize,
        size: u64,
    },
    Folder {
        files: usize,
        placeholders: usize,
    },
}

pub struct Deduplicator {
    blobs: Arc<dyn BlobStore>,
    registry: HashRegistry,
    usage: UsageAccountant,
    locks: HashLocks,
    paths: PathLocks,
    metrics: SharedMetrics,
    presign_ttl: Duration,
}

impl Deduplicator {
    /// Wires the deduplicator to its stores and creates the registry and usage
    /// indexes if they are missing.
    pub async fn open(
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn ContentIndex>,
        options: DedupOptions,
    ) -> Result<Self, StoreError> {
        let registry = HashRegistry::new(index.clone(), options.content_index);
        let usage = UsageAccountant::new(index, options.usage_index);
        registry
            .ensure_index()
            .await
            .remote("create content index", "-", "")?;
        usage
            .ensure_index()
            .await
            .remote("create usage index", "-", "")?;
        Ok(Self {
            blobs,
            registry,
            usage,
            locks: HashLocks::new(),
            paths: PathLocks::new(),
            metrics: SharedMetrics::default(),
            presign_ttl: options.presign_ttl,
        })
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &HashRegistry {
        &self.registry
    }

    pub fn accountant(&self) -> &UsageAccountant {
        &self.usage
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Creates the user's bucket and zeroed usage counters. Safe to repeat.
    pub async fn provision_user(&self, user: &str) -> Result<UserUsage, StoreError> {
        keys::validate_user_id(user)?;
        let bucket = keys::bucket_name(user);
        let exists = self
            .blobs
            .bucket_exists(&bucket)
            .await
            .remote("check bucket", user, "")?;
        if exists {
            debug!(user, bucket = %bucket, "bucket already provisioned");
        } else {
            self.blobs
                .create_bucket(&bucket)
                .await
                .remote("create bucket", user, "")?;
        }
        let usage = self
            .usage
            .provision(user)
            .await
            .remote("create usage record", user, "")?;
        info!(target: "audit", user, "provisioned user");
        Ok(usage)
    }

    pub async fn usage(&self, user: &str) -> Result<Option<UserUsage>, StoreError> {
        self.usage.get(user).await.remote("read usage", user, "")
    }

    async fn lock(&self, hash: ContentHash) -> KeyGuard<ContentHash> {
        if self.locks.len() > LOCK_PRUNE_THRESHOLD {
            self.locks.prune();
        }
        self.locks.lock(hash).await
    }

    /// Path locks are always taken before hash locks.
    async fn lock_path(&self, key: &str) -> KeyGuard<String> {
        if self.paths.len() > LOCK_PRUNE_THRESHOLD {
            self.paths.prune();
        }
        self.paths.lock(key.to_string()).await
    }

    /// Stores `content` at `path`, as a new canonical object or as a link to
    /// the existing holder of identical content.
    pub async fn create(
        &self,
        user: &str,
        path: &str,
        content: Bytes,
    ) -> Result<CreateOutcome, StoreError> {
        keys::validate_user_id(user)?;
        keys::validate_file_path(path)?;
        let bucket = keys::bucket_name(user);
        let own_key = ObjectKey::for_user(user, path).to_string();

        let hash = ContentHash::compute(&content);
        let _path_guard = self.lock_path(&own_key).await;
        let _guard = self.lock(hash).await;

        if self
            .blobs
            .get(&bucket, path)
            .await
            .remote("check existing object", user, path)?
            .is_some()
        {
            return Err(StoreError::Validation(format!(
                "object '{path}' already exists for user {user}"
            )));
        }

        let existing = self
            .registry
            .canonical_for(&hash)
            .await
            .remote("look up fingerprint", user, path)?;

        match existing {
            Some(canonical_key) if canonical_key != own_key => {
                let mut metadata = BlobMetadata::new();
                metadata.insert(ORIGINAL_KEY.to_string(), canonical_key.clone());
                self.blobs
                    .put(&bucket, path, Bytes::new(), metadata)
                    .await
                    .remote("write link placeholder", user, path)?;
                let record = ContentRecord::new(user, path, hash, canonical_key.clone(), 0);
                self.registry
                    .put(&record)
                    .await
                    .remote("index link record", user, path)?;
                self.usage
                    .apply(user, UsageDelta::upload(0))
                    .await
                    .remote("update usage", user, path)?;

                self.metrics.link_created();
                info!(
                    target: "audit",
                    user,
                    path,
                    canonical = %canonical_key,
                    "linked to existing object"
                );
                Ok(CreateOutcome::Linked {
                    key: own_key,
                    canonical_key,
                })
            }
            _ => {
                let size = content.len() as u64;
                self.blobs
                    .put(&bucket, path, content, BlobMetadata::new())
                    .await
                    .remote("write canonical object", user, path)?;
                let record = ContentRecord::new(user, path, hash, own_key.clone(), size);
                self.registry
                    .put(&record)
                    .await
                    .remote("index canonical record", user, path)?;
                self.usage
                    .apply(user, UsageDelta::upload(size))
                    .await
                    .remote("update usage", user, path)?;

                self.metrics.canonical_stored();
                self.metrics.bytes_stored(size);
                info!(target: "audit", user, path, size, "stored new object");
                Ok(CreateOutcome::Stored { key: own_key, size })
            }
        }
    }

    /// Creates an empty folder marker at `path/`.
    pub async fn create_folder(&self, user: &str, path: &str) -> Result<(), StoreError> {
        keys::validate_user_id(user)?;
        let folder = keys::normalize_folder_path(path)?;
        if folder.is_empty() {
            return Err(StoreError::Validation("the root folder always exists".into()));
        }
        let marker = keys::folder_prefix(&folder);
        self.blobs
            .put(&keys::bucket_name(user), &marker, Bytes::new(), BlobMetadata::new())
            .await
            .remote("write folder marker", user, &marker)?;
        info!(target: "audit", user, folder = %folder, "created folder");
        Ok(())
    }

    /// Resolves `path` to a download reference, or lists it as a folder when
    /// no object lives at that key.
    pub async fn read(&self, user: &str, path: &str) -> Result<ReadOutcome, StoreError> {
        keys::validate_user_id(user)?;
        if path.is_empty() || path.ends_with('/') {
            let folder = keys::normalize_folder_path(path)?;
            return self.list_folder(user, &folder).await;
        }
        keys::validate_file_path(path)?;
        let bucket = keys::bucket_name(user);

        let blob = self
            .blobs
            .get(&bucket, path)
            .await
            .remote("read object", user, path)?;
        let Some(blob) = blob else {
            return self.list_folder(user, path).await;
        };

        let (_, name) = keys::split_path(path);
        let entry = match blob.original_key() {
            Some(original) => {
                let target: ObjectKey = original.parse()?;
                target.user_id()?;
                let download_url = self
                    .blobs
                    .presign(&target.bucket, &target.path, self.presign_ttl)
                    .await
                    .remote("presign canonical object", user, path)?;
                debug!(user, path, canonical = original, "resolved link");
                FileEntry {
                    name: name.to_string(),
                    path: path.to_string(),
                    size: EntrySize::Linked,
                    download_url,
                    canonical_key: original.to_string(),
                }
            }
            None => {
                let download_url = self
                    .blobs
                    .presign(&bucket, path, self.presign_ttl)
                    .await
                    .remote("presign object", user, path)?;
                FileEntry {
                    name: name.to_string(),
                    path: path.to_string(),
                    size: EntrySize::Bytes(blob.data.len() as u64),
                    download_url,
                    canonical_key: ObjectKey::for_user(user, path).to_string(),
                }
            }
        };
        Ok(ReadOutcome::File(entry))
    }

    async fn list_folder(&self, user: &str, folder: &str) -> Result<ReadOutcome, StoreError> {
        let prefix = keys::folder_prefix(folder);
        let listing = self
            .blobs
            .list(&keys::bucket_name(user), &prefix, Some('/'))
            .await
            .remote("list folder", user, folder)?;

        let mut has_marker = false;
        let mut entries = Vec::new();
        for object in &listing.objects {
            if object.key == prefix {
                has_marker = true;
                continue;
            }
            entries.push(FolderEntry {
                name: object.key[prefix.len()..].to_string(),
                kind: EntryKind::File,
                size: if object.size > 0 {
                    EntrySize::Bytes(object.size)
                } else {
                    EntrySize::Linked
                },
            });
        }
        for common in &listing.common_prefixes {
            entries.push(FolderEntry {
                name: common[prefix.len()..].trim_end_matches('/').to_string(),
                kind: EntryKind::Folder,
                size: EntrySize::NotApplicable,
            });
        }

        if entries.is_empty() && !has_marker && !folder.is_empty() {
            return Err(StoreError::not_found(user, folder));
        }
        debug!(user, folder, entries = entries.len(), "listed folder");
        Ok(ReadOutcome::Folder {
            path: folder.to_string(),
            entries,
        })
    }

    /// Returns the bytes behind `path`, following a link to its holder.
    pub async fn fetch(&self, user: &str, path: &str) -> Result<Bytes, StoreError> {
        keys::validate_user_id(user)?;
        keys::validate_file_path(path)?;
        let blob = self
            .blobs
            .get(&keys::bucket_name(user), path)
            .await
            .remote("read object", user, path)?
            .ok_or_else(|| StoreError::not_found(user, path))?;

        let Some(original) = blob.original_key() else {
            return Ok(blob.data);
        };
        let target: ObjectKey = original.parse()?;
        let canonical = self
            .blobs
            .get(&target.bucket, &target.path)
            .await
            .remote("read canonical object", user, path)?;
        match canonical {
            Some(canonical) if canonical.original_key().is_none() => Ok(canonical.data),
            _ => Err(StoreError::InvariantViolation(format!(
                "link {user}/{path} points at {original}, which does not hold the content"
            ))),
        }
    }

    /// Removes a file, or a folder with everything below it.
    pub async fn delete(&self, user: &str, path: &str) -> Result<DeleteOutcome, StoreError> {
        keys::validate_user_id(user)?;
        let trimmed = keys::normalize_folder_path(path)?;
        if trimmed.is_empty() {
            return Err(StoreError::Validation("refusing to delete the bucket root".into()));
        }
        if path.ends_with('/') {
            return self.delete_folder(user, &trimmed).await;
        }

        let blob = self
            .blobs
            .get(&keys::bucket_name(user), &trimmed)
            .await
            .remote("read object", user, &trimmed)?;
        match blob {
            Some(blob) => self.delete_file(user, &trimmed, blob).await,
            None => self.delete_folder(user, &trimmed).await,
        }
    }

    async fn delete_file(
        &self,
        user: &str,
        path: &str,
        seen: StoredBlob,
    ) -> Result<DeleteOutcome, StoreError> {
        let own_key = ObjectKey::for_user(user, path).to_string();
        let _path_guard = self.lock_path(&own_key).await;

        let hash = match seen.original_key() {
            None => Some(ContentHash::compute(&seen.data)),
            Some(_) => self
                .registry
                .get(&own_key)
                .await
                .remote("read link record", user, path)?
                .map(|record| record.hash),
        };
        let _guard = match hash {
            Some(hash) => Some(self.lock(hash).await),
            None => None,
        };

        // The group may have changed while waiting for the lock.
        let bucket = keys::bucket_name(user);
        let blob = self
            .blobs
            .get(&bucket, path)
            .await
            .remote("re-read object", user, path)?
            .ok_or_else(|| StoreError::not_found(user, path))?;

        if blob.original_key().is_some() {
            self.blobs
                .delete(&bucket, path)
                .await
                .remote("delete link placeholder", user, path)?;
            self.registry
                .remove(&own_key)
                .await
                .remote("remove link record", user, path)?;
            self.usage
                .apply(user, UsageDelta::removal(0))
                .await
                .remote("update usage", user, path)?;
            info!(target: "audit", user, path, "deleted link");
            return Ok(DeleteOutcome::Link);
        }

        let content = blob.data;
        let size = content.len() as u64;
        let dependents = self
            .registry
            .dependents_of(&own_key)
            .await
            .remote("find dependent links", user, path)?;
        let mut others: Vec<ContentRecord> = dependents
            .iter()
            .filter(|record| record.id() != own_key)
            .cloned()
            .collect();
        others.sort_by_key(ContentRecord::id);
        if dependents.len() > 1 && others.is_empty() {
            return Err(StoreError::InvariantViolation(format!(
                "{own_key} has {} dependent records but no promotion target",
                dependents.len()
            )));
        }

        let mut promoted = None;
        let mut repointed = 0;
        if let Some((target, rest)) = others.split_first() {
            let target_key = target.key();
            let target_id = target_key.to_string();
            debug!(
                user,
                path,
                target = %target_id,
                links = rest.len(),
                "promoting link to canonical"
            );

            self.blobs
                .put(&target_key.bucket, &target_key.path, content.clone(), BlobMetadata::new())
                .await
                .remote("promote: upload canonical bytes", user, path)?;

            for link in rest {
                let link_key = link.key();
                self.registry
                    .repoint(&link.id(), &target_id)
                    .await
                    .remote("promote: repoint link record", user, path)?;
                let mut metadata = BlobMetadata::new();
                metadata.insert(ORIGINAL_KEY.to_string(), target_id.clone());
                self.blobs
                    .put(&link_key.bucket, &link_key.path, Bytes::new(), metadata)
                    .await
                    .remote("promote: rewrite link metadata", user, path)?;
                repointed += 1;
            }

            let mut holder = target.clone();
            holder.canonical_key = target_id.clone();
            holder.size = size;
            self.registry
                .put(&holder)
                .await
                .remote("promote: reindex new holder", user, path)?;
            self.usage
                .apply(&target.user_id, UsageDelta::charge(size))
                .await
                .remote("promote: charge new holder", user, path)?;

            self.metrics.promotion();
            self.metrics.links_repointed(repointed as u64);
            info!(
                target: "audit",
                user,
                path,
                promoted = %target_id,
                repointed,
                "promoted link to canonical"
            );
            promoted = Some(target_id);
        } else {
            self.metrics.bytes_released(size);
        }

        self.blobs
            .delete(&bucket, path)
            .await
            .remote("delete canonical object", user, path)?;
        self.registry
            .remove(&own_key)
            .await
            .remote("remove canonical record", user, path)?;
        self.usage
            .apply(user, UsageDelta::removal(size))
            .await
            .remote("update usage", user, path)?;
        info!(target: "audit", user, path, size, "deleted canonical object");

        Ok(DeleteOutcome::Canonical {
            promoted,
            repointed,
            size,
        })
    }

    /// Deletes every file below `folder`, then the folder markers, deepest
    /// first. Files removed before a failure stay removed.
    async fn delete_folder(&self, user: &str, folder: &str) -> Result<DeleteOutcome, StoreError> {
        let bucket = keys::bucket_name(user);
        let prefix = keys::folder_prefix(folder);
        let listing = self
            .blobs
            .list(&bucket, &prefix, None)
            .await
            .remote("list folder contents", user, folder)?;
        if listing.objects.is_empty() {
            return Err(StoreError::not_found(user, folder));
        }

        let (mut markers, files): (Vec<String>, Vec<String>) = listing
            .objects
            .into_iter()
            .map(|object| object.key)
            .partition(|key| key.ends_with('/'));

        let mut deleted = 0;
        for key in &files {
            let blob = self
                .blobs
                .get(&bucket, key)
                .await
                .remote("read folder entry", user, key)?;
            let Some(blob) = blob else {
                continue;
            };
            match self.delete_file(user, key, blob).await {
                Ok(_) => deleted += 1,
                Err(err) if err.is_not_found() => {
                    warn!(user, key = %key, "folder entry vanished during delete");
                }
                Err(err) => return Err(err),
            }
        }

        markers.sort_by(|a, b| {
            b.matches('/')
                .count()
                .cmp(&a.matches('/').count())
                .then_with(|| b.cmp(a))
        });
        for marker in &markers {
            self.blobs
                .delete(&bucket, marker)
                .await
                .remote("delete folder marker", user, marker)?;
        }

        info!(target: "audit", user, folder, files = deleted, "deleted folder");
        Ok(DeleteOutcome::Folder {
            files: deleted,
            placeholders: markers.len(),
        })
    }

    /// Files of `user` whose name, type or hash contains `term`, each resolved
    /// through [`Deduplicator::read`] so links surface their holder.
    pub async fn search(&self, user: &str, term: &str) -> Result<Vec<FileEntry>, StoreError> {
        keys::validate_user_id(user)?;
        let records = self
            .registry
            .search_user(user, term)
            .await
            .remote("search content index", user, term)?;

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let path = record.path();
            match self.read(user, &path).await {
                Ok(ReadOutcome::File(entry)) => results.push(entry),
                Ok(ReadOutcome::Folder { .. }) => {
                    warn!(user, path = %path, "search hit resolves to a folder, skipping");
                }
                Err(err) if err.is_not_found() => {
                    warn!(user, path = %path, "stale search hit, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }
}

use std::path::Path;
use std::sync::Arc;

use crate::blob::{FjallBlobStore, PresignConfig, Presigner};
use crate::error::BackendError;
use crate::index::FjallIndex;

/// Rejects names fjall refuses as partition names, so callers get an error
/// instead of a panic from `open_partition`.
pub(crate) fn check_partition_name(name: &str) -> Result<(), BackendError> {
    let valid = !name.is_empty()
        && name.len() <= u8::MAX as usize
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '#' | '$'));
    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidName(name.to_string()))
    }
}

/// The local blob store and content index living under one data root.
///
/// This is opened once at startup and shared with every deduplicator.
pub struct LocalBackends {
    blobs: Arc<FjallBlobStore>,
    index: Arc<FjallIndex>,
}

impl LocalBackends {
    /// Opens (or creates) `<root>/blobs` and `<root>/index`.
    ///
    /// # Arguments
    /// * `root` - Data directory holding both keyspaces
    /// * `presign` - Base URL and secret used to sign download URLs
    pub fn open(root: impl AsRef<Path>, presign: PresignConfig) -> Result<Self, BackendError> {
        let root = root.as_ref();
        let blobs = FjallBlobStore::open(root.join("blobs"), Presigner::new(presign))?;
        let index = FjallIndex::open(root.join("index"))?;
        Ok(Self {
            blobs: Arc::new(blobs),
            index: Arc::new(index),
        })
    }

    /// Get a reference to the shared blob store
    pub fn blobs(&self) -> Arc<FjallBlobStore> {
        Arc::clone(&self.blobs)
    }

    /// Get a reference to the shared content index
    pub fn index(&self) -> Arc<FjallIndex> {
        Arc::clone(&self.index)
    }

    /// Flushes both keyspaces to disk.
    pub fn persist(&self) -> Result<(), BackendError> {
        self.blobs.persist()?;
        self.index.persist()
    }

    pub fn disk_space(&self) -> u64 {
        self.blobs.disk_space() + self.index.disk_space()
    }
}

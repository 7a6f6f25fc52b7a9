//! # Dedup Storage Library
//!
//! Per-user object storage that keeps a single physical copy of every
//! distinct file content.
//!
//! ## Features
//!
//! - **Whole-file deduplication**: content is fingerprinted with SHA-256; a
//!   second upload of known content becomes a zero-byte link to the holder
//! - **Canonical promotion**: deleting the holder of shared content moves the
//!   bytes to one of its links and repoints the rest
//! - **Usage accounting**: per-user byte and file counters kept in step with
//!   every create and delete
//! - **Implicit folders**: folders are key prefixes, listed on demand
//! - **Pluggable backends**: `BlobStore` and `ContentIndex` traits, with fjall
//!   implementations for local use
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use dedup_storage::{Deduplicator, DedupOptions, LocalBackends, PresignConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backends = LocalBackends::open(
//!     "./data",
//!     PresignConfig {
//!         base_url: "http://localhost:8014".into(),
//!         secret: "change-me".into(),
//!     },
//! )?;
//! let options = DedupOptions::default();
//! let dedup = Deduplicator::open(backends.blobs(), backends.index(), options).await?;
//!
//! dedup.provision_user("alice").await?;
//! dedup.create("alice", "docs/report.pdf", Bytes::from_static(b"%PDF-1.7")).await?;
//! let entry = dedup.read("alice", "docs/report.pdf").await?;
//! # let _ = entry;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod blob;
pub mod dedup;
pub mod error;
pub mod hash;
pub mod index;
pub mod integrity;
pub mod keys;
pub mod locks;
pub mod metrics;
pub mod registry;
pub mod usage;

pub use backends::LocalBackends;
pub use blob::{
    BlobMetadata, BlobStore, FjallBlobStore, Listing, PresignConfig, Presigner, StoredBlob,
    DEFAULT_PRESIGN_TTL, ORIGINAL_KEY,
};
pub use dedup::{
    CreateOutcome, DedupOptions, Deduplicator, DeleteOutcome, EntryKind, EntrySize, FileEntry,
    FolderEntry, ReadOutcome,
};
pub use error::{BackendError, StoreError};
pub use hash::ContentHash;
pub use index::{ContentIndex, FjallIndex, Query};
pub use integrity::{check_integrity, IntegrityReport, Issue};
pub use keys::{bucket_name, ObjectKey};
pub use metrics::{MetricsCollector, NoOpMetrics, SharedMetrics};
pub use registry::{ContentRecord, HashRegistry};
pub use usage::{UsageAccountant, UsageDelta, UserUsage};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::BackendError;
use crate::index::{ContentIndex, Query};
use crate::keys;

pub const DEFAULT_USAGE_INDEX: &str = "user_usage";

/// Aggregate storage counters of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUsage {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub bucket_name: String,
    /// Bytes physically held for this user's canonical objects.
    #[serde(default)]
    pub total_size: i64,
    /// Logical objects, canonical holders and links alike.
    #[serde(default)]
    pub file_count: i64,
    #[serde(default)]
    pub upload_count: i64,
    #[serde(default)]
    pub delete_count: i64,
    /// Epoch millis of the last counter change.
    #[serde(default)]
    pub last_activity_date: Option<i64>,
    /// Informational quota, not enforced here.
    #[serde(default)]
    pub storage_limit: Option<i64>,
}

/// Counter changes applied by one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub size: i64,
    pub files: i64,
    pub uploads: i64,
    pub deletes: i64,
}

impl UsageDelta {
    pub fn upload(size: u64) -> Self {
        Self {
            size: size as i64,
            files: 1,
            uploads: 1,
            deletes: 0,
        }
    }

    pub fn removal(size: u64) -> Self {
        Self {
            size: -(size as i64),
            files: -1,
            uploads: 0,
            deletes: 1,
        }
    }

    /// Bytes moved onto a user by promotion; the file count is unchanged.
    pub fn charge(size: u64) -> Self {
        Self {
            size: size as i64,
            ..Self::default()
        }
    }
}

fn usage_mapping() -> Value {
    json!({
        "properties": {
            "user_id": {"type": "keyword"},
            "bucket_name": {"type": "keyword"},
            "total_size": {"type": "long"},
            "file_count": {"type": "long"},
            "upload_count": {"type": "long"},
            "delete_count": {"type": "long"},
            "last_activity_date": {"type": "date", "format": "epoch_millis"},
            "storage_limit": {"type": "long"}
        }
    })
}

/// Maintains [`UserUsage`] documents in the content index.
#[derive(Clone)]
pub struct UsageAccountant {
    index: Arc<dyn ContentIndex>,
    name: String,
}

impl UsageAccountant {
    pub fn new(index: Arc<dyn ContentIndex>, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }

    pub async fn ensure_index(&self) -> Result<(), BackendError> {
        self.index.create_index(&self.name, usage_mapping()).await
    }

    /// Creates the zeroed usage document for a new user. Existing counters are
    /// kept.
    pub async fn provision(&self, user_id: &str) -> Result<UserUsage, BackendError> {
        if let Some(existing) = self.get(user_id).await? {
            return Ok(existing);
        }
        let usage = UserUsage {
            user_id: user_id.to_string(),
            bucket_name: keys::bucket_name(user_id),
            last_activity_date: Some(chrono::Utc::now().timestamp_millis()),
            ..UserUsage::default()
        };
        self.index
            .index_document(&self.name, user_id, serde_json::to_value(&usage)?)
            .await?;
        Ok(usage)
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserUsage>, BackendError> {
        match self.index.get_document(&self.name, user_id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Usage of every user, ordered by user id.
    pub async fn all(&self) -> Result<Vec<UserUsage>, BackendError> {
        self.index
            .search(&self.name, &Query::MatchAll)
            .await?
            .into_iter()
            .map(|hit| Ok(serde_json::from_value(hit.source)?))
            .collect()
    }

    /// Adds `delta` to the user's counters through the index's increment, so
    /// the update is atomic wherever the backend supports it.
    pub async fn apply(&self, user_id: &str, delta: UsageDelta) -> Result<UserUsage, BackendError> {
        let mut set = Map::new();
        set.insert("user_id".into(), Value::from(user_id));
        set.insert("bucket_name".into(), Value::from(keys::bucket_name(user_id)));
        set.insert(
            "last_activity_date".into(),
            Value::from(chrono::Utc::now().timestamp_millis()),
        );
        let doc = self
            .index
            .increment(
                &self.name,
                user_id,
                &[
                    ("total_size", delta.size),
                    ("file_count", delta.files),
                    ("upload_count", delta.uploads),
                    ("delete_count", delta.deletes),
                ],
                set,
            )
            .await?;
        debug!(user = user_id, ?delta, "applied usage delta");
        Ok(serde_json::from_value(doc)?)
    }
}

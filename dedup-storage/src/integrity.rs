use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::blob::BlobStore;
use crate::error::{RemoteContext, StoreError};
use crate::hash::ContentHash;
use crate::registry::{ContentRecord, HashRegistry};

/// A single violation of the dedup invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub hash: String,
    pub key: String,
    pub problem: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.key, &self.hash[..12], self.problem)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub hashes: usize,
    pub records: usize,
    pub links: usize,
    pub issues: Vec<Issue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn flag(&mut self, hash: &ContentHash, key: &str, problem: impl Into<String>) {
        let issue = Issue {
            hash: hash.to_hex(),
            key: key.to_string(),
            problem: problem.into(),
        };
        warn!(%issue, "integrity issue");
        self.issues.push(issue);
    }
}

/// Walks the whole registry and checks, per content hash, that exactly one
/// record holds the bytes and every other record is a well-formed link to it.
pub async fn check_integrity(
    registry: &HashRegistry,
    blobs: &dyn BlobStore,
) -> Result<IntegrityReport, StoreError> {
    let records = registry
        .all()
        .await
        .remote("scan content index", "-", "")?;

    let mut groups: BTreeMap<ContentHash, Vec<ContentRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.hash).or_default().push(record);
    }

    let mut report = IntegrityReport {
        hashes: groups.len(),
        ..IntegrityReport::default()
    };

    for (hash, group) in &groups {
        report.records += group.len();
        let holders: Vec<&ContentRecord> = group.iter().filter(|r| r.is_canonical()).collect();
        let holder_id = match holders.as_slice() {
            [holder] => holder.id(),
            [] => {
                report.flag(hash, &group[0].id(), "no record holds the content");
                continue;
            }
            many => {
                for holder in many {
                    report.flag(hash, &holder.id(), "duplicate canonical holder");
                }
                continue;
            }
        };

        for record in group {
            let key = record.key();
            let id = key.to_string();
            let blob = blobs
                .get(&key.bucket, &key.path)
                .await
                .remote("read object", &record.user_id, &key.path)?;
            let Some(blob) = blob else {
                report.flag(hash, &id, "object is missing from the blob store");
                continue;
            };

            if id == holder_id {
                if blob.original_key().is_some() {
                    report.flag(hash, &id, "canonical holder is stored as a link");
                } else if ContentHash::compute(&blob.data) != *hash {
                    report.flag(hash, &id, "canonical bytes do not match the fingerprint");
                } else if blob.data.len() as u64 != record.size {
                    report.flag(hash, &id, "recorded size differs from stored bytes");
                }
                continue;
            }

            report.links += 1;
            if record.canonical_key != holder_id {
                let problem = format!(
                    "record points at {} instead of {holder_id}",
                    record.canonical_key
                );
                report.flag(hash, &id, problem);
            }
            if record.size != 0 {
                report.flag(hash, &id, "link is charged a non-zero size");
            }
            match blob.original_key() {
                Some(original) if original == holder_id => {}
                Some(original) => {
                    report.flag(hash, &id, format!("link metadata points at {original}"));
                }
                None => report.flag(hash, &id, "link has no original-key metadata"),
            }
            if !blob.data.is_empty() {
                report.flag(hash, &id, "link placeholder is not empty");
            }
        }
    }

    Ok(report)
}

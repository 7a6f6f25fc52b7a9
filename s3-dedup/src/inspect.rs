use std::collections::BTreeMap;

use anyhow::Result;

use dedup_storage::keys::user_from_bucket;
use dedup_storage::{ContentHash, ContentRecord, Deduplicator, LocalBackends};

pub fn num_keys(backends: &LocalBackends) -> Result<usize> {
    Ok(backends.blobs().num_keys()?)
}

pub fn disk_space(backends: &LocalBackends) -> u64 {
    backends.disk_space()
}

/// List all buckets with the user owning them
pub fn list_buckets(backends: &LocalBackends) -> Result<()> {
    let buckets = backends.blobs().list_buckets()?;
    if buckets.is_empty() {
        println!("No buckets found");
        return Ok(());
    }

    println!("{:<40} {:<20}", "Bucket", "User ID");
    println!("{:-<60}", "");
    for bucket in buckets {
        let user = user_from_bucket(&bucket).unwrap_or("-");
        println!("{:<40} {:<20}", bucket, user);
    }
    Ok(())
}

/// Show per-user storage statistics from the usage index
pub async fn user_stats(dedup: &Deduplicator, user_id: Option<String>) -> Result<()> {
    let usages = match user_id {
        Some(user_id) => dedup.usage(&user_id).await?.into_iter().collect(),
        None => dedup.accountant().all().await?,
    };

    if usages.is_empty() {
        println!("No users found");
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<12} {:<12} {:<20}",
        "User ID", "Files", "Uploads", "Deletes", "Total Size"
    );
    println!("{:-<80}", "");
    for usage in usages {
        println!(
            "{:<20} {:<12} {:<12} {:<12} {:<20}",
            usage.user_id,
            usage.file_count,
            usage.upload_count,
            usage.delete_count,
            format_bytes(usage.total_size.max(0) as u64),
        );
    }
    Ok(())
}

/// Aggregate view of the content registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub hashes: usize,
    pub records: usize,
    /// Bytes physically stored, one copy per hash.
    pub physical_bytes: u64,
    /// Bytes users would hold without deduplication.
    pub logical_bytes: u64,
    /// Number of hashes per group size.
    pub group_sizes: BTreeMap<usize, usize>,
}

impl DedupStats {
    pub fn from_records(records: &[ContentRecord]) -> Self {
        let mut groups: BTreeMap<ContentHash, (usize, u64)> = BTreeMap::new();
        for record in records {
            let group = groups.entry(record.hash).or_default();
            group.0 += 1;
            if record.is_canonical() {
                group.1 = record.size;
            }
        }

        let mut stats = Self {
            hashes: groups.len(),
            records: records.len(),
            ..Self::default()
        };
        for (count, size) in groups.values() {
            stats.physical_bytes += size;
            stats.logical_bytes += size * *count as u64;
            *stats.group_sizes.entry(*count).or_insert(0) += 1;
        }
        stats
    }

    pub fn ratio(&self) -> Option<f64> {
        (self.physical_bytes > 0).then(|| self.logical_bytes as f64 / self.physical_bytes as f64)
    }
}

/// Show deduplication statistics
pub async fn dedup_stats(dedup: &Deduplicator) -> Result<()> {
    let records = dedup.registry().all().await?;
    let stats = DedupStats::from_records(&records);

    println!("Dedup Statistics:");
    println!("  Distinct contents: {}", stats.hashes);
    println!("  Logical files: {}", stats.records);
    println!(
        "  Physical storage: {} ({} bytes)",
        format_bytes(stats.physical_bytes),
        stats.physical_bytes
    );
    println!(
        "  Logical storage: {} ({} bytes)",
        format_bytes(stats.logical_bytes),
        stats.logical_bytes
    );
    if let Some(ratio) = stats.ratio() {
        println!("  Deduplication ratio: {:.2}x", ratio);
        let savings_pct = ((ratio - 1.0) / ratio) * 100.0;
        println!("  Storage savings: {:.1}%", savings_pct);
    }

    println!("\nReferences per content:");
    for (refs, count) in stats.group_sizes.iter().take(10) {
        println!("  {} refs: {} contents", refs, count);
    }
    if stats.group_sizes.len() > 10 {
        println!("  ... ({} more)", stats.group_sizes.len() - 10);
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, path: &str, content: &[u8], canonical: &str, size: u64) -> ContentRecord {
        ContentRecord::new(
            user,
            path,
            ContentHash::compute(content),
            canonical.to_string(),
            size,
        )
    }

    #[test]
    fn stats_count_links_as_logical_bytes() {
        let records = vec![
            record("a", "x", b"0123456789", "user-a-bucket/x", 10),
            record("b", "y", b"0123456789", "user-a-bucket/x", 0),
            record("b", "z", b"0123456789", "user-a-bucket/x", 0),
            record("a", "solo", b"abcd", "user-a-bucket/solo", 4),
        ];
        let stats = DedupStats::from_records(&records);
        assert_eq!(stats.hashes, 2);
        assert_eq!(stats.records, 4);
        assert_eq!(stats.physical_bytes, 14);
        assert_eq!(stats.logical_bytes, 34);
        assert_eq!(stats.group_sizes.get(&3), Some(&1));
        assert_eq!(stats.group_sizes.get(&1), Some(&1));
    }

    #[test]
    fn empty_registry_has_no_ratio() {
        assert_eq!(DedupStats::from_records(&[]).ratio(), None);
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
    }
}

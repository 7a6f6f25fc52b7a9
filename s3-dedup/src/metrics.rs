use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
};

use dedup_storage::MetricsCollector;

lazy_static! {
    static ref OBJECTS_WRITTEN: IntCounterVec = register_int_counter_vec!(
        "s3_dedup_objects_written_total",
        "Objects written, by how their content was stored",
        &["kind"]
    )
    .expect("metric can be registered");
    static ref PROMOTIONS: IntCounter = register_int_counter!(
        "s3_dedup_promotions_total",
        "Links promoted to canonical holder after the holder was deleted"
    )
    .expect("metric can be registered");
    static ref LINKS_REPOINTED: IntCounter = register_int_counter!(
        "s3_dedup_links_repointed_total",
        "Links moved to a new canonical holder during promotion"
    )
    .expect("metric can be registered");
    static ref BYTES_STORED: IntCounter = register_int_counter!(
        "s3_dedup_bytes_stored_total",
        "Bytes physically written for new content"
    )
    .expect("metric can be registered");
    static ref BYTES_RELEASED: IntCounter = register_int_counter!(
        "s3_dedup_bytes_released_total",
        "Bytes freed when the last reference to content was deleted"
    )
    .expect("metric can be registered");
}

/// Prometheus backed collector for the storage library.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsCollector for PrometheusMetrics {
    fn canonical_stored(&self) {
        OBJECTS_WRITTEN.with_label_values(&["canonical"]).inc();
    }

    fn link_created(&self) {
        OBJECTS_WRITTEN.with_label_values(&["link"]).inc();
    }

    fn promotion(&self) {
        PROMOTIONS.inc();
    }

    fn links_repointed(&self, amount: u64) {
        LINKS_REPOINTED.inc_by(amount);
    }

    fn bytes_stored(&self, amount: u64) {
        BYTES_STORED.inc_by(amount);
    }

    fn bytes_released(&self, amount: u64) {
        BYTES_RELEASED.inc_by(amount);
    }
}

/// Text exposition of every registered metric.
pub fn render() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

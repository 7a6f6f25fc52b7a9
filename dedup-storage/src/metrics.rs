use std::sync::Arc;

/// Shared metrics collector interface
///
/// Lets applications plug in their own metrics implementation (Prometheus,
/// StatsD, ...) without the storage library depending on it.
pub trait MetricsCollector: Send + Sync {
    fn canonical_stored(&self);
    fn link_created(&self);
    fn promotion(&self);
    fn links_repointed(&self, amount: u64);
    fn bytes_stored(&self, amount: u64);
    fn bytes_released(&self, amount: u64);
}

/// No-op metrics collector (default)
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn canonical_stored(&self) {}
    fn link_created(&self) {}
    fn promotion(&self) {}
    fn links_repointed(&self, _amount: u64) {}
    fn bytes_stored(&self, _amount: u64) {}
    fn bytes_released(&self, _amount: u64) {}
}

/// Shared reference to metrics collector
#[derive(Clone)]
pub struct SharedMetrics(Arc<dyn MetricsCollector>);

impl SharedMetrics {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self(collector)
    }

    pub fn canonical_stored(&self) {
        self.0.canonical_stored();
    }

    pub fn link_created(&self) {
        self.0.link_created();
    }

    pub fn promotion(&self) {
        self.0.promotion();
    }

    pub fn links_repointed(&self, amount: u64) {
        self.0.links_repointed(amount);
    }

    pub fn bytes_stored(&self, amount: u64) {
        self.0.bytes_stored(amount);
    }

    pub fn bytes_released(&self, amount: u64) {
        self.0.bytes_released(amount);
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(Arc::new(NoOpMetrics))
    }
}

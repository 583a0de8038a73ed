use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Registry metrics
#[derive(Clone)]
pub struct MonitorMetrics {
    /// Executions currently in the registry, tombstones included
    tracked_executions: IntGauge,

    /// Status changes observed in snapshots or caused by deletion
    status_transitions: IntCounter,

    /// Tombstones dropped after their TTL
    tombstones_purged: IntCounter,

    /// Directories waiting for removal
    pending_deletions: IntGauge,

    /// Removal attempts that will be retried
    failed_deletions: IntCounter,

    registry: Registry,
}

impl MonitorMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tracked_executions = IntGauge::new(
            "etl_monitor_tracked_executions",
            "Number of executions known to the monitor",
        )?;
        registry.register(Box::new(tracked_executions.clone()))?;

        let status_transitions = IntCounter::new(
            "etl_monitor_status_transitions_total",
            "Total number of observed execution status transitions",
        )?;
        registry.register(Box::new(status_transitions.clone()))?;

        let tombstones_purged = IntCounter::new(
            "etl_monitor_tombstones_purged_total",
            "Total number of deleted executions purged after their TTL",
        )?;
        registry.register(Box::new(tombstones_purged.clone()))?;

        let pending_deletions = IntGauge::new(
            "etl_monitor_pending_directory_deletions",
            "Number of execution directories waiting for removal",
        )?;
        registry.register(Box::new(pending_deletions.clone()))?;

        let failed_deletions = IntCounter::new(
            "etl_monitor_failed_directory_deletions_total",
            "Total number of directory removal attempts that failed",
        )?;
        registry.register(Box::new(failed_deletions.clone()))?;

        Ok(Self {
            tracked_executions,
            status_transitions,
            tombstones_purged,
            pending_deletions,
            failed_deletions,
            registry,
        })
    }

    pub fn set_tracked(&self, count: usize) {
        self.tracked_executions.set(count as i64);
    }

    pub fn status_changed(&self) {
        self.status_transitions.inc();
    }

    pub fn purged(&self, count: usize) {
        self.tombstones_purged.inc_by(count as u64);
    }

    pub fn collected(&self, failed: usize, pending: usize) {
        self.failed_deletions.inc_by(failed as u64);
        self.pending_deletions.set(pending as i64);
    }

    pub fn status_transitions(&self) -> u64 {
        self.status_transitions.get()
    }

    /// Registry for scraping
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Metrics in the Prometheus text format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text() {
        let metrics = MonitorMetrics::new().unwrap();
        metrics.set_tracked(3);
        metrics.status_changed();
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("etl_monitor_tracked_executions 3"));
        assert!(text.contains("etl_monitor_status_transitions_total 1"));
    }
}

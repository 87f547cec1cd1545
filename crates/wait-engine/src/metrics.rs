//! Running wait statistics per operation kind
//!
//! Purely observational: nothing in the poller branches on these values.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitPerformanceMetrics {
    pub total_operations: u64,
    pub average_wait_time: f64,
    pub max_wait_time: u64,
    pub timeout_rate: f64,
    pub success_rate: f64,
}

impl WaitPerformanceMetrics {
    /// Fold one observation in without consulting any history
    fn observe(&mut self, elapsed_ms: u64, success: bool) {
        let previous = self.total_operations as f64;
        let count = previous + 1.0;
        let hit = if success { 1.0 } else { 0.0 };

        self.average_wait_time = (self.average_wait_time * previous + elapsed_ms as f64) / count;
        self.success_rate = (self.success_rate * previous + hit) / count;
        self.timeout_rate = (self.timeout_rate * previous + (1.0 - hit)) / count;
        self.max_wait_time = self.max_wait_time.max(elapsed_ms);
        self.total_operations += 1;
    }

    /// Weighted merge, used to build the cross-kind summary
    fn absorb(&mut self, other: &WaitPerformanceMetrics) {
        let total = self.total_operations + other.total_operations;
        if total == 0 {
            return;
        }
        let weight = |m: &WaitPerformanceMetrics, value: f64| value * m.total_operations as f64;
        let total_f = total as f64;
        self.average_wait_time = (weight(self, self.average_wait_time)
            + weight(other, other.average_wait_time))
            / total_f;
        self.success_rate =
            (weight(self, self.success_rate) + weight(other, other.success_rate)) / total_f;
        self.timeout_rate =
            (weight(self, self.timeout_rate) + weight(other, other.timeout_rate)) / total_f;
        self.max_wait_time = self.max_wait_time.max(other.max_wait_time);
        self.total_operations = total;
    }
}

#[derive(Default)]
pub struct WaitMetricsTracker {
    metrics: DashMap<String, WaitPerformanceMetrics>,
}

impl WaitMetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, operation: &str, elapsed_ms: u64, success: bool) {
        self.metrics
            .entry(operation.to_string())
            .or_default()
            .observe(elapsed_ms, success);
    }

    pub fn get(&self, operation: &str) -> Option<WaitPerformanceMetrics> {
        self.metrics.get(operation).map(|entry| *entry.value())
    }

    pub fn get_all(&self) -> BTreeMap<String, WaitPerformanceMetrics> {
        self.metrics
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Clear one operation kind, or everything when `operation` is `None`
    pub fn reset(&self, operation: Option<&str>) {
        match operation {
            Some(operation) => {
                self.metrics.remove(operation);
            }
            None => self.metrics.clear(),
        }
    }

    /// Totals across every operation kind
    pub fn summary(&self) -> WaitPerformanceMetrics {
        let mut summary = WaitPerformanceMetrics::default();
        for entry in self.metrics.iter() {
            summary.absorb(entry.value());
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_averages() {
        let tracker = WaitMetricsTracker::new();
        tracker.record("tap", 100, true);
        tracker.record("tap", 300, false);
        tracker.record("tap", 200, true);

        let tap = tracker.get("tap").unwrap();
        assert_eq!(tap.total_operations, 3);
        assert!((tap.average_wait_time - 200.0).abs() < 1e-9);
        assert_eq!(tap.max_wait_time, 300);
        assert!((tap.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((tap.timeout_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn summary_and_reset() {
        let tracker = WaitMetricsTracker::new();
        tracker.record("tap", 100, true);
        tracker.record("swipe", 300, false);

        let summary = tracker.summary();
        assert_eq!(summary.total_operations, 2);
        assert!((summary.average_wait_time - 200.0).abs() < 1e-9);
        assert!((summary.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(summary.max_wait_time, 300);

        tracker.reset(Some("tap"));
        assert!(tracker.get("tap").is_none());
        assert_eq!(tracker.get_all().len(), 1);
        tracker.reset(None);
        assert!(tracker.get_all().is_empty());
    }
}

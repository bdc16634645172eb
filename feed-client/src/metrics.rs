use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMetrics {
    Success,
    Failure,
    Throttled,
}

impl OperationMetrics {
    pub fn success() -> Self {
        OperationMetrics::Success
    }

    pub fn failure() -> Self {
        OperationMetrics::Failure
    }

    pub fn throttled() -> Self {
        OperationMetrics::Throttled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverMetrics {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub throttled_operations: u64,
    pub average_latency: Duration,
    pub last_operation_time: Option<SystemTime>,
    pub operations_by_action: HashMap<String, ActionMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionMetrics {
    pub count: u64,
    pub success_count: u64,
    pub total_latency: Duration,
}

impl ActionMetrics {
    pub fn average_latency(&self) -> Duration {
        if self.count == 0 {
            Duration::from_millis(0)
        } else {
            self.total_latency / self.count as u32
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.count as f64
        }
    }
}

impl Default for DriverMetrics {
    fn default() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            throttled_operations: 0,
            average_latency: Duration::from_millis(0),
            last_operation_time: None,
            operations_by_action: HashMap::new(),
        }
    }
}

/// Process-local operation counters for one driver session. Recording is
/// synchronous so it can be called from non-async paths.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    metrics: Mutex<DriverMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, action: &str, latency: Duration, outcome: OperationMetrics) {
        let mut metrics = self.metrics.lock().unwrap();

        metrics.total_operations += 1;
        metrics.last_operation_time = Some(SystemTime::now());
        match outcome {
            OperationMetrics::Success => metrics.successful_operations += 1,
            OperationMetrics::Failure => metrics.failed_operations += 1,
            OperationMetrics::Throttled => {
                metrics.failed_operations += 1;
                metrics.throttled_operations += 1;
            }
        }

        let total = metrics.total_operations as u32;
        let prior = metrics.average_latency * (total - 1);
        metrics.average_latency = (prior + latency) / total;

        let entry = metrics
            .operations_by_action
            .entry(action.to_string())
            .or_default();
        entry.count += 1;
        entry.total_latency += latency;
        if outcome == OperationMetrics::Success {
            entry.success_count += 1;
        }
    }

    pub fn snapshot(&self) -> DriverMetrics {
        self.metrics.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        let mut metrics = self.metrics.lock().unwrap();
        *metrics = DriverMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        let collector = MetricsCollector::new();

        collector.record("search", Duration::from_millis(100), OperationMetrics::Success);
        collector.record("search", Duration::from_millis(300), OperationMetrics::Failure);
        collector.record("goto", Duration::from_millis(50), OperationMetrics::Throttled);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_operations, 3);
        assert_eq!(snapshot.successful_operations, 1);
        assert_eq!(snapshot.failed_operations, 2);
        assert_eq!(snapshot.throttled_operations, 1);
        assert!(snapshot.last_operation_time.is_some());

        let search = &snapshot.operations_by_action["search"];
        assert_eq!(search.count, 2);
        assert_eq!(search.average_latency(), Duration::from_millis(200));
        assert_eq!(search.success_rate(), 0.5);
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();
        collector.record("reload", Duration::from_millis(10), OperationMetrics::Success);
        collector.reset();
        assert_eq!(collector.snapshot().total_operations, 0);
    }
}

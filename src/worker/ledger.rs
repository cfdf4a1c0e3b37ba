//! Metrics ledger: bounded log of task outcomes with aggregate queries.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::worker::id::TaskId;
use crate::worker::state::TaskRecord;

/// Default number of records retained.
pub const DEFAULT_LEDGER_CAPACITY: usize = 100;

/// Default number of failures reported in a snapshot.
pub const DEFAULT_RECENT_ERROR_LIMIT: usize = 10;

/// A failed task, reduced for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub task_id: TaskId,
    pub task_type: String,
    pub error: String,
}

/// Point-in-time aggregate view of the ledger.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateStats {
    pub count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub avg_queue_wait_ms: f64,
    pub task_distribution: HashMap<String, usize>,
    pub type_success_rates: HashMap<String, f64>,
    /// Newest first.
    pub recent_errors: Vec<ErrorSummary>,
}

/// Capacity-bounded FIFO of finished task records.
///
/// The lock is held only for a push or a single pass over the records, never
/// across an await point.
#[derive(Debug)]
pub struct MetricsLedger {
    records: Mutex<VecDeque<TaskRecord>>,
    capacity: usize,
    recent_error_limit: usize,
}

impl MetricsLedger {
    pub fn new(capacity: usize) -> Self {
        Self::with_limits(capacity, DEFAULT_RECENT_ERROR_LIMIT)
    }

    pub fn with_limits(capacity: usize, recent_error_limit: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            recent_error_limit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest ones beyond capacity.
    pub fn record(&self, record: TaskRecord) {
        let mut records = self.lock();
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies of the newest `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<TaskRecord> {
        let records = self.lock();
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    /// Compute aggregate statistics over the retained records.
    pub fn snapshot_stats(&self) -> AggregateStats {
        let records = self.lock();

        let mut stats = AggregateStats {
            count: records.len(),
            ..AggregateStats::default()
        };

        let mut duration_total = 0.0;
        let mut duration_samples = 0usize;
        let mut wait_total = 0.0;
        let mut wait_samples = 0usize;
        let mut type_successes: HashMap<&str, usize> = HashMap::new();

        for record in records.iter() {
            *stats
                .task_distribution
                .entry(record.task_type.clone())
                .or_insert(0) += 1;

            if record.outcome.is_success() {
                stats.success_count += 1;
                *type_successes.entry(record.task_type.as_str()).or_insert(0) += 1;
            } else if record.outcome.is_failure() {
                stats.failure_count += 1;
            }

            if let Some(ms) = record.duration_ms {
                duration_total += ms;
                duration_samples += 1;
            }
            if let Some(ms) = record.queue_wait_ms {
                wait_total += ms;
                wait_samples += 1;
            }
        }

        stats.success_rate = ratio(stats.success_count, stats.count);
        stats.avg_duration_ms = mean(duration_total, duration_samples);
        stats.avg_queue_wait_ms = mean(wait_total, wait_samples);

        stats.type_success_rates = stats
            .task_distribution
            .iter()
            .map(|(task_type, total)| {
                let successes = type_successes.get(task_type.as_str()).copied().unwrap_or(0);
                (task_type.clone(), ratio(successes, *total))
            })
            .collect();

        stats.recent_errors = records
            .iter()
            .rev()
            .filter_map(|record| {
                record.outcome.error().map(|error| ErrorSummary {
                    task_id: record.task_id,
                    task_type: record.task_type.clone(),
                    error: error.to_string(),
                })
            })
            .take(self.recent_error_limit)
            .collect();

        stats
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TaskRecord>> {
        // A panic while holding the lock can only interrupt a push/pop or a
        // read, so the deque is still structurally valid.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MetricsLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mean(total: f64, samples: usize) -> f64 {
    if samples == 0 { 0.0 } else { total / samples as f64 }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::worker::state::TaskStatus;

    fn finished(id: u64, task_type: &str, error: Option<&str>, millis: u64) -> TaskRecord {
        let mut rec = TaskRecord::new(TaskId::new(id), task_type, serde_json::Map::new());
        rec.transition_to(TaskStatus::Dispatched).unwrap();
        rec.transition_to(TaskStatus::Running).unwrap();
        match error {
            Some(e) => rec.fail(e, Duration::from_millis(millis)).unwrap(),
            None => rec.succeed(Duration::from_millis(millis)).unwrap(),
        }
        rec
    }

    #[test]
    fn empty_stats() {
        let ledger = MetricsLedger::default();
        let stats = ledger.snapshot_stats();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.avg_duration_ms, 0.0);
        assert!(stats.task_distribution.is_empty());
        assert!(stats.recent_errors.is_empty());
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let ledger = MetricsLedger::new(100);
        for id in 1..=150 {
            ledger.record(finished(id, "work", None, 1));
        }
        assert_eq!(ledger.len(), 100);

        let kept = ledger.recent(100);
        assert_eq!(kept.first().unwrap().task_id, TaskId::new(51));
        assert_eq!(kept.last().unwrap().task_id, TaskId::new(150));
    }

    #[test]
    fn aggregates_by_type() {
        let ledger = MetricsLedger::default();
        ledger.record(finished(1, "resize", None, 100));
        ledger.record(finished(2, "resize", Some("bad image"), 300));
        ledger.record(finished(3, "transcode", None, 200));
        ledger.record(finished(4, "resize", None, 400));

        let stats = ledger.snapshot_stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.success_count, 3);
        assert_eq!(stats.failure_count, 1);
        assert!((stats.success_rate - 0.75).abs() < 1e-9);
        assert!((stats.avg_duration_ms - 250.0).abs() < 1e-9);
        assert_eq!(stats.task_distribution["resize"], 3);
        assert_eq!(stats.task_distribution["transcode"], 1);
        assert!((stats.type_success_rates["resize"] - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.type_success_rates["transcode"] - 1.0).abs() < 1e-9);
        assert_eq!(
            stats.recent_errors,
            vec![ErrorSummary {
                task_id: TaskId::new(2),
                task_type: "resize".into(),
                error: "bad image".into(),
            }]
        );
    }

    #[test]
    fn recent_errors_capped_newest_first() {
        let ledger = MetricsLedger::default();
        for id in 1..=25 {
            ledger.record(finished(id, "flaky", Some(&format!("err {id}")), 1));
        }
        let stats = ledger.snapshot_stats();
        assert_eq!(stats.recent_errors.len(), 10);
        assert_eq!(stats.recent_errors[0].task_id, TaskId::new(25));
        assert_eq!(stats.recent_errors[9].task_id, TaskId::new(16));
    }

    #[test]
    fn pending_records_count_but_have_no_outcome() {
        let ledger = MetricsLedger::default();
        ledger.record(TaskRecord::new(TaskId::new(1), "odd", serde_json::Map::new()));
        ledger.record(finished(2, "odd", None, 10));
        let stats = ledger.snapshot_stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 0);
        // Only the finished record has a duration.
        assert!((stats.avg_duration_ms - 10.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let ledger = MetricsLedger::default();
        ledger.record(finished(1, "a", None, 1));
        let before = ledger.snapshot_stats();
        ledger.record(finished(2, "a", Some("x"), 1));
        assert_eq!(before.count, 1);
        assert_eq!(ledger.snapshot_stats().count, 2);
    }
}

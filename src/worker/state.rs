//! Task state machine and the per-submission record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::id::TaskId;

/// Lifecycle state of an offloaded task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Record exists, callable not yet handed to the pool.
    Created,
    /// Queued on the pool, waiting for a free worker.
    Dispatched,
    /// A worker is executing the callable.
    Running,
    /// Callable returned a value within the timeout.
    Succeeded,
    /// Callable returned an error, panicked, or was rejected by the pool.
    Failed,
    /// The caller stopped waiting; the worker may still be running.
    TimedOut,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            // From Created
            (Created, Dispatched) | (Created, Failed) |
            // From Dispatched (timeout can fire before a worker picks it up)
            (Dispatched, Running) | (Dispatched, TimedOut) | (Dispatched, Failed) |
            // From Running
            (Running, Succeeded) | (Running, Failed) | (Running, TimedOut)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a task as seen by the metrics ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Pending,
    Success,
    Failure { error: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error } => Some(error),
            _ => None,
        }
    }
}

/// One record per submission.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,
    pub outcome: TaskOutcome,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Wall time from submission to terminal state, in milliseconds.
    pub duration_ms: Option<f64>,
    /// Time spent waiting for a free worker, when the pool reported it.
    pub queue_wait_ms: Option<f64>,
    /// Caller-supplied annotations; never interpreted here.
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl TaskRecord {
    /// Create a record in the `Created` state.
    pub fn new(
        task_id: TaskId,
        task_type: impl Into<String>,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            task_id,
            task_type: task_type.into(),
            status: TaskStatus::Created,
            outcome: TaskOutcome::Pending,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            queue_wait_ms: None,
            context,
        }
    }

    /// Transition to a non-terminal state.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if new_status.is_terminal() {
            return Err(format!(
                "Use succeed/fail/time_out to enter terminal state {new_status}"
            ));
        }
        self.check_transition(new_status)?;
        self.status = new_status;
        Ok(())
    }

    /// Mark the task successful. `elapsed` is measured on a monotonic clock.
    pub fn succeed(&mut self, elapsed: Duration) -> Result<(), String> {
        self.finish(TaskStatus::Succeeded, TaskOutcome::Success, elapsed)
    }

    /// Mark the task failed with a short description.
    pub fn fail(&mut self, error: impl Into<String>, elapsed: Duration) -> Result<(), String> {
        self.finish(
            TaskStatus::Failed,
            TaskOutcome::Failure {
                error: error.into(),
            },
            elapsed,
        )
    }

    /// Mark the task abandoned after its timeout.
    pub fn time_out(&mut self, error: impl Into<String>, elapsed: Duration) -> Result<(), String> {
        self.finish(
            TaskStatus::TimedOut,
            TaskOutcome::Failure {
                error: error.into(),
            },
            elapsed,
        )
    }

    pub fn set_queue_wait(&mut self, wait: Duration) {
        self.queue_wait_ms = Some(as_millis_f64(wait));
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn finish(
        &mut self,
        status: TaskStatus,
        outcome: TaskOutcome,
        elapsed: Duration,
    ) -> Result<(), String> {
        self.check_transition(status)?;

        // end_time is derived from start_time so it can never precede it,
        // even if the wall clock steps backwards mid-task.
        let delta = chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero());
        self.end_time = Some(self.start_time + delta);
        self.duration_ms = Some(as_millis_f64(elapsed));
        self.status = status;
        self.outcome = outcome;
        Ok(())
    }

    fn check_transition(&self, target: TaskStatus) -> Result<(), String> {
        if self.status.can_transition_to(target) {
            Ok(())
        } else {
            Err(format!(
                "Task {}: cannot transition from {} to {}",
                self.task_id, self.status, target
            ))
        }
    }
}

fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::new(TaskId::new(1), "resize_image", serde_json::Map::new())
    }

    #[test]
    fn status_transitions_valid() {
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::Dispatched));
        assert!(TaskStatus::Dispatched.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Dispatched.can_transition_to(TaskStatus::TimedOut));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Succeeded));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::TimedOut));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::TimedOut,
        ] {
            assert!(terminal.is_terminal());
            for target in [
                TaskStatus::Created,
                TaskStatus::Dispatched,
                TaskStatus::Running,
                TaskStatus::Succeeded,
                TaskStatus::Failed,
                TaskStatus::TimedOut,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn new_record_is_pending() {
        let rec = record();
        assert_eq!(rec.status, TaskStatus::Created);
        assert_eq!(rec.outcome, TaskOutcome::Pending);
        assert!(rec.end_time.is_none());
        assert!(rec.duration_ms.is_none());
    }

    #[test]
    fn success_sets_times_once() {
        let mut rec = record();
        rec.transition_to(TaskStatus::Dispatched).unwrap();
        rec.transition_to(TaskStatus::Running).unwrap();
        rec.succeed(Duration::from_millis(120)).unwrap();

        assert!(rec.outcome.is_success());
        assert!(rec.end_time.unwrap() >= rec.start_time);
        assert_eq!(rec.duration_ms, Some(120.0));

        // Outcome is immutable once terminal.
        assert!(rec.fail("late", Duration::from_millis(500)).is_err());
        assert!(rec.outcome.is_success());
        assert_eq!(rec.duration_ms, Some(120.0));
    }

    #[test]
    fn timeout_is_a_failure() {
        let mut rec = record();
        rec.transition_to(TaskStatus::Dispatched).unwrap();
        rec.time_out("Task timed out", Duration::from_millis(500))
            .unwrap();
        assert_eq!(rec.status, TaskStatus::TimedOut);
        assert_eq!(rec.outcome.error(), Some("Task timed out"));
    }

    #[test]
    fn terminal_states_need_finish_methods() {
        let mut rec = record();
        rec.transition_to(TaskStatus::Dispatched).unwrap();
        rec.transition_to(TaskStatus::Running).unwrap();
        assert!(rec.transition_to(TaskStatus::Succeeded).is_err());
        assert!(rec.transition_to(TaskStatus::Created).is_err());
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_value(TaskOutcome::Failure {
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "failure");
        assert_eq!(json["error"], "boom");
        assert_eq!(TaskStatus::TimedOut.to_string(), "timed_out");
    }
}

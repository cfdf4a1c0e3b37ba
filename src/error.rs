//! Error types for the offload executor.

use std::time::Duration;

use crate::worker::id::TaskId;

/// Top-level error type for constructing and running the executor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Worker pool errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    ShutDown,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Worker dropped the task before completing it")]
    WorkerLost,
}

/// Failure returned by [`Executor::submit`](crate::worker::Executor::submit).
///
/// `Failed` carries the callable's own error untouched, so callers can match
/// on its concrete type exactly as if they had run the callable inline.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError<E> {
    #[error("Task timed out")]
    Timeout { task_id: TaskId, timeout: Duration },

    #[error(transparent)]
    Failed(E),

    #[error("Task {task_id} panicked: {message}")]
    Panicked { task_id: TaskId, message: String },

    #[error("Executor unavailable: {0}")]
    Unavailable(#[source] Error),
}

impl<E> SubmitError<E> {
    /// Whether the task was abandoned because its timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The callable's own error, if that is what ended the task.
    pub fn into_task_error(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for executor construction.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn timeout_message_is_stable() {
        let err: SubmitError<Boom> = SubmitError::Timeout {
            task_id: TaskId::new(1),
            timeout: Duration::from_millis(500),
        };
        assert_eq!(err.to_string(), "Task timed out");
        assert!(err.is_timeout());
    }

    #[test]
    fn failed_is_transparent() {
        let err = SubmitError::Failed(Boom);
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_timeout());
        assert!(err.into_task_error().is_some());
    }

    #[test]
    fn unavailable_wraps_pool_error() {
        let err: SubmitError<Boom> = SubmitError::Unavailable(PoolError::ShutDown.into());
        assert_eq!(
            err.to_string(),
            "Executor unavailable: Worker pool error: Worker pool is shut down"
        );
        assert!(err.into_task_error().is_none());
    }
}

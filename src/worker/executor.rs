//! Dispatch bridge: offloads callables to the worker pool with a timeout and
//! records every outcome in the metrics ledger.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::ExecutorConfig;
use crate::error::{Error, PoolError, SubmitError};
use crate::worker::id::TaskIdGenerator;
use crate::worker::ledger::{AggregateStats, MetricsLedger};
use crate::worker::pool::WorkerPool;
use crate::worker::state::{TaskRecord, TaskStatus};

/// Error text recorded for a task whose timeout elapsed.
pub const TIMEOUT_ERROR: &str = "Task timed out";

/// Error text recorded when the caller drops `submit` before it resolves.
pub const CANCELLED_ERROR: &str = "Task cancelled by caller";

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    task_type: Option<String>,
    timeout: Option<Duration>,
    context: serde_json::Map<String, serde_json::Value>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label used in metrics. Defaults to the callable's name.
    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Overrides the executor's default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a diagnostic annotation to the task record.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

struct ExecutorInner {
    config: ExecutorConfig,
    ids: TaskIdGenerator,
    pool: WorkerPool,
    ledger: MetricsLedger,
}

/// Runs blocking work on a bounded pool without stalling the async caller.
///
/// Cheap to clone; clones share the same pool and ledger.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    /// Validate `config` and start the worker pool.
    pub fn new(config: ExecutorConfig) -> Result<Self, Error> {
        config.validate()?;
        let pool = WorkerPool::new(config.max_workers)?;
        let ledger = MetricsLedger::with_limits(config.ledger_capacity, config.recent_error_limit);
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                config,
                ids: TaskIdGenerator::new(),
                pool,
                ledger,
            }),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Run `f` on the pool and await its result.
    ///
    /// Arguments are passed by capturing them in the closure. The calling task
    /// yields while the callable runs. If the timeout elapses first the caller
    /// gets [`SubmitError::Timeout`] but the callable keeps running on its
    /// worker until it returns; its result is then discarded.
    ///
    /// Exactly one ledger record is written per call, whatever the outcome.
    pub async fn submit<F, T, E>(&self, f: F, options: SubmitOptions) -> Result<T, SubmitError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let inner = &self.inner;
        let task_id = inner.ids.next_id();
        let task_type = options
            .task_type
            .unwrap_or_else(callable_name::<F>);
        let timeout = options.timeout.unwrap_or(inner.config.task_timeout);

        let mut pending = PendingRecord::new(
            self,
            TaskRecord::new(task_id, task_type, options.context),
        );

        let completion = match inner.pool.execute(f) {
            Ok(completion) => completion,
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    task_type = %pending.task_type(),
                    "Submission rejected: {}",
                    e
                );
                pending.fail(e.to_string());
                return Err(SubmitError::Unavailable(e.into()));
            }
        };
        pending.advance(TaskStatus::Dispatched);

        debug!(
            task_id = %task_id,
            task_type = %pending.task_type(),
            timeout_ms = timeout.as_millis() as u64,
            "Task dispatched"
        );

        match tokio::time::timeout(timeout, completion).await {
            Ok(Ok(finished)) => {
                pending.ran(finished.queue_wait);
                match finished.value {
                    Ok(value) => {
                        pending.succeed();
                        Ok(value)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        debug!(task_id = %task_id, error = %message, "Task failed");
                        pending.fail(message);
                        Err(SubmitError::Failed(e))
                    }
                }
            }
            Ok(Err(PoolError::Panicked(message))) => {
                pending.advance(TaskStatus::Running);
                pending.fail(format!("panicked: {message}"));
                Err(SubmitError::Panicked { task_id, message })
            }
            Ok(Err(e)) => {
                pending.fail(e.to_string());
                Err(SubmitError::Unavailable(e.into()))
            }
            Err(_) => {
                warn!(
                    task_id = %task_id,
                    task_type = %pending.task_type(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Task timed out; worker left running"
                );
                pending.time_out();
                Err(SubmitError::Timeout { task_id, timeout })
            }
        }
    }

    /// Point-in-time aggregate statistics over recent tasks.
    pub fn get_task_stats(&self) -> AggregateStats {
        self.inner.ledger.snapshot_stats()
    }

    /// Copies of the newest `n` task records, oldest first.
    pub fn recent_tasks(&self, n: usize) -> Vec<TaskRecord> {
        self.inner.ledger.recent(n)
    }

    /// Stop accepting submissions and block until in-flight callables finish.
    ///
    /// Blocks the calling thread; from async code wrap it in
    /// `tokio::task::spawn_blocking`.
    pub fn shutdown(&self) {
        self.inner.pool.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.pool.is_shut_down()
    }

    pub fn busy_workers(&self) -> usize {
        self.inner.pool.busy_workers()
    }

    pub fn queued(&self) -> usize {
        self.inner.pool.queued()
    }
}

/// A task record that has not reached the ledger yet.
///
/// Every exit from `submit` commits it through one of the terminal methods.
/// If the awaiting future is dropped first, `Drop` records the task as
/// cancelled so the ledger still sees exactly one entry per submission.
struct PendingRecord<'a> {
    executor: &'a Executor,
    record: Option<TaskRecord>,
    started: Instant,
}

impl<'a> PendingRecord<'a> {
    fn new(executor: &'a Executor, record: TaskRecord) -> Self {
        Self {
            executor,
            record: Some(record),
            started: Instant::now(),
        }
    }

    fn task_type(&self) -> &str {
        self.record
            .as_ref()
            .map(|r| r.task_type.as_str())
            .unwrap_or_default()
    }

    fn advance(&mut self, status: TaskStatus) {
        if let Some(record) = self.record.as_mut() {
            if let Err(e) = record.transition_to(status) {
                warn!("{e}");
            }
        }
    }

    /// The worker finished the callable, whatever it returned.
    fn ran(&mut self, queue_wait: Duration) {
        if let Some(record) = self.record.as_mut() {
            record.set_queue_wait(queue_wait);
        }
        self.advance(TaskStatus::Running);
    }

    fn succeed(&mut self) {
        let elapsed = self.started.elapsed();
        let config = &self.executor.inner.config;
        if let Some(mut record) = self.record.take() {
            if elapsed > config.slow_threshold {
                warn!(
                    task_id = %record.task_id,
                    task_type = %record.task_type,
                    duration_ms = elapsed.as_millis() as u64,
                    "Slow task"
                );
            }
            if let Err(e) = record.succeed(elapsed) {
                warn!("{e}");
            }
            debug!(
                task_id = %record.task_id,
                duration_ms = elapsed.as_millis() as u64,
                "Task succeeded"
            );
            self.executor.inner.ledger.record(record);
        }
    }

    fn fail(&mut self, error: String) {
        let elapsed = self.started.elapsed();
        if let Some(mut record) = self.record.take() {
            let error = truncate(&error, self.executor.inner.config.max_error_len);
            if let Err(e) = record.fail(error, elapsed) {
                warn!("{e}");
            }
            self.executor.inner.ledger.record(record);
        }
    }

    fn time_out(&mut self) {
        let elapsed = self.started.elapsed();
        if let Some(mut record) = self.record.take() {
            if let Err(e) = record.time_out(TIMEOUT_ERROR, elapsed) {
                warn!("{e}");
            }
            self.executor.inner.ledger.record(record);
        }
    }
}

impl Drop for PendingRecord<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.record.as_ref() {
            debug!(task_id = %record.task_id, "Caller stopped waiting; recording cancellation");
            self.fail(CANCELLED_ERROR.to_string());
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

/// Readable name for a callable type: the last path segment that isn't a
/// closure marker, e.g. `resize_image` for `app::images::resize_image`.
pub(crate) fn callable_name<F>() -> String {
    short_type_name(std::any::type_name::<F>())
}

fn short_type_name(full: &str) -> String {
    let path = strip_generics(full);
    path.rsplit("::")
        .find(|segment| !segment.is_empty() && !segment.starts_with('{'))
        .map(str::to_string)
        .unwrap_or_else(|| full.to_string())
}

/// Remove every `<...>` group, nested or not, so `<A as B>::m` becomes `::m`
/// and `Gen<Vec<u8>>::go` becomes `Gen::go`.
fn strip_generics(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    let mut prev = '\0';
    for c in name.chars() {
        match c {
            '<' => depth += 1,
            // `->` inside a fn pointer type is not a closing bracket.
            '>' if prev != '-' && depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
        prev = c;
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

//! Process-wide default executor for ad hoc offloading.
//!
//! Prefer constructing an [`Executor`] at startup and passing it around; this
//! instance exists for call sites that have no handle to one.

use std::fmt::Display;
use std::sync::OnceLock;

use crate::config::ExecutorConfig;
use crate::error::{Error, SubmitError};
use crate::worker::executor::{Executor, SubmitOptions};

static DEFAULT_EXECUTOR: OnceLock<Executor> = OnceLock::new();

/// The shared executor with default configuration (4 workers, 30s timeout),
/// started on first use.
pub fn default_executor() -> Result<&'static Executor, Error> {
    if let Some(executor) = DEFAULT_EXECUTOR.get() {
        return Ok(executor);
    }
    let executor = Executor::new(ExecutorConfig::default())?;
    // If another thread won the race, ours is dropped and its idle workers
    // exit once their queue disconnects.
    Ok(DEFAULT_EXECUTOR.get_or_init(|| executor))
}

/// Run `f` on the shared executor with default options.
pub async fn run_cpu_bound<F, T, E>(f: F) -> Result<T, SubmitError<E>>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    let executor = default_executor().map_err(SubmitError::Unavailable)?;
    executor.submit(f, SubmitOptions::new()).await
}

/// Shut down the shared executor, if it was ever started. Blocks until its
/// in-flight work finishes.
pub fn shutdown_default() {
    if let Some(executor) = DEFAULT_EXECUTOR.get() {
        executor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    fn fib(n: u32) -> u64 {
        if n < 2 { n as u64 } else { fib(n - 1) + fib(n - 2) }
    }

    #[tokio::test]
    async fn run_cpu_bound_uses_shared_instance() {
        let value = run_cpu_bound(|| Ok::<_, Infallible>(fib(20))).await.unwrap();
        assert_eq!(value, 6765);

        let first = default_executor().unwrap();
        let second = default_executor().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.config().max_workers, 4);
        assert!(first.get_task_stats().count >= 1);
    }
}

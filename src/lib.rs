//! AI Assist offload: run blocking work off the async scheduler with
//! timeouts and a rolling performance ledger.

pub mod config;
pub mod error;
pub mod timing;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::ExecutorConfig;
pub use error::{Error, Result, SubmitError};
pub use worker::{AggregateStats, Executor, SubmitOptions, TaskId, run_cpu_bound};

//! Worker system: offloading blocking work from async tasks.
//!
//! Core components:
//! - `id`: Task identifier generator
//! - `state`: Task state machine (Created → Dispatched → Running → Succeeded/Failed/TimedOut)
//! - `ledger`: Bounded metrics ledger with aggregate stats
//! - `pool`: Fixed-size worker thread pool
//! - `executor`: Dispatch bridge: id, timeout, pool, ledger
//! - `shared`: Process-wide default executor and `run_cpu_bound`

pub mod executor;
pub mod id;
pub mod ledger;
pub mod pool;
pub mod shared;
pub mod state;

pub use executor::{Executor, SubmitOptions};
pub use id::{TaskId, TaskIdGenerator};
pub use ledger::{AggregateStats, ErrorSummary, MetricsLedger};
pub use pool::WorkerPool;
pub use shared::{default_executor, run_cpu_bound, shutdown_default};
pub use state::{TaskOutcome, TaskRecord, TaskStatus};

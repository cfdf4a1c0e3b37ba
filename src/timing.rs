//! Slow-operation instrumentation for arbitrary async work.
//!
//! Wrap a handler's future at the call site:
//!
//! ```ignore
//! let reply = timing::timed_default("translate", handle_translate(msg)).await;
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

/// Operations slower than this are logged by [`timed_default`].
pub const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_millis(1000);

/// Await `fut`, warning if it takes longer than `threshold`.
///
/// The output is returned untouched; timing never affects control flow.
pub async fn timed<Fut>(label: &str, threshold: Duration, fut: Fut) -> Fut::Output
where
    Fut: Future,
{
    let started = Instant::now();
    let output = fut.await;
    let elapsed = started.elapsed();

    if elapsed > threshold {
        warn!(
            operation = label,
            duration_ms = elapsed.as_millis() as u64,
            threshold_ms = threshold.as_millis() as u64,
            "Slow operation"
        );
    } else {
        trace!(operation = label, duration_ms = elapsed.as_millis() as u64, "Operation finished");
    }

    output
}

/// [`timed`] with the default one-second threshold.
pub async fn timed_default<Fut>(label: &str, fut: Fut) -> Fut::Output
where
    Fut: Future,
{
    timed(label, SLOW_OPERATION_THRESHOLD, fut).await
}

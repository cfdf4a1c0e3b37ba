//! Fixed-size pool of worker threads for blocking and CPU-bound callables.
//!
//! Submissions go through an unbounded FIFO queue; when every worker is busy
//! they wait there instead of being rejected. Each submission gets a
//! [`Completion`] future that resolves on the async side once a worker
//! finishes it, so the awaiting task never blocks its scheduler.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::PoolError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Default number of worker threads.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// A callable's return value plus where its time went.
#[derive(Debug)]
pub struct Finished<R> {
    pub value: R,
    /// Time between submission and a worker picking the callable up.
    pub queue_wait: Duration,
    /// Time the worker spent inside the callable.
    pub run_time: Duration,
}

/// Resolves when the worker running the callable finishes.
///
/// Dropping a `Completion` does not stop the callable; it runs to the end and
/// its result is discarded.
pub struct Completion<R> {
    rx: oneshot::Receiver<Result<Finished<R>, PoolError>>,
}

impl<R> Future for Completion<R> {
    type Output = Result<Finished<R>, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(PoolError::WorkerLost),
        })
    }
}

/// Bounded set of worker threads fed from a shared FIFO queue.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    queue: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    /// Set once every worker has been joined.
    terminated: Mutex<bool>,
    terminated_cv: Condvar,
    busy: Arc<AtomicUsize>,
    max_workers: usize,
}

impl WorkerPool {
    /// Start `max_workers` threads (at least one).
    pub fn new(max_workers: usize) -> Result<Self, PoolError> {
        let max_workers = max_workers.max(1);
        let (sender, queue) = crossbeam_channel::unbounded::<Job>();
        let busy = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(max_workers);
        for index in 0..max_workers {
            let receiver = queue.clone();
            let busy = Arc::clone(&busy);
            let handle = thread::Builder::new()
                .name(format!("offload-worker-{index}"))
                .spawn(move || worker_loop(index, receiver, busy))?;
            workers.push(handle);
        }

        info!(max_workers, "Worker pool started");

        let worker_ids = workers.iter().map(|h| h.thread().id()).collect();
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            queue,
            workers: Mutex::new(workers),
            worker_ids,
            terminated: Mutex::new(false),
            terminated_cv: Condvar::new(),
            busy,
            max_workers,
        })
    }

    /// Queue `f` for execution on the next free worker.
    ///
    /// Fails only once the pool has been shut down.
    pub fn execute<F, R>(&self, f: F) -> Result<Completion<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(PoolError::ShutDown)?;

        let (tx, rx) = oneshot::channel();
        let enqueued_at = Instant::now();

        let job: Job = Box::new(move || {
            let queue_wait = enqueued_at.elapsed();
            let started_at = Instant::now();
            let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => Ok(Finished {
                    value,
                    queue_wait,
                    run_time: started_at.elapsed(),
                }),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(panic = %message, "Offloaded callable panicked");
                    Err(PoolError::Panicked(message))
                }
            };
            // The waiting side may have given up (timeout); that's fine.
            let _ = tx.send(result);
        });

        sender.send(job).map_err(|_| PoolError::ShutDown)?;
        Ok(Completion { rx })
    }

    /// Stop accepting work and block until every queued and running callable
    /// has finished. Running callables are not interrupted. Idempotent.
    ///
    /// Concurrent callers all block until the workers are joined. A call made
    /// from inside a callable returns without waiting for its own worker.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if sender.is_none() {
            debug!("Worker pool already shut down");
        }
        // Workers exit once the queue is drained and every sender is gone.
        drop(sender);

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();

        let current = thread::current().id();
        if workers.is_empty() {
            // Another caller owns the joins; wait for it unless we are one of
            // the workers it is joining.
            if !self.worker_ids.contains(&current) {
                self.wait_terminated();
            }
            return;
        }

        for handle in workers {
            if handle.thread().id() == current {
                // Called from inside a callable; joining ourselves would hang.
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }

        *self
            .terminated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        self.terminated_cv.notify_all();

        info!("Worker pool shut down");
    }

    fn wait_terminated(&self) {
        let mut terminated = self
            .terminated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*terminated {
            terminated = self
                .terminated_cv
                .wait(terminated)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers currently inside a callable.
    pub fn busy_workers(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Callables waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers)
            .field("busy", &self.busy_workers())
            .field("queued", &self.queued())
            .finish()
    }
}

fn worker_loop(index: usize, receiver: Receiver<Job>, busy: Arc<AtomicUsize>) {
    debug!(worker = index, "Worker started");
    while let Ok(job) = receiver.recv() {
        busy.fetch_add(1, Ordering::SeqCst);
        job();
        busy.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = index, "Worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

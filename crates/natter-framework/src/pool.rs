//! Bounded execution of handler work.
//!
//! A [`WorkerPool`] runs submitted futures on the tokio runtime with two
//! bounds:
//!
//! - **workers**: how many tasks may execute at the same time;
//! - **backlog**: how many tasks may be submitted but unfinished. Once it is
//!   reached, [`WorkerPool::submit`] waits, which is how the dispatch loop
//!   gets backpressure instead of an ever-growing pile of pending work.
//!
//! Tasks may also be submitted to a named **lane**. Tasks in one lane run
//! one at a time in submission order; different lanes (and unlaned tasks)
//! run concurrently. Lanes exist only while they have work.
//!
//! A task that fails or panics is logged with its label and reported through
//! its [`TaskHandle`]; it never affects the submitter or other tasks.
//!
//! Shutdown is [`close`](WorkerPool::close) (refuse new work) followed by
//! [`join`](WorkerPool::join) (wait for everything already submitted).
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = WorkerPool::new("workers", 4, 64);
//! let handle = pool.submit("greet", async { Ok(()) }).await?;
//! assert!(handle.outcome().await.is_success());
//! pool.shutdown().await;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::{BoxError, PoolError};

/// How a submitted task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// The task returned an error.
    Failed(String),
    /// The task panicked.
    Panicked(String),
    /// The task was dropped without running.
    Dropped,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Resolves once the submitted task has finished.
#[derive(Debug)]
pub struct TaskHandle(oneshot::Receiver<TaskOutcome>);

impl TaskHandle {
    pub async fn outcome(self) -> TaskOutcome {
        self.0.await.unwrap_or(TaskOutcome::Dropped)
    }
}

struct Job {
    label: String,
    task: BoxFuture<'static, Result<(), BoxError>>,
    backlog: OwnedSemaphorePermit,
    done: oneshot::Sender<TaskOutcome>,
}

struct Inner {
    name: Arc<str>,
    workers: Semaphore,
    backlog: Arc<Semaphore>,
    backlog_size: usize,
    tracker: TaskTracker,
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
}

/// A bounded, cloneable worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    /// Creates a pool running at most `workers` tasks concurrently with at
    /// most `backlog` submitted-but-unfinished tasks. Both are at least 1.
    pub fn new(name: impl Into<Arc<str>>, workers: usize, backlog: usize) -> Self {
        let workers = workers.max(1);
        let backlog = backlog.max(1);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                workers: Semaphore::new(workers),
                backlog: Arc::new(Semaphore::new(backlog)),
                backlog_size: backlog,
                tracker: TaskTracker::new(),
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The number of execution units available to this process.
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Tasks submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.backlog_size - self.inner.backlog.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tracker.is_closed()
    }

    /// Submits a task, waiting while the backlog is full.
    pub async fn submit<F>(&self, label: impl Into<String>, task: F) -> Result<TaskHandle, PoolError>
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let (job, handle) = self.prepare(label.into(), task.boxed()).await?;
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move { inner.run(job).await });
        Ok(handle)
    }

    /// Submits a task to `lane`; it runs after every earlier task of the lane.
    pub async fn submit_laned<F>(
        &self,
        lane: impl Into<String>,
        label: impl Into<String>,
        task: F,
    ) -> Result<TaskHandle, PoolError>
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let (mut job, handle) = self.prepare(label.into(), task.boxed()).await?;
        let lane = lane.into();

        let rx = {
            let mut lanes = self.inner.lanes.lock();
            if let Some(tx) = lanes.get(&lane) {
                match tx.send(job) {
                    Ok(()) => return Ok(handle),
                    Err(mpsc::error::SendError(returned)) => job = returned,
                }
            }
            let (tx, rx) = mpsc::unbounded_channel();
            // The receiver is alive right here, so this cannot fail.
            let _ = tx.send(job);
            lanes.insert(lane.clone(), tx);
            rx
        };

        debug!(pool = %self.inner.name, lane = %lane, "Lane opened");
        let inner = Arc::clone(&self.inner);
        self.inner
            .tracker
            .spawn(async move { inner.drive_lane(lane, rx).await });
        Ok(handle)
    }

    async fn prepare(
        &self,
        label: String,
        task: BoxFuture<'static, Result<(), BoxError>>,
    ) -> Result<(Job, TaskHandle), PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let backlog = Arc::clone(&self.inner.backlog)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        let (done, rx) = oneshot::channel();
        Ok((
            Job {
                label,
                task,
                backlog,
                done,
            },
            TaskHandle(rx),
        ))
    }

    /// Stops accepting submissions. Submitters blocked on the backlog fail
    /// with [`PoolError::Closed`]; already submitted work keeps running.
    pub fn close(&self) {
        if !self.inner.tracker.is_closed() {
            self.inner.backlog.close();
            self.inner.tracker.close();
            info!(pool = %self.inner.name, in_flight = self.in_flight(), "Pool closed");
        }
    }

    /// Waits until every submitted task has finished. Only returns after
    /// [`close`](Self::close) has been called.
    pub async fn join(&self) {
        self.inner.tracker.wait().await;
        debug!(pool = %self.inner.name, "Pool drained");
    }

    /// `close` followed by `join`.
    pub async fn shutdown(&self) {
        self.close();
        self.join().await;
    }
}

impl Inner {
    async fn run(&self, job: Job) {
        let Job {
            label,
            task,
            backlog,
            done,
        } = job;

        let outcome = match self.workers.acquire().await {
            Ok(_worker) => match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => TaskOutcome::Completed,
                Ok(Err(e)) => {
                    error!(pool = %self.name, task = %label, error = %e, "Task failed");
                    TaskOutcome::Failed(e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(&panic);
                    error!(pool = %self.name, task = %label, panic = %message, "Task panicked");
                    TaskOutcome::Panicked(message)
                }
            },
            Err(_) => TaskOutcome::Dropped,
        };

        drop(backlog);
        let _ = done.send(outcome);
    }

    async fn drive_lane(&self, lane: String, mut rx: mpsc::UnboundedReceiver<Job>) {
        loop {
            let job = match rx.try_recv() {
                Ok(job) => job,
                Err(_) => {
                    // Re-check under the map lock so a concurrent submit either
                    // lands in this lane or opens a fresh one.
                    let mut lanes = self.lanes.lock();
                    match rx.try_recv() {
                        Ok(job) => job,
                        Err(_) => {
                            lanes.remove(&lane);
                            return;
                        }
                    }
                }
            };
            self.run(job).await;
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

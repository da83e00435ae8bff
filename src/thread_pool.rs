use std::{
    any::Any,
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, Builder, JoinHandle},
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, trace};

use crate::utils::default_worker_count;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    ShutDown,

    #[error("task panicked: {0}")]
    TaskPanicked(String),

    #[error("task result was dropped before delivery")]
    ResultDropped,

    #[error("timed out waiting for task result")]
    Timeout,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

struct SharedState {
    queue: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    shutdown: AtomicBool,
}

impl SharedState {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Job>> {
        // jobs run outside the lock, so a poisoned queue is still consistent
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed set of worker threads pulling jobs from a shared FIFO queue.
///
/// Idle workers park on a condition variable. Shutdown stops intake, lets the
/// workers drain whatever is already queued and joins them.
pub struct WorkerPool {
    workers: Mutex<Vec<JoinHandle<()>>>,
    state: Arc<SharedState>,
    thread_count: usize,
}

impl WorkerPool {
    /// Spawns `capacity` workers, or one per available core when `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        let capacity = match capacity {
            0 => default_worker_count(),
            n => n,
        };

        let state = Arc::new(SharedState {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(capacity);

        for id in 0..capacity {
            let state_clone = Arc::clone(&state);
            let spawned = Builder::new()
                .name(format!("msgloop-worker-{id}"))
                .spawn(move || worker_loop(id, &state_clone));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(worker = id, error = %e, "failed to spawn worker thread");
                    state.shutdown.store(true, Ordering::SeqCst);
                    state.condvar.notify_all();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(PoolError::Spawn(e.to_string()));
                }
            }
        }

        debug!(threads = capacity, "worker pool started");

        Ok(Self {
            workers: Mutex::new(workers),
            state,
            thread_count: capacity,
        })
    }

    /// Queues `task` and returns a handle to its result.
    pub fn submit<F, R>(&self, task: F) -> Result<TaskHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        self.push(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| PoolError::TaskPanicked(panic_message(payload.as_ref())));
            // the caller may have dropped its handle
            let _ = sender.send(outcome);
        }))?;

        Ok(TaskHandle { receiver })
    }

    /// Queues `task` without a result channel.
    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                error!(reason = %panic_message(payload.as_ref()), "detached task panicked");
            }
        }))
    }

    fn push(&self, job: Job) -> Result<(), PoolError> {
        let mut queue = self.state.lock_queue();
        // checked under the lock so nothing lands after the workers drained
        if self.state.shutdown.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }
        queue.push_back(job);
        drop(queue);
        self.state.condvar.notify_one();
        Ok(())
    }

    /// Stops intake, drains queued jobs and joins every worker. Idempotent.
    pub fn shutdown(&self) {
        {
            let _queue = self.state.lock_queue();
            self.state.shutdown.store(true, Ordering::SeqCst);
        }
        self.state.condvar.notify_all();

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        if workers.is_empty() {
            return;
        }

        let current = thread::current().id();
        for worker in workers {
            // a job that drops the last owner of the pool runs on a worker
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }
        debug!("worker pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.shutdown.load(Ordering::SeqCst)
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Jobs queued but not yet picked up by a worker.
    pub fn pending_tasks(&self) -> usize {
        self.state.lock_queue().len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("thread_count", &self.thread_count)
            .field("pending_tasks", &self.pending_tasks())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

fn worker_loop(id: usize, state: &SharedState) {
    loop {
        let job = {
            let mut queue = state.lock_queue();

            while queue.is_empty() && !state.shutdown.load(Ordering::SeqCst) {
                queue = state
                    .condvar
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }

            match queue.pop_front() {
                Some(job) => job,
                // shutdown set and nothing left to drain
                None => break,
            }
        };

        trace!(worker = id, "running job");
        job();
    }
    trace!(worker = id, "worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Receiving end for the result of a submitted task.
#[must_use = "dropping a TaskHandle discards the task's result"]
pub struct TaskHandle<R> {
    receiver: Receiver<Result<R, PoolError>>,
}

impl<R> TaskHandle<R> {
    /// Blocks until the task has run.
    pub fn join(self) -> Result<R, PoolError> {
        self.receiver
            .recv()
            .map_err(|_| PoolError::ResultDropped)?
    }

    /// Returns `None` while the task is still queued or running.
    pub fn try_join(&self) -> Option<Result<R, PoolError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PoolError::ResultDropped)),
        }
    }

    pub fn join_timeout(&self, timeout: Duration) -> Result<R, PoolError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(PoolError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(PoolError::ResultDropped),
        }
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}

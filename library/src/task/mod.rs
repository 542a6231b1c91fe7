//! Background work whose results are handed back to the thread that owns the `DataSet`.

pub mod progress;

pub use progress::{LogProgress, ProgressHost};

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};

use crate::error::LibraryError;
use crate::reference::ObjectId;

pub type TaskId = u64;

/// Cooperative cancellation flag shared between the owner of a task and the worker running it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a worker reports back for a finished task.
pub enum TaskOutcome {
    Finished(Box<dyn Any + Send>),
    Failed(LibraryError),
    Canceled,
}

impl std::fmt::Debug for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Finished(_) => write!(f, "Finished"),
            TaskOutcome::Failed(e) => write!(f, "Failed({})", e),
            TaskOutcome::Canceled => write!(f, "Canceled"),
        }
    }
}

/// A task whose outcome has arrived on the owning thread.
#[derive(Debug)]
pub struct FinishedTask {
    pub id: TaskId,
    pub owner: ObjectId,
    pub outcome: TaskOutcome,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct RunningTask {
    owner: ObjectId,
    description: String,
    token: CancellationToken,
}

/// Fixed pool of worker threads.
///
/// Jobs never touch the scene graph. Their outcomes queue up until the owning thread collects
/// them with [`TaskManager::next_finished`].
pub struct TaskManager {
    job_tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    result_tx: mpsc::Sender<(TaskId, TaskOutcome)>,
    result_rx: mpsc::Receiver<(TaskId, TaskOutcome)>,
    running: HashMap<TaskId, RunningTask>,
    next_id: TaskId,
}

impl TaskManager {
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::channel();

        debug!("TaskManager starting {} worker(s)", worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = Arc::clone(&job_rx);
            let handle = thread::spawn(move || {
                loop {
                    let job = {
                        let Ok(receiver) = job_rx.lock() else {
                            error!("Task worker {} found a poisoned job queue", worker_id);
                            break;
                        };
                        receiver.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                }
            });
            workers.push(handle);
        }

        Self {
            job_tx: Some(job_tx),
            workers,
            result_tx,
            result_rx,
            running: HashMap::new(),
            next_id: 1,
        }
    }

    /// Queues `work` on the pool on behalf of `owner`.
    pub fn spawn<F>(
        &mut self,
        owner: ObjectId,
        description: impl Into<String>,
        work: F,
    ) -> Result<TaskId, LibraryError>
    where
        F: FnOnce(&CancellationToken) -> Result<Box<dyn Any + Send>, LibraryError> + Send + 'static,
    {
        let sender = self
            .job_tx
            .as_ref()
            .ok_or_else(|| LibraryError::task("task manager is shut down"))?;

        let id = self.next_id;
        self.next_id += 1;
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let result_tx = self.result_tx.clone();

        let job: Job = Box::new(move || {
            let outcome = if worker_token.is_canceled() {
                TaskOutcome::Canceled
            } else {
                match panic::catch_unwind(AssertUnwindSafe(|| work(&worker_token))) {
                    _ if worker_token.is_canceled() => TaskOutcome::Canceled,
                    Ok(Ok(value)) => TaskOutcome::Finished(value),
                    Ok(Err(e)) => TaskOutcome::Failed(e),
                    Err(_) => TaskOutcome::Failed(LibraryError::task("task panicked")),
                }
            };
            // The receiver only disappears when the manager is dropped.
            let _ = result_tx.send((id, outcome));
        });
        sender
            .send(job)
            .map_err(|_| LibraryError::task("task queue closed"))?;

        let description = description.into();
        debug!("Spawned task {} for {}: {}", id, owner, description);
        self.running.insert(
            id,
            RunningTask {
                owner,
                description,
                token,
            },
        );
        Ok(id)
    }

    /// Requests cancellation. The task stays pending until its worker reports back.
    pub fn cancel(&self, id: TaskId) {
        if let Some(task) = self.running.get(&id) {
            debug!("Canceling task {} ({})", id, task.description);
            task.token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        if !self.running.is_empty() {
            info!("Canceling {} running task(s)", self.running.len());
        }
        for task in self.running.values() {
            task.token.cancel();
        }
    }

    pub fn cancel_owned_by(&self, owner: ObjectId) {
        for (id, task) in &self.running {
            if task.owner == owner {
                debug!("Canceling task {} of {}", id, owner);
                task.token.cancel();
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.running.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, id: TaskId) -> bool {
        self.running.contains_key(&id)
    }

    /// Waits up to `timeout` (or not at all when `None`) for the next outcome.
    pub fn next_finished(&mut self, timeout: Option<Duration>) -> Option<FinishedTask> {
        loop {
            let received = match timeout {
                Some(timeout) if self.has_pending() => self.result_rx.recv_timeout(timeout).ok(),
                _ => self.result_rx.try_recv().ok(),
            };
            let (id, outcome) = received?;
            // Outcomes of tasks forgotten by `forget` are dropped here.
            if let Some(task) = self.running.remove(&id) {
                debug!("Task {} ({}) finished: {:?}", id, task.description, outcome);
                return Some(FinishedTask {
                    id,
                    owner: task.owner,
                    outcome,
                });
            }
        }
    }

    /// Drops the bookkeeping of a task whose owner no longer exists.
    pub fn forget(&mut self, id: TaskId) {
        if let Some(task) = self.running.remove(&id) {
            task.token.cancel();
        }
    }

    fn shutdown(&mut self) {
        self.cancel_all();
        drop(self.job_tx.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Task worker panicked during shutdown");
            }
        }
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

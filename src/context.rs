//! Execution contexts.
//!
//! An execution context is an ordered task queue. Conditions run their
//! recheck passes on a default context and may fire individual observers on
//! other contexts. [`SerialQueue`] is the bundled implementation: one named
//! worker thread fed by an unbounded channel, with deadline-ordered delayed
//! tasks.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{duration_ms, CondError, CondResult, ExecutionError, ValidationError};

/// A unit of work scheduled on an execution context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An ordered task queue on which actions are scheduled and run.
///
/// Tasks submitted with [`schedule`](Self::schedule) from one thread must run
/// in submission order. Implementations never run a task on the caller's
/// stack, and only refuse a task once they have shut down: a refused recheck
/// or timeout removal is never retried.
pub trait ExecutionContext: Send + Sync {
    /// Enqueue a task to run as soon as the context is free.
    fn schedule(&self, task: Task) -> CondResult<()>;

    /// Enqueue a task to run once `delay` has elapsed.
    fn schedule_after(&self, delay: Duration, task: Task) -> CondResult<()>;

    /// Returns true when called from a task running on this context.
    fn is_current(&self) -> bool {
        false
    }

    /// Name used in logs and errors.
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext").field("name", &self.name()).finish()
    }
}

/// Configuration for a [`SerialQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialQueueConfig {
    /// Worker thread name.
    pub name: String,
}

impl Default for SerialQueueConfig {
    fn default() -> Self {
        Self {
            name: "condflags-queue".to_string(),
        }
    }
}

impl SerialQueueConfig {
    /// Check the configuration before spawning a worker.
    pub fn validate(&self) -> CondResult<()> {
        if self.name.trim().is_empty() {
            return Err(CondError::Validation(ValidationError::InvalidConfig {
                field: "name".to_string(),
                reason: "queue name must not be empty".to_string(),
            }));
        }
        Ok(())
    }
}

enum QueueMsg {
    Run(Task),
    RunAt { deadline: Instant, task: Task },
}

struct Delayed {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A serial execution context backed by a dedicated thread.
///
/// Dropping the queue closes its channel, lets the worker drain already
/// queued immediate tasks, discards delayed tasks that are not yet due, and
/// joins the thread. When the last handle is dropped from a task running on
/// the queue itself the worker is detached instead.
pub struct SerialQueue {
    name: String,
    tx: Sender<QueueMsg>,
    thread_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SerialQueue {
    /// Spawn a queue with the default configuration.
    pub fn new() -> CondResult<Self> {
        Self::with_config(SerialQueueConfig::default())
    }

    /// Spawn a queue whose worker thread carries `name`.
    pub fn named(name: impl Into<String>) -> CondResult<Self> {
        Self::with_config(SerialQueueConfig { name: name.into() })
    }

    /// Spawn a queue from an explicit configuration.
    pub fn with_config(cfg: SerialQueueConfig) -> CondResult<Self> {
        cfg.validate()?;
        // Unbounded: `schedule` only fails once the worker is gone.
        let (tx, rx) = unbounded::<QueueMsg>();

        let thread_name = cfg.name.clone();
        let join = thread::Builder::new()
            .name(cfg.name.clone())
            .spawn(move || worker_loop(&thread_name, &rx))
            .map_err(|e| CondError::internal(format!("failed to spawn queue worker '{}': {e}", cfg.name)))?;

        Ok(Self {
            name: cfg.name,
            tx,
            thread_id: join.thread().id(),
            join: Mutex::new(Some(join)),
        })
    }

    /// Number of messages waiting in the channel.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Block until every task scheduled before this call has run.
    ///
    /// Delayed tasks whose deadline has not passed are not waited for.
    pub fn flush(&self, timeout: Duration) -> CondResult<()> {
        if self.is_current() {
            return Err(CondError::Execution(ExecutionError::WouldDeadlock {
                context: self.name.clone(),
            }));
        }

        let (done_tx, done_rx) = bounded::<()>(1);
        self.submit(QueueMsg::Run(Box::new(move || {
            let _ = done_tx.send(());
        })))?;

        done_rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => CondError::Execution(ExecutionError::Timeout {
                duration_ms: duration_ms(timeout),
            }),
            RecvTimeoutError::Disconnected => CondError::Execution(ExecutionError::Disconnected {
                context: self.name.clone(),
            }),
        })
    }

    fn submit(&self, msg: QueueMsg) -> CondResult<()> {
        self.tx.send(msg).map_err(|SendError(_)| {
            CondError::Execution(ExecutionError::Disconnected {
                context: self.name.clone(),
            })
        })
    }
}

impl ExecutionContext for SerialQueue {
    fn schedule(&self, task: Task) -> CondResult<()> {
        self.submit(QueueMsg::Run(task))
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> CondResult<()> {
        if delay.is_zero() {
            return self.schedule(task);
        }
        let Some(deadline) = Instant::now().checked_add(delay) else {
            // Unreachable deadline: the task could never run.
            debug!(queue = %self.name, delay_ms = duration_ms(delay), "discarding task with unreachable deadline");
            return Ok(());
        };
        self.submit(QueueMsg::RunAt { deadline, task })
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name)
            .field("queued", &self.tx.len())
            .finish_non_exhaustive()
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Close the channel first so the worker can terminate.
        let (dummy_tx, _) = unbounded::<QueueMsg>();
        let old_tx = std::mem::replace(&mut self.tx, dummy_tx);
        drop(old_tx);

        let handle = match self.join.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if self.is_current() {
                // Joining our own thread would deadlock; the worker exits on its
                // own once the current task returns.
                drop(handle);
            } else {
                let _ = handle.join();
            }
        }
    }
}

fn run_task(queue: &str, task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!(queue = %queue, "task panicked; continuing with next task");
    }
}

fn worker_loop(name: &str, rx: &Receiver<QueueMsg>) {
    let mut delayed: BinaryHeap<Delayed> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let now = Instant::now();
        while delayed.peek().is_some_and(|d| d.deadline <= now) {
            if let Some(due) = delayed.pop() {
                run_task(name, due.task);
            }
        }

        let msg = match delayed.peek() {
            Some(next) => match rx.recv_timeout(next.deadline.saturating_duration_since(now)) {
                Ok(msg) => msg,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(msg) => msg,
                Err(_) => break,
            },
        };

        match msg {
            QueueMsg::Run(task) => run_task(name, task),
            QueueMsg::RunAt { deadline, task } => {
                seq = seq.wrapping_add(1);
                delayed.push(Delayed { deadline, seq, task });
            }
        }
    }

    if !delayed.is_empty() {
        debug!(queue = %name, discarded = delayed.len(), "queue closed with pending delayed tasks");
    }
}
